//! Offline evaluation from detections recorded to disk.
//!
//! A recording is a JSON document of samples, each carrying its ground truth
//! and the detections a network produced for it:
//!
//! ```json
//! {
//!   "samples": [
//!     {
//!       "id": "000005",
//!       "image": "JPEGImages/000005.jpg",
//!       "rois": [{"box": [0, 0, 10, 10], "class": 9}],
//!       "detections": [{"box": [1, 1, 10, 10], "class": 9, "confidence": 0.8}]
//!     }
//!   ]
//! }
//! ```
//!
//! [`RecordedDetections`] replays such a file as both the batch source and the
//! detector, so the evaluation runner can score it without a network.

use crate::data::{Batch, BatchSource, Sample};
use crate::error::TrainError;
use crate::eval::matching::Detection;
use crate::eval::runner::Detector;
use crate::persistence;
use crate::training::params::NetworkView;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordedSample {
    #[serde(flatten)]
    pub sample: Sample,
    #[serde(default)]
    pub detections: Vec<Detection>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Recording {
    pub samples: Vec<RecordedSample>,
}

/// A loaded recording, before it is split into its two roles.
pub struct RecordedDetections {
    source: RecordedSource,
    detector: RecordedDetector,
}

impl RecordedDetections {
    pub fn new(recording: Recording, seed: u64) -> Result<Self, TrainError> {
        let mut samples = Vec::with_capacity(recording.samples.len());
        let mut detections = HashMap::with_capacity(recording.samples.len());
        for recorded in recording.samples {
            if detections
                .insert(recorded.sample.id.clone(), recorded.detections)
                .is_some()
            {
                return Err(TrainError::data_source(format!(
                    "sample '{}' recorded twice",
                    recorded.sample.id
                )));
            }
            samples.push(recorded.sample);
        }
        Ok(Self {
            source: RecordedSource {
                samples,
                rng: StdRng::seed_from_u64(seed),
            },
            detector: RecordedDetector { detections },
        })
    }

    pub fn load(path: &Path, seed: u64) -> Result<Self, TrainError> {
        let recording: Recording = persistence::read_json(path)?.ok_or_else(|| {
            TrainError::data_source(format!("{} does not exist", path.display()))
        })?;
        tracing::debug!(
            path = %path.display(),
            samples = recording.samples.len(),
            "Loaded recorded detections"
        );
        Self::new(recording, seed)
    }

    pub fn len(&self) -> usize {
        self.source.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.source.samples.is_empty()
    }

    pub fn split(self) -> (RecordedSource, RecordedDetector) {
        (self.source, self.detector)
    }
}

/// Serves the recorded samples.
pub struct RecordedSource {
    samples: Vec<Sample>,
    rng: StdRng,
}

impl BatchSource for RecordedSource {
    /// The whole recording, in file order.
    fn next_training(&mut self, _tag: &str) -> Result<Batch, TrainError> {
        Ok(Batch::new(self.samples.clone()))
    }

    /// `n` samples drawn uniformly with replacement.
    fn next_validation(&mut self, n: usize) -> Result<Batch, TrainError> {
        if self.samples.is_empty() {
            return Err(TrainError::data_source("recording holds no samples"));
        }
        let drawn = (0..n)
            .map(|_| self.samples[self.rng.gen_range(0..self.samples.len())].clone())
            .collect();
        Ok(Batch::new(drawn))
    }
}

/// Replays the recorded detections by sample id.
pub struct RecordedDetector {
    detections: HashMap<String, Vec<Detection>>,
}

impl Detector for RecordedDetector {
    fn detect(
        &mut self,
        sample: &Sample,
        _view: &NetworkView<'_>,
    ) -> Result<Vec<Detection>, TrainError> {
        self.detections.get(&sample.id).cloned().ok_or_else(|| {
            TrainError::detector(format!("no detections recorded for '{}'", sample.id))
        })
    }
}
