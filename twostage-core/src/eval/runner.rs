//! Periodic detection-quality evaluation.

use crate::config::TrainConfig;
use crate::data::{Batch, BatchSource, Sample};
use crate::error::TrainError;
use crate::eval::average_precision::AveragePrecision;
use crate::eval::curve::PrecisionRecallCurve;
use crate::eval::matching::{Detection, MatchClassifier, SampleResult};
use crate::training::mode::TrainingMode;
use crate::training::params::NetworkView;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Runs the full two-stage network on one image.
pub trait Detector {
    /// Detections for `sample`, in the detector's output order.
    fn detect(
        &mut self,
        sample: &Sample,
        view: &NetworkView<'_>,
    ) -> Result<Vec<Detection>, TrainError>;
}

/// Renders detections onto the sample image.
pub trait Annotator {
    /// Write an annotated copy of the image under `out_dir`, returning its path.
    fn annotate(
        &mut self,
        sample: &Sample,
        detections: &[Detection],
        out_dir: &Path,
    ) -> Result<PathBuf, TrainError>;
}

/// Where evaluation samples come from.
#[derive(Debug, Clone)]
pub enum SamplingPolicy {
    /// Every sample of one fixed training batch, scored against its positives.
    SingleBatch(Batch),
    /// `samples` fresh validation samples per cycle, scored against all rois.
    RandomSampling { samples: usize },
}

/// Outcome of one evaluation cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationSummary {
    pub mode: TrainingMode,
    pub sample_ids: Vec<String>,
    /// Per-sample tallies, empty when classification output is not scored.
    pub results: Vec<SampleResult>,
    pub curve: PrecisionRecallCurve,
    pub eleven_point_ap: Option<f64>,
    pub voc_ap: Option<f64>,
    /// VOC AP as a percentage; 0 when not scored.
    pub map_percent: f64,
    #[serde(default)]
    pub annotated: Vec<PathBuf>,
}

pub struct EvaluationRunner {
    policy: SamplingPolicy,
    classifier: MatchClassifier,
    annotation_dir: Option<PathBuf>,
}

impl EvaluationRunner {
    pub fn new(policy: SamplingPolicy) -> Self {
        Self {
            policy,
            classifier: MatchClassifier::default(),
            annotation_dir: None,
        }
    }

    /// Pick the policy the config asks for. Single-batch mode pulls its fixed
    /// batch from `source` once, here.
    pub fn from_config(
        config: &TrainConfig,
        source: &mut dyn BatchSource,
    ) -> Result<Self, TrainError> {
        let policy = if config.single_batch {
            SamplingPolicy::SingleBatch(source.next_training("eval")?)
        } else {
            SamplingPolicy::RandomSampling {
                samples: config.validation_samples,
            }
        };
        let mut runner = Self::new(policy);
        if config.annotate {
            runner.annotation_dir = Some(config.result_dir.join("detections"));
        }
        Ok(runner)
    }

    pub fn with_classifier(mut self, classifier: MatchClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn with_annotations(mut self, out_dir: PathBuf) -> Self {
        self.annotation_dir = Some(out_dir);
        self
    }

    pub fn policy(&self) -> &SamplingPolicy {
        &self.policy
    }

    pub fn evaluate(
        &self,
        mode: TrainingMode,
        view: &NetworkView<'_>,
        detector: &mut dyn Detector,
        source: &mut dyn BatchSource,
        mut annotator: Option<&mut dyn Annotator>,
    ) -> Result<EvaluationSummary, TrainError> {
        let drawn;
        let (samples, score_positives) = match &self.policy {
            SamplingPolicy::SingleBatch(batch) => (&batch.samples, true),
            SamplingPolicy::RandomSampling { samples } => {
                drawn = source.next_validation(*samples)?;
                (&drawn.samples, false)
            }
        };

        let scored = mode.scores_classification();
        let mut results = Vec::with_capacity(if scored { samples.len() } else { 0 });
        let mut annotated = Vec::new();

        for sample in samples {
            let detections = detector.detect(sample, view)?;
            tracing::debug!(sample = %sample.id, detections = detections.len(), "Detected");

            if scored {
                let truth = if score_positives {
                    &sample.positives
                } else {
                    &sample.rois
                };
                results.push(self.classifier.classify(&detections, truth));
            }

            if let (Some(annotator), Some(dir)) =
                (annotator.as_deref_mut(), self.annotation_dir.as_deref())
            {
                match annotator.annotate(sample, &detections, dir) {
                    Ok(path) => annotated.push(path),
                    Err(e) => {
                        tracing::warn!(
                            sample = %sample.id,
                            error = %e,
                            "Annotation failed, skipping image"
                        );
                    }
                }
            }
        }

        let sample_ids = samples.iter().map(|s| s.id.clone()).collect();
        if !scored {
            tracing::info!(samples = samples.len(), "Evaluation ran, classification not scored");
            return Ok(EvaluationSummary {
                mode,
                sample_ids,
                results,
                curve: PrecisionRecallCurve::default(),
                eleven_point_ap: None,
                voc_ap: None,
                map_percent: 0.0,
                annotated,
            });
        }

        let curve = PrecisionRecallCurve::from_results(&results);
        let eleven_point_ap = AveragePrecision::eleven_point(&curve);
        let voc_ap = AveragePrecision::voc(&curve);
        let map_percent = voc_ap * 100.0;
        tracing::debug!(eleven_point_ap, "11-point AP");
        tracing::info!(samples = samples.len(), map = map_percent, "Evaluation complete");

        Ok(EvaluationSummary {
            mode,
            sample_ids,
            results,
            curve,
            eleven_point_ap: Some(eleven_point_ap),
            voc_ap: Some(voc_ap),
            map_percent,
            annotated,
        })
    }
}
