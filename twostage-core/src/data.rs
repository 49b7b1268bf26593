//! Samples and batch sources consumed by training and evaluation.
//!
//! Decoding, resizing and minibatch sampling happen behind [`BatchSource`];
//! the core only sees images by path plus their ground truth.

use crate::error::TrainError;
use crate::eval::matching::GroundTruthEntry;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// One annotated image.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sample {
    pub id: String,
    pub image: PathBuf,
    /// Every annotated region of interest in the image.
    #[serde(default)]
    pub rois: Vec<GroundTruthEntry>,
    /// Ground truth selected as positives when the sample was batched.
    #[serde(default)]
    pub positives: Vec<GroundTruthEntry>,
}

/// An ordered group of samples.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Batch {
    pub samples: Vec<Sample>,
}

impl Batch {
    pub fn new(samples: Vec<Sample>) -> Self {
        Self { samples }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Supplier of training and validation data.
pub trait BatchSource {
    /// Next training batch. `tag` names the consumer (e.g. `"eval"`).
    fn next_training(&mut self, tag: &str) -> Result<Batch, TrainError>;

    /// `n` independently drawn validation samples.
    fn next_validation(&mut self, n: usize) -> Result<Batch, TrainError>;
}
