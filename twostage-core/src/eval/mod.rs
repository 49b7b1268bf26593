//! Detection scoring: matching, precision/recall and average precision.

pub mod average_precision;
pub mod curve;
pub mod matching;
pub mod runner;

pub use average_precision::{ApMode, AveragePrecision};
pub use curve::PrecisionRecallCurve;
pub use matching::{
    BoundingBox, Detection, GroundTruthEntry, GroundTruthInstance, MatchClassifier, SampleResult,
};
pub use runner::{Annotator, Detector, EvaluationRunner, EvaluationSummary, SamplingPolicy};
