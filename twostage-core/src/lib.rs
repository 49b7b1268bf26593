//! # twostage-core: scoring and training control for two-stage detectors
//!
//! This crate holds the parts of a region-proposal + classification detector
//! pipeline that are independent of any particular network implementation:
//!
//! 1. **Evaluation**: IoU matching of detections to ground truth, cumulative
//!    precision/recall curves, 11-point and VOC average precision.
//! 2. **Optimisation**: strategy selection, piecewise LR/WD schedules and the
//!    built-in optimizer steppers that update the flat weight buffer.
//! 3. **Training control**: training modes, the parameter store, confusion
//!    tracking, periodic evaluation, checkpoints and HTML reports.
//!
//! Networks, losses, image decoding and plotting are supplied by the caller
//! through the traits in [`data`], [`eval::runner`] and [`training::runner`].

// Foundation
pub mod config;
pub mod error;
pub mod persistence;

// Inputs
pub mod data;
pub mod recorded;

// Scoring
pub mod eval;

// Optimisation and orchestration
pub mod training;

// Output
pub mod report;

// Re-exports
pub use config::TrainConfig;
pub use error::TrainError;
pub use eval::{
    AveragePrecision, BoundingBox, Detection, EvaluationRunner, EvaluationSummary,
    GroundTruthEntry, GroundTruthInstance, MatchClassifier, PrecisionRecallCurve, SampleResult,
};
pub use recorded::RecordedDetections;
pub use training::{
    OptimizerKind, ParameterStore, Schedule, ScheduleRow, TrainingLoop, TrainingMode,
    TrainingStats,
};
