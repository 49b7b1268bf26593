//! Training control: strategies, modes, parameter store and the loop itself.

pub mod callbacks;
pub mod checkpoint;
pub mod context;
pub mod mode;
pub mod optim;
pub mod params;
pub mod runner;
pub mod stats;
pub mod strategy;

pub use checkpoint::{Checkpoint, CheckpointStore};
pub use context::TrainingContext;
pub use mode::{TrainingMode, TrainingModeController, WarmStart};
pub use optim::Optimizer;
pub use params::{FrozenProposal, NetworkView, ParameterLayout, ParameterStore, SubNetwork};
pub use runner::{
    Collaborators, LoopState, Objective, ObjectiveEvaluator, TrainingLoop, TrainingOutcome,
};
pub use stats::{ConfusionAccumulator, LossBreakdown, TrainingStats};
pub use strategy::{OptimizerConfig, OptimizerKind, Schedule, ScheduleRow, select, select_by_name};
