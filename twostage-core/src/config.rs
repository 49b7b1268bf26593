//! Run configuration.
//!
//! Uses `figment` for layered configuration: defaults -> TOML file ->
//! `TWOSTAGE_` environment variables -> explicit overrides (CLI flags).

use crate::error::TrainError;
use crate::training::mode::TrainingMode;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Everything needed to start a training run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainConfig {
    /// Which sub-networks are optimised.
    #[serde(default)]
    pub mode: TrainingMode,
    /// Optimizer strategy name (`CG`, `LBFGS`, `sgd`, `rmsprop`, `adagrad`,
    /// `adam`, `adadelta`). Checked when the training loop starts.
    #[serde(default = "default_optimizer")]
    pub optimizer: String,
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,
    /// Initial weight decay for `sgd`; the schedule overrides it from iteration 1.
    #[serde(default = "default_weight_decay")]
    pub weight_decay: f64,
    /// Squared-gradient decay factor for `rmsprop`.
    #[serde(default = "default_rmsprop_decay")]
    pub rmsprop_decay: f64,
    /// Inner iterations for `LBFGS`, line searches for `CG`.
    #[serde(default = "default_max_iter")]
    pub max_iter: usize,
    /// History length kept by `LBFGS`.
    #[serde(default = "default_lbfgs_corrections")]
    pub lbfgs_corrections: usize,
    /// Total optimizer iterations.
    #[serde(default = "default_iterations")]
    pub iterations: usize,
    /// Evaluate and report every `plot` iterations.
    #[serde(default = "default_plot")]
    pub plot: usize,
    /// Checkpoint every `snapshot` iterations.
    #[serde(default = "default_snapshot")]
    pub snapshot: usize,
    /// Compute device ordinal, passed through to the network collaborators.
    #[serde(default = "default_device")]
    pub device: u32,
    #[serde(default)]
    pub seed: u64,
    /// Train and evaluate on one fixed batch.
    #[serde(default)]
    pub single_batch: bool,
    /// Validation samples drawn per evaluation in random-sampling mode.
    #[serde(default = "default_validation_samples")]
    pub validation_samples: usize,
    /// Classification classes including background, sizes the confusion matrix.
    #[serde(default = "default_classes")]
    pub classes: usize,
    /// Render annotated detection images during evaluation.
    #[serde(default)]
    pub annotate: bool,
    /// Directory for checkpoints, annotated images and reports.
    #[serde(default = "default_result_dir")]
    pub result_dir: PathBuf,
    /// Prefix of checkpoint and report file names.
    #[serde(default = "default_experiment")]
    pub experiment: String,
    /// Checkpoint whose proposal-network weights seed this run.
    #[serde(default)]
    pub pnet_snapshot: Option<PathBuf>,
    /// Checkpoint whose classification-network weights (and stats) seed this run.
    #[serde(default)]
    pub cnet_snapshot: Option<PathBuf>,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            mode: TrainingMode::default(),
            optimizer: default_optimizer(),
            learning_rate: default_learning_rate(),
            weight_decay: default_weight_decay(),
            rmsprop_decay: default_rmsprop_decay(),
            max_iter: default_max_iter(),
            lbfgs_corrections: default_lbfgs_corrections(),
            iterations: default_iterations(),
            plot: default_plot(),
            snapshot: default_snapshot(),
            device: default_device(),
            seed: 0,
            single_batch: false,
            validation_samples: default_validation_samples(),
            classes: default_classes(),
            annotate: false,
            result_dir: default_result_dir(),
            experiment: default_experiment(),
            pnet_snapshot: None,
            cnet_snapshot: None,
        }
    }
}

impl TrainConfig {
    /// Reject cadences and counts that would make the loop meaningless.
    pub fn validate(&self) -> Result<(), TrainError> {
        if self.iterations == 0 {
            return Err(TrainError::config("iterations must be at least 1"));
        }
        if self.plot == 0 {
            return Err(TrainError::config("plot cadence must be at least 1"));
        }
        if self.snapshot == 0 {
            return Err(TrainError::config("snapshot cadence must be at least 1"));
        }
        if self.validation_samples == 0 {
            return Err(TrainError::config("validation_samples must be at least 1"));
        }
        if self.classes < 2 {
            return Err(TrainError::config(
                "classes must include background and at least one object class",
            ));
        }
        Ok(())
    }
}

fn default_optimizer() -> String {
    "sgd".to_string()
}

fn default_learning_rate() -> f64 {
    1e-3
}

fn default_weight_decay() -> f64 {
    5e-4
}

fn default_rmsprop_decay() -> f64 {
    0.95
}

fn default_max_iter() -> usize {
    20
}

fn default_lbfgs_corrections() -> usize {
    100
}

fn default_iterations() -> usize {
    50_000
}

fn default_plot() -> usize {
    250
}

fn default_snapshot() -> usize {
    10_000
}

fn default_device() -> u32 {
    1
}

fn default_validation_samples() -> usize {
    20
}

fn default_classes() -> usize {
    21
}

fn default_result_dir() -> PathBuf {
    PathBuf::from("work")
}

fn default_experiment() -> String {
    "twostage".to_string()
}

/// Command-line level overrides. Unset fields leave lower layers untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<TrainingMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub optimizer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub learning_rate: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iterations: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub single_batch: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_dir: Option<PathBuf>,
}

/// Load configuration from layered sources.
///
/// Priority (highest to lowest):
/// 1. Explicit overrides
/// 2. Environment variables (`TWOSTAGE_LEARNING_RATE`, `TWOSTAGE_MODE`, ...)
/// 3. The TOML file at `path`, when given and present
/// 4. Built-in defaults
pub fn load_config(
    path: Option<&Path>,
    overrides: Option<&ConfigOverrides>,
) -> Result<TrainConfig, TrainError> {
    let mut figment = Figment::from(Serialized::defaults(TrainConfig::default()));

    if let Some(path) = path {
        if path.exists() {
            figment = figment.merge(Toml::file(path));
        } else {
            tracing::debug!(path = %path.display(), "Config file not found, using defaults");
        }
    }

    figment = figment.merge(Env::prefixed("TWOSTAGE_").split("__"));

    if let Some(overrides) = overrides {
        figment = figment.merge(Serialized::defaults(overrides));
    }

    let config: TrainConfig = figment.extract().map_err(Box::new)?;
    config.validate()?;
    Ok(config)
}
