//! Optimizer strategy selection and learning-rate schedules.

use crate::config::TrainConfig;
use crate::error::TrainError;
use crate::training::optim::{
    Adadelta, Adagrad, Adam, ConjugateGradient, Lbfgs, Optimizer, RmsProp, Sgd,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Recognised optimizer strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OptimizerKind {
    #[serde(rename = "CG")]
    Cg,
    #[serde(rename = "LBFGS")]
    Lbfgs,
    #[serde(rename = "sgd")]
    Sgd,
    #[serde(rename = "rmsprop")]
    RmsProp,
    #[serde(rename = "adagrad")]
    Adagrad,
    #[serde(rename = "adam")]
    Adam,
    #[serde(rename = "adadelta")]
    Adadelta,
}

impl OptimizerKind {
    pub const ALL: [OptimizerKind; 7] = [
        Self::Cg,
        Self::Lbfgs,
        Self::Sgd,
        Self::RmsProp,
        Self::Adagrad,
        Self::Adam,
        Self::Adadelta,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cg => "CG",
            Self::Lbfgs => "LBFGS",
            Self::Sgd => "sgd",
            Self::RmsProp => "rmsprop",
            Self::Adagrad => "adagrad",
            Self::Adam => "adam",
            Self::Adadelta => "adadelta",
        }
    }
}

impl fmt::Display for OptimizerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OptimizerKind {
    type Err = TrainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| TrainError::UnknownOptimizer(s.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CgParams {
    pub max_iter: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LbfgsParams {
    pub learning_rate: f64,
    pub max_iter: usize,
    pub n_correction: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SgdParams {
    pub learning_rate: f64,
    pub weight_decay: f64,
    pub momentum: f64,
    pub nesterov: bool,
    pub learning_rate_decay: f64,
    pub dampening: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RmsPropParams {
    pub learning_rate: f64,
    pub alpha: f64,
    pub epsilon: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdagradParams {
    pub learning_rate: f64,
    pub learning_rate_decay: f64,
    pub weight_decay: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdamParams {
    pub learning_rate: f64,
    pub beta1: f64,
    pub beta2: f64,
    pub epsilon: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdadeltaParams {
    pub rho: f64,
    pub epsilon: f64,
    pub weight_decay: f64,
}

/// Live hyperparameters of the selected strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "strategy")]
pub enum OptimizerConfig {
    #[serde(rename = "CG")]
    Cg(CgParams),
    #[serde(rename = "LBFGS")]
    Lbfgs(LbfgsParams),
    #[serde(rename = "sgd")]
    Sgd(SgdParams),
    #[serde(rename = "rmsprop")]
    RmsProp(RmsPropParams),
    #[serde(rename = "adagrad")]
    Adagrad(AdagradParams),
    #[serde(rename = "adam")]
    Adam(AdamParams),
    #[serde(rename = "adadelta")]
    Adadelta(AdadeltaParams),
}

impl OptimizerConfig {
    pub fn kind(&self) -> OptimizerKind {
        match self {
            Self::Cg(_) => OptimizerKind::Cg,
            Self::Lbfgs(_) => OptimizerKind::Lbfgs,
            Self::Sgd(_) => OptimizerKind::Sgd,
            Self::RmsProp(_) => OptimizerKind::RmsProp,
            Self::Adagrad(_) => OptimizerKind::Adagrad,
            Self::Adam(_) => OptimizerKind::Adam,
            Self::Adadelta(_) => OptimizerKind::Adadelta,
        }
    }

    pub fn learning_rate(&self) -> Option<f64> {
        match self {
            Self::Lbfgs(p) => Some(p.learning_rate),
            Self::Sgd(p) => Some(p.learning_rate),
            Self::RmsProp(p) => Some(p.learning_rate),
            Self::Adagrad(p) => Some(p.learning_rate),
            Self::Adam(p) => Some(p.learning_rate),
            Self::Cg(_) | Self::Adadelta(_) => None,
        }
    }

    pub fn weight_decay(&self) -> Option<f64> {
        match self {
            Self::Sgd(p) => Some(p.weight_decay),
            Self::Adagrad(p) => Some(p.weight_decay),
            Self::Adadelta(p) => Some(p.weight_decay),
            _ => None,
        }
    }
}

/// Learning rate and weight decay applied over an inclusive iteration range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleRow {
    pub start: usize,
    /// Inclusive end; `None` runs to the end of training.
    pub end: Option<usize>,
    pub learning_rate: f64,
    pub weight_decay: f64,
}

impl ScheduleRow {
    pub fn new(start: usize, end: Option<usize>, learning_rate: f64, weight_decay: f64) -> Self {
        Self {
            start,
            end,
            learning_rate,
            weight_decay,
        }
    }

    pub fn contains(&self, iteration: usize) -> bool {
        iteration >= self.start && self.end.is_none_or(|end| iteration <= end)
    }
}

/// Ordered, non-overlapping schedule rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
    rows: Vec<ScheduleRow>,
}

impl Schedule {
    pub fn new(rows: Vec<ScheduleRow>) -> Result<Self, TrainError> {
        for (i, row) in rows.iter().enumerate() {
            if row.end.is_some_and(|end| end < row.start) {
                return Err(TrainError::InvalidSchedule(format!(
                    "row {i} ends before it starts"
                )));
            }
            if let Some(next) = rows.get(i + 1) {
                match row.end {
                    None => {
                        return Err(TrainError::InvalidSchedule(format!(
                            "open-ended row {i} must be last"
                        )));
                    }
                    Some(end) if next.start <= end => {
                        return Err(TrainError::InvalidSchedule(format!(
                            "row {} starts at {} inside row {i} ending at {end}",
                            i + 1,
                            next.start
                        )));
                    }
                    Some(_) => {}
                }
            }
        }
        Ok(Self { rows })
    }

    /// The stepped decay used with `sgd`.
    pub fn default_sgd() -> Self {
        Self {
            rows: vec![
                ScheduleRow::new(1, Some(8_000), 5e-4, 5e-5),
                ScheduleRow::new(8_001, Some(16_000), 1e-4, 1e-5),
                ScheduleRow::new(16_001, Some(24_000), 5e-5, 5e-6),
                ScheduleRow::new(24_001, Some(35_000), 1e-5, 1e-6),
                ScheduleRow::new(35_001, None, 5e-6, 5e-7),
            ],
        }
    }

    pub fn rows(&self) -> &[ScheduleRow] {
        &self.rows
    }

    pub fn lookup(&self, iteration: usize) -> Option<&ScheduleRow> {
        self.rows.iter().find(|row| row.contains(iteration))
    }

    /// Overwrite learning rate and weight decay if a row covers `iteration`.
    /// Returns whether a row matched.
    pub fn apply(&self, iteration: usize, config: &mut OptimizerConfig) -> bool {
        let Some(row) = self.lookup(iteration) else {
            return false;
        };
        match config {
            OptimizerConfig::Sgd(p) => {
                p.learning_rate = row.learning_rate;
                p.weight_decay = row.weight_decay;
            }
            OptimizerConfig::Adagrad(p) => {
                p.learning_rate = row.learning_rate;
                p.weight_decay = row.weight_decay;
            }
            OptimizerConfig::Lbfgs(p) => p.learning_rate = row.learning_rate,
            OptimizerConfig::RmsProp(p) => p.learning_rate = row.learning_rate,
            OptimizerConfig::Adam(p) => p.learning_rate = row.learning_rate,
            OptimizerConfig::Adadelta(p) => p.weight_decay = row.weight_decay,
            OptimizerConfig::Cg(_) => return false,
        }
        true
    }
}

/// Everything a run needs from its strategy.
pub struct SelectedStrategy {
    pub optimizer: Box<dyn Optimizer>,
    pub config: OptimizerConfig,
    pub schedule: Option<Schedule>,
}

/// Map a strategy to its optimizer, initial hyperparameters and schedule.
pub fn select(kind: OptimizerKind, train: &TrainConfig) -> SelectedStrategy {
    let lr = train.learning_rate;
    let (optimizer, config, schedule): (Box<dyn Optimizer>, _, _) = match kind {
        OptimizerKind::Cg => (
            Box::new(ConjugateGradient::new()),
            OptimizerConfig::Cg(CgParams {
                max_iter: train.max_iter,
            }),
            None,
        ),
        OptimizerKind::Lbfgs => (
            Box::new(Lbfgs::new()),
            OptimizerConfig::Lbfgs(LbfgsParams {
                learning_rate: lr,
                max_iter: train.max_iter,
                n_correction: train.lbfgs_corrections,
            }),
            None,
        ),
        OptimizerKind::Sgd => (
            Box::new(Sgd::new()),
            OptimizerConfig::Sgd(SgdParams {
                learning_rate: lr,
                weight_decay: train.weight_decay,
                momentum: 0.8,
                nesterov: true,
                learning_rate_decay: 0.0,
                dampening: 0.0,
            }),
            Some(Schedule::default_sgd()),
        ),
        OptimizerKind::RmsProp => (
            Box::new(RmsProp::new()),
            OptimizerConfig::RmsProp(RmsPropParams {
                learning_rate: lr,
                alpha: train.rmsprop_decay,
                epsilon: 1e-3,
            }),
            None,
        ),
        OptimizerKind::Adagrad => (
            Box::new(Adagrad::new()),
            OptimizerConfig::Adagrad(AdagradParams {
                learning_rate: lr,
                learning_rate_decay: 0.0,
                weight_decay: 0.0,
            }),
            None,
        ),
        OptimizerKind::Adam => (
            Box::new(Adam::new()),
            OptimizerConfig::Adam(AdamParams {
                learning_rate: lr,
                beta1: 0.9,
                beta2: 0.999,
                epsilon: 1e-8,
            }),
            None,
        ),
        OptimizerKind::Adadelta => (
            Box::new(Adadelta::new()),
            OptimizerConfig::Adadelta(AdadeltaParams {
                rho: 0.9,
                epsilon: 1e-6,
                weight_decay: 0.0,
            }),
            None,
        ),
    };
    SelectedStrategy {
        optimizer,
        config,
        schedule,
    }
}

/// Parse `name` and select it. Unknown names are fatal.
pub fn select_by_name(name: &str, train: &TrainConfig) -> Result<SelectedStrategy, TrainError> {
    let kind: OptimizerKind = name.parse()?;
    Ok(select(kind, train))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_names_parse_exactly() {
        for kind in OptimizerKind::ALL {
            assert_eq!(kind.as_str().parse::<OptimizerKind>().unwrap(), kind);
        }
        assert!(matches!(
            "SGD".parse::<OptimizerKind>(),
            Err(TrainError::UnknownOptimizer(_))
        ));
        assert!(matches!(
            "lbfgs".parse::<OptimizerKind>(),
            Err(TrainError::UnknownOptimizer(_))
        ));
    }

    #[test]
    fn test_unknown_name_has_no_fallback() {
        let err = select_by_name("nadam", &TrainConfig::default()).err().unwrap();
        assert_eq!(err.to_string(), "Unknown optimizer strategy: nadam");
    }

    #[test]
    fn test_sgd_selection() {
        let config = TrainConfig {
            learning_rate: 0.01,
            ..Default::default()
        };
        let selected = select(OptimizerKind::Sgd, &config);
        assert_eq!(selected.optimizer.kind(), OptimizerKind::Sgd);
        let OptimizerConfig::Sgd(p) = &selected.config else {
            panic!("expected sgd config");
        };
        assert_eq!(p.learning_rate, 0.01);
        assert_eq!(p.momentum, 0.8);
        assert!(p.nesterov);
        assert_eq!(p.dampening, 0.0);
        assert_eq!(p.learning_rate_decay, 0.0);
        assert_eq!(selected.schedule.unwrap().rows().len(), 5);
    }

    #[test]
    fn test_only_sgd_carries_a_schedule() {
        let config = TrainConfig::default();
        for kind in OptimizerKind::ALL {
            let selected = select(kind, &config);
            assert_eq!(selected.config.kind(), kind);
            assert_eq!(selected.schedule.is_some(), kind == OptimizerKind::Sgd);
        }
    }

    #[test]
    fn test_fixed_hyperparameters() {
        let config = TrainConfig::default();
        let OptimizerConfig::RmsProp(p) = select(OptimizerKind::RmsProp, &config).config else {
            panic!("expected rmsprop");
        };
        assert_eq!(p.epsilon, 1e-3);

        let OptimizerConfig::Adam(p) = select(OptimizerKind::Adam, &config).config else {
            panic!("expected adam");
        };
        assert_eq!((p.beta1, p.beta2), (0.9, 0.999));

        let OptimizerConfig::Adadelta(p) = select(OptimizerKind::Adadelta, &config).config else {
            panic!("expected adadelta");
        };
        assert_eq!(p.rho, 0.9);
        assert_eq!(p.weight_decay, 0.0);

        let cg = select(OptimizerKind::Cg, &config).config;
        assert_eq!(cg.learning_rate(), None);
        assert_eq!(cg, OptimizerConfig::Cg(CgParams { max_iter: 20 }));
    }

    #[test]
    fn test_schedule_boundaries() {
        let schedule = Schedule::default_sgd();
        let row = schedule.lookup(8_000).unwrap();
        assert_eq!((row.learning_rate, row.weight_decay), (5e-4, 5e-5));
        let row = schedule.lookup(8_001).unwrap();
        assert_eq!((row.learning_rate, row.weight_decay), (1e-4, 1e-5));
        let row = schedule.lookup(100_000).unwrap();
        assert_eq!(row.end, None);
        assert_eq!(row.learning_rate, 5e-6);
        assert!(schedule.lookup(0).is_none());
    }

    #[test]
    fn test_apply_leaves_config_alone_without_match() {
        let schedule = Schedule::new(vec![ScheduleRow::new(10, Some(20), 0.5, 0.05)]).unwrap();
        let mut config = select(OptimizerKind::Sgd, &TrainConfig::default()).config;
        let before = config.clone();

        assert!(!schedule.apply(5, &mut config));
        assert_eq!(config, before);

        assert!(schedule.apply(15, &mut config));
        assert_eq!(config.learning_rate(), Some(0.5));
        assert_eq!(config.weight_decay(), Some(0.05));

        // no row covers 21: values from 15 persist
        assert!(!schedule.apply(21, &mut config));
        assert_eq!(config.learning_rate(), Some(0.5));
    }

    #[test]
    fn test_schedule_rejects_overlap() {
        let rows = vec![
            ScheduleRow::new(1, Some(100), 1e-3, 0.0),
            ScheduleRow::new(100, Some(200), 1e-4, 0.0),
        ];
        assert!(matches!(Schedule::new(rows), Err(TrainError::InvalidSchedule(_))));
    }

    #[test]
    fn test_schedule_rejects_open_row_before_others() {
        let rows = vec![
            ScheduleRow::new(1, None, 1e-3, 0.0),
            ScheduleRow::new(100, Some(200), 1e-4, 0.0),
        ];
        assert!(Schedule::new(rows).is_err());
    }

    #[test]
    fn test_config_serializes_with_strategy_tag() {
        let config = select(OptimizerKind::Cg, &TrainConfig::default()).config;
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json, serde_json::json!({"strategy": "CG", "max_iter": 20}));
    }
}
