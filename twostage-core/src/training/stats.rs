//! Loss histories and confusion tracking.

use crate::error::TrainError;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

/// The four loss terms of one objective evaluation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LossBreakdown {
    pub pnet_cls: f64,
    pub pnet_reg: f64,
    pub cnet_cls: f64,
    pub cnet_reg: f64,
}

impl LossBreakdown {
    pub fn total(&self) -> f64 {
        self.pnet_cls + self.pnet_reg + self.cnet_cls + self.cnet_reg
    }
}

/// Per-iteration loss history, persisted with every checkpoint.
///
/// A diverged run records `NaN` or infinite losses; these serialize as the
/// strings `"NaN"`, `"inf"` and `"-inf"`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingStats {
    #[serde(with = "loss_history")]
    pub pnet_cls: Vec<f64>,
    #[serde(with = "loss_history")]
    pub pnet_reg: Vec<f64>,
    #[serde(with = "loss_history")]
    pub cnet_cls: Vec<f64>,
    #[serde(with = "loss_history")]
    pub cnet_reg: Vec<f64>,
}

mod loss_history {
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    #[derive(Serialize, Deserialize)]
    #[serde(untagged)]
    enum Entry {
        Number(f64),
        Special(String),
    }

    fn encode(v: f64) -> Entry {
        if v.is_finite() {
            Entry::Number(v)
        } else if v.is_nan() {
            Entry::Special("NaN".into())
        } else if v > 0.0 {
            Entry::Special("inf".into())
        } else {
            Entry::Special("-inf".into())
        }
    }

    pub fn serialize<S: Serializer>(values: &[f64], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(values.iter().map(|v| encode(*v)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<f64>, D::Error> {
        Vec::<Entry>::deserialize(deserializer)?
            .into_iter()
            .map(|entry| match entry {
                Entry::Number(v) => Ok(v),
                Entry::Special(s) => match s.as_str() {
                    "NaN" => Ok(f64::NAN),
                    "inf" => Ok(f64::INFINITY),
                    "-inf" => Ok(f64::NEG_INFINITY),
                    other => Err(D::Error::custom(format!("unknown loss value {other:?}"))),
                },
            })
            .collect()
    }
}

impl TrainingStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, losses: &LossBreakdown) {
        self.pnet_cls.push(losses.pnet_cls);
        self.pnet_reg.push(losses.pnet_reg);
        self.cnet_cls.push(losses.cnet_cls);
        self.cnet_reg.push(losses.cnet_reg);
    }

    /// Completed iterations recorded.
    pub fn len(&self) -> usize {
        self.pnet_cls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pnet_cls.is_empty()
    }

    pub fn last(&self) -> Option<LossBreakdown> {
        Some(LossBreakdown {
            pnet_cls: *self.pnet_cls.last()?,
            pnet_reg: *self.pnet_reg.last()?,
            cnet_cls: *self.cnet_cls.last()?,
            cnet_reg: *self.cnet_reg.last()?,
        })
    }
}

/// Square count matrix, rows are actual classes and columns predictions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionAccumulator {
    classes: usize,
    counts: Vec<u64>,
}

impl ConfusionAccumulator {
    pub fn new(classes: usize) -> Self {
        Self {
            classes,
            counts: vec![0; classes * classes],
        }
    }

    pub fn classes(&self) -> usize {
        self.classes
    }

    pub fn add(&mut self, actual: usize, predicted: usize) -> Result<(), TrainError> {
        if actual >= self.classes || predicted >= self.classes {
            return Err(TrainError::invalid_input(format!(
                "confusion entry ({actual}, {predicted}) outside {} classes",
                self.classes
            )));
        }
        self.counts[actual * self.classes + predicted] += 1;
        Ok(())
    }

    pub fn add_all(&mut self, pairs: &[(usize, usize)]) -> Result<(), TrainError> {
        pairs.iter().try_for_each(|&(a, p)| self.add(a, p))
    }

    pub fn get(&self, actual: usize, predicted: usize) -> u64 {
        self.counts[actual * self.classes + predicted]
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }

    pub fn correct(&self) -> u64 {
        (0..self.classes).map(|c| self.get(c, c)).sum()
    }

    /// Fraction on the diagonal; 0 when nothing was counted.
    pub fn accuracy(&self) -> f64 {
        match self.total() {
            0 => 0.0,
            total => self.correct() as f64 / total as f64,
        }
    }

    pub fn reset(&mut self) {
        self.counts.iter_mut().for_each(|c| *c = 0);
    }

    pub fn is_zero(&self) -> bool {
        self.counts.iter().all(|&c| c == 0)
    }

    /// Plain-text dump, one row per actual class.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for actual in 0..self.classes {
            let row: Vec<String> = (0..self.classes)
                .map(|p| format!("{:>7}", self.get(actual, p)))
                .collect();
            let _ = writeln!(out, "{:>3} [{}]", actual, row.join(""));
        }
        let _ = writeln!(out, "accuracy: {:.2}%", self.accuracy() * 100.0);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_finite_losses_written_as_strings() {
        let mut stats = TrainingStats::new();
        stats.record(&LossBreakdown {
            pnet_cls: f64::INFINITY,
            pnet_reg: 1.0,
            ..Default::default()
        });
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["pnet_cls"], serde_json::json!(["inf"]));
        assert_eq!(json["pnet_reg"], serde_json::json!([1.0]));

        let bad = serde_json::json!({
            "pnet_cls": ["huge"], "pnet_reg": [], "cnet_cls": [], "cnet_reg": []
        });
        assert!(serde_json::from_value::<TrainingStats>(bad).is_err());
    }

    #[test]
    fn test_stats_append_in_lockstep() {
        let mut stats = TrainingStats::new();
        stats.record(&LossBreakdown {
            pnet_cls: 0.7,
            pnet_reg: 0.2,
            cnet_cls: 1.5,
            cnet_reg: 0.4,
        });
        stats.record(&LossBreakdown::default());
        assert_eq!(stats.len(), 2);
        assert_eq!(stats.cnet_cls, vec![1.5, 0.0]);
        assert_eq!(stats.last(), Some(LossBreakdown::default()));
    }

    #[test]
    fn test_loss_total() {
        let losses = LossBreakdown {
            pnet_cls: 1.0,
            pnet_reg: 0.5,
            cnet_cls: 0.25,
            cnet_reg: 0.25,
        };
        assert_eq!(losses.total(), 2.0);
    }

    #[test]
    fn test_confusion_accuracy_and_reset() {
        let mut confusion = ConfusionAccumulator::new(2);
        confusion.add_all(&[(0, 0), (1, 1), (1, 0), (1, 1)]).unwrap();
        assert_eq!(confusion.total(), 4);
        assert_eq!(confusion.get(1, 0), 1);
        assert_eq!(confusion.accuracy(), 0.75);

        confusion.reset();
        assert!(confusion.is_zero());
        assert_eq!(confusion.accuracy(), 0.0);
    }

    #[test]
    fn test_confusion_rejects_unknown_class() {
        let mut confusion = ConfusionAccumulator::new(3);
        assert!(confusion.add(3, 0).is_err());
        assert!(confusion.is_zero());
    }

    #[test]
    fn test_confusion_render_lists_every_row() {
        let mut confusion = ConfusionAccumulator::new(3);
        confusion.add(2, 2).unwrap();
        let dump = confusion.render();
        assert_eq!(dump.lines().count(), 4);
        assert!(dump.ends_with("accuracy: 100.00%\n"));
    }
}
