//! Mutable state owned by one training run.

use crate::error::TrainError;
use crate::training::params::ParameterStore;
use crate::training::stats::{ConfusionAccumulator, LossBreakdown, TrainingStats};

/// Region proposals are scored as object vs. background.
pub const PROPOSAL_CLASSES: usize = 2;

#[derive(Debug, Clone)]
pub struct TrainingContext {
    pub store: ParameterStore,
    pub stats: TrainingStats,
    pub proposal_confusion: ConfusionAccumulator,
    pub classification_confusion: ConfusionAccumulator,
}

impl TrainingContext {
    pub fn new(store: ParameterStore, stats: TrainingStats, classes: usize) -> Self {
        Self {
            store,
            stats,
            proposal_confusion: ConfusionAccumulator::new(PROPOSAL_CLASSES),
            classification_confusion: ConfusionAccumulator::new(classes),
        }
    }

    /// Fold one objective evaluation into the run history.
    pub fn record(
        &mut self,
        losses: &LossBreakdown,
        proposal_predictions: &[(usize, usize)],
        classification_predictions: &[(usize, usize)],
    ) -> Result<(), TrainError> {
        self.stats.record(losses);
        self.proposal_confusion.add_all(proposal_predictions)?;
        self.classification_confusion
            .add_all(classification_predictions)?;
        Ok(())
    }

    pub fn reset_confusion(&mut self) {
        self.proposal_confusion.reset();
        self.classification_confusion.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_reset() {
        let mut ctx = TrainingContext::new(ParameterStore::zeros(1, 1), TrainingStats::new(), 3);
        ctx.record(&LossBreakdown::default(), &[(1, 1), (0, 1)], &[(2, 2)])
            .unwrap();
        assert_eq!(ctx.stats.len(), 1);
        assert_eq!(ctx.proposal_confusion.accuracy(), 0.5);
        assert_eq!(ctx.classification_confusion.total(), 1);

        ctx.reset_confusion();
        assert!(ctx.proposal_confusion.is_zero());
        assert!(ctx.classification_confusion.is_zero());
        assert_eq!(ctx.stats.len(), 1);
    }

    #[test]
    fn test_out_of_range_prediction_is_rejected() {
        let mut ctx = TrainingContext::new(ParameterStore::zeros(1, 1), TrainingStats::new(), 3);
        assert!(ctx.record(&LossBreakdown::default(), &[(2, 0)], &[]).is_err());
    }
}
