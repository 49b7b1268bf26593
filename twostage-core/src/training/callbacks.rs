//! Periodic triggers fired at the end of each training iteration.

use crate::training::stats::TrainingStats;

/// Action a callback can request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackAction {
    Continue,
    Evaluate,
    Checkpoint,
}

pub trait TrainingCallback {
    /// Called after the losses of `iteration` have been recorded.
    fn on_iteration_end(&mut self, iteration: usize, stats: &TrainingStats) -> CallbackAction;
}

fn tick(counter: &mut usize, every: usize) -> bool {
    *counter += 1;
    if *counter >= every {
        *counter = 0;
        true
    } else {
        false
    }
}

/// Requests an evaluation and report cycle every `every` iterations.
#[derive(Debug, Clone)]
pub struct EvaluationCallback {
    pub every: usize,
    counter: usize,
}

impl EvaluationCallback {
    pub fn new(every: usize) -> Self {
        Self { every, counter: 0 }
    }
}

impl TrainingCallback for EvaluationCallback {
    fn on_iteration_end(&mut self, iteration: usize, stats: &TrainingStats) -> CallbackAction {
        if tick(&mut self.counter, self.every) {
            let loss = stats.last().map(|l| l.total());
            tracing::debug!(iteration, loss = ?loss, "Evaluation cycle due");
            CallbackAction::Evaluate
        } else {
            CallbackAction::Continue
        }
    }
}

/// Requests a checkpoint every `every` iterations.
#[derive(Debug, Clone)]
pub struct CheckpointCallback {
    pub every: usize,
    counter: usize,
}

impl CheckpointCallback {
    pub fn new(every: usize) -> Self {
        Self { every, counter: 0 }
    }
}

impl TrainingCallback for CheckpointCallback {
    fn on_iteration_end(&mut self, iteration: usize, stats: &TrainingStats) -> CallbackAction {
        if tick(&mut self.counter, self.every) {
            tracing::debug!(iteration, recorded = stats.len(), "Checkpoint due");
            CallbackAction::Checkpoint
        } else {
            CallbackAction::Continue
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::training::stats::LossBreakdown;

    #[test]
    fn test_evaluation_cadence() {
        let stats = TrainingStats::new();
        let mut cb = EvaluationCallback::new(3);
        let fired: Vec<usize> = (1..=9)
            .filter(|&i| cb.on_iteration_end(i, &stats) == CallbackAction::Evaluate)
            .collect();
        assert_eq!(fired, vec![3, 6, 9]);
    }

    #[test]
    fn test_checkpoint_every_iteration() {
        let stats = TrainingStats::new();
        let mut cb = CheckpointCallback::new(1);
        for i in 1..=4 {
            assert_eq!(cb.on_iteration_end(i, &stats), CallbackAction::Checkpoint);
        }
    }

    #[test]
    fn test_cadence_with_recorded_losses() {
        let mut stats = TrainingStats::new();
        stats.record(&LossBreakdown {
            pnet_cls: 0.4,
            ..Default::default()
        });
        let mut eval = EvaluationCallback::new(1);
        let mut ckpt = CheckpointCallback::new(2);
        assert_eq!(eval.on_iteration_end(1, &stats), CallbackAction::Evaluate);
        assert_eq!(ckpt.on_iteration_end(1, &stats), CallbackAction::Continue);
        assert_eq!(ckpt.on_iteration_end(2, &stats), CallbackAction::Checkpoint);
    }

    #[test]
    fn test_checkpoint_waits_for_interval() {
        let stats = TrainingStats::new();
        let mut cb = CheckpointCallback::new(10_000);
        assert_eq!(cb.on_iteration_end(1, &stats), CallbackAction::Continue);
    }
}
