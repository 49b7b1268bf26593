//! The training loop state machine.

use crate::config::TrainConfig;
use crate::data::BatchSource;
use crate::error::TrainError;
use crate::eval::runner::{Annotator, Detector, EvaluationRunner};
use crate::report::{ProgressPlotter, ReportCycle, Reporter};
use crate::training::callbacks::{
    CallbackAction, CheckpointCallback, EvaluationCallback, TrainingCallback,
};
use crate::training::checkpoint::CheckpointStore;
use crate::training::context::TrainingContext;
use crate::training::mode::{TrainingMode, TrainingModeController, WarmStart};
use crate::training::optim::ObjectiveFn;
use crate::training::params::{FrozenProposal, NetworkView, ParameterStore};
use crate::training::stats::LossBreakdown;
use crate::training::strategy::{OptimizerConfig, SelectedStrategy, select_by_name};
use serde::{Deserialize, Serialize};
use std::ops::Range;
use std::path::PathBuf;

/// One forward/backward pass of both sub-networks on a training batch.
#[derive(Debug, Clone, Default)]
pub struct Objective {
    /// Gradient over the full flat buffer.
    pub gradient: Vec<f32>,
    pub losses: LossBreakdown,
    /// `(actual, predicted)` object/background pairs from the proposal stage.
    pub proposal_predictions: Vec<(usize, usize)>,
    /// `(actual, predicted)` class pairs from the classification stage.
    pub classification_predictions: Vec<(usize, usize)>,
}

pub trait ObjectiveEvaluator {
    fn evaluate(&mut self, view: &NetworkView<'_>) -> Result<Objective, TrainError>;
}

/// External pieces the loop drives.
pub struct Collaborators<'a> {
    pub evaluator: &'a mut dyn ObjectiveEvaluator,
    pub detector: &'a mut dyn Detector,
    pub source: &'a mut dyn BatchSource,
    pub annotator: Option<&'a mut dyn Annotator>,
    pub plotter: Option<&'a mut dyn ProgressPlotter>,
    pub reporters: Vec<&'a mut dyn Reporter>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoopState {
    Init,
    Running,
    PeriodicEvaluate,
    PeriodicSnapshot,
    Terminated,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingOutcome {
    pub run_id: String,
    pub iterations: usize,
    /// mAP of the last evaluation cycle, if one ran.
    pub last_map_percent: Option<f64>,
    pub last_checkpoint: Option<PathBuf>,
}

pub struct TrainingLoop<'a> {
    config: TrainConfig,
    run_id: String,
    mode: TrainingMode,
    state: LoopState,
    context: TrainingContext,
    frozen: Option<FrozenProposal>,
    strategy: SelectedStrategy,
    trainable: Vec<Range<usize>>,
    frozen_ranges: Vec<Range<usize>>,
    evaluation: EvaluationRunner,
    checkpoints: CheckpointStore,
    evaluation_cadence: EvaluationCallback,
    checkpoint_cadence: CheckpointCallback,
    collaborators: Collaborators<'a>,
}

/// Parts of `0..total` not covered by `ranges`, which must be sorted.
fn complement(total: usize, ranges: &[Range<usize>]) -> Vec<Range<usize>> {
    let mut out = Vec::new();
    let mut cursor = 0;
    for r in ranges {
        if r.start > cursor {
            out.push(cursor..r.start);
        }
        cursor = cursor.max(r.end);
    }
    if cursor < total {
        out.push(cursor..total);
    }
    out
}

impl<'a> TrainingLoop<'a> {
    /// Resolve the strategy, warm-start the store and build the evaluator.
    ///
    /// An unknown optimizer name stops here, before any weights move.
    pub fn init(
        config: TrainConfig,
        mut store: ParameterStore,
        mut collaborators: Collaborators<'a>,
    ) -> Result<Self, TrainError> {
        config.validate()?;
        let strategy = select_by_name(&config.optimizer, &config)?;
        let mode = config.mode;

        let prepared = TrainingModeController::new(mode).prepare(
            &mut store,
            &WarmStart {
                pnet: config.pnet_snapshot.clone(),
                cnet: config.cnet_snapshot.clone(),
            },
        )?;

        let trainable = mode.trainable_ranges(store.layout());
        let frozen_ranges = complement(store.len(), &trainable);
        let context =
            TrainingContext::new(store, prepared.stats.unwrap_or_default(), config.classes);

        let evaluation = EvaluationRunner::from_config(&config, &mut *collaborators.source)?;
        let checkpoints = CheckpointStore::new(config.result_dir.clone(), &config.experiment);
        let run_id = uuid::Uuid::new_v4().to_string();

        tracing::info!(
            run_id = %run_id,
            optimizer = %strategy.config.kind(),
            mode = %mode,
            iterations = config.iterations,
            weights = context.store.len(),
            "Training loop initialised"
        );

        Ok(Self {
            evaluation_cadence: EvaluationCallback::new(config.plot),
            checkpoint_cadence: CheckpointCallback::new(config.snapshot),
            config,
            run_id,
            mode,
            state: LoopState::Init,
            context,
            frozen: prepared.frozen_proposal,
            strategy,
            trainable,
            frozen_ranges,
            evaluation,
            checkpoints,
            collaborators,
        })
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn context(&self) -> &TrainingContext {
        &self.context
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn mode(&self) -> TrainingMode {
        self.mode
    }

    pub fn frozen_proposal(&self) -> Option<&FrozenProposal> {
        self.frozen.as_ref()
    }

    /// Hyperparameters as of the last completed iteration.
    pub fn optimizer_config(&self) -> &OptimizerConfig {
        &self.strategy.config
    }

    pub fn into_context(self) -> TrainingContext {
        self.context
    }

    /// Run every iteration. The loop ends in `Terminated` whether or not an
    /// error aborted it.
    pub fn run(&mut self) -> Result<TrainingOutcome, TrainError> {
        let result = self.run_iterations();
        self.state = LoopState::Terminated;
        match &result {
            Ok(outcome) => tracing::info!(
                run_id = %self.run_id,
                iterations = outcome.iterations,
                map = ?outcome.last_map_percent,
                "Training finished"
            ),
            Err(e) => tracing::error!(run_id = %self.run_id, error = %e, "Training aborted"),
        }
        result
    }

    fn run_iterations(&mut self) -> Result<TrainingOutcome, TrainError> {
        let mut last_map_percent = None;
        let mut last_checkpoint = None;

        for iteration in 1..=self.config.iterations {
            self.state = LoopState::Running;
            self.train_step(iteration)?;

            let stats = &self.context.stats;
            let evaluate = self.evaluation_cadence.on_iteration_end(iteration, stats)
                == CallbackAction::Evaluate;
            let snapshot = self.checkpoint_cadence.on_iteration_end(iteration, stats)
                == CallbackAction::Checkpoint;

            if evaluate {
                self.state = LoopState::PeriodicEvaluate;
                last_map_percent = Some(self.evaluation_cycle(iteration)?);
            }
            if snapshot {
                self.state = LoopState::PeriodicSnapshot;
                last_checkpoint = Some(self.checkpoints.save(
                    &self.run_id,
                    iteration,
                    self.mode,
                    &self.context.store,
                    &self.context.stats,
                )?);
            }
        }

        Ok(TrainingOutcome {
            run_id: self.run_id.clone(),
            iterations: self.config.iterations,
            last_map_percent,
            last_checkpoint,
        })
    }

    fn train_step(&mut self, iteration: usize) -> Result<(), TrainError> {
        if let Some(schedule) = &self.strategy.schedule
            && schedule.apply(iteration, &mut self.strategy.config)
        {
            tracing::trace!(
                iteration,
                lr = ?self.strategy.config.learning_rate(),
                "Schedule applied"
            );
        }

        let layout = self.context.store.layout().clone();
        let frozen = self.frozen.as_ref();
        let frozen_ranges = &self.frozen_ranges;
        let evaluator = &mut *self.collaborators.evaluator;
        let mut first: Option<Objective> = None;

        let mut objective = |weights: &[f32]| -> Result<(f64, Vec<f32>), TrainError> {
            let view = NetworkView::from_raw(weights, &layout, frozen);
            let mut evaluated = evaluator.evaluate(&view)?;
            for range in frozen_ranges {
                if let Some(entries) = evaluated.gradient.get_mut(range.clone()) {
                    entries.fill(0.0);
                }
            }
            let loss = evaluated.losses.total();
            let gradient = std::mem::take(&mut evaluated.gradient);
            if first.is_none() {
                first = Some(evaluated);
            }
            Ok((loss, gradient))
        };
        let objective: &mut ObjectiveFn<'_> = &mut objective;

        let loss = self.strategy.optimizer.step(
            self.context.store.weights_mut(),
            &self.trainable,
            &self.strategy.config,
            objective,
        )?;

        let first = first.ok_or_else(|| {
            TrainError::training(format!(
                "{} step finished without evaluating the objective",
                self.strategy.config.kind()
            ))
        })?;
        self.context.record(
            &first.losses,
            &first.proposal_predictions,
            &first.classification_predictions,
        )?;
        tracing::debug!(iteration, loss, "Iteration complete");
        Ok(())
    }

    fn evaluation_cycle(&mut self, iteration: usize) -> Result<f64, TrainError> {
        tracing::info!(
            iteration,
            proposal_accuracy = self.context.proposal_confusion.accuracy() * 100.0,
            classification_accuracy = self.context.classification_confusion.accuracy() * 100.0,
            "Training accuracy"
        );

        if let Some(plotter) = self.collaborators.plotter.as_deref_mut()
            && let Err(e) = plotter.plot(&self.context.stats, &self.config.result_dir)
        {
            tracing::warn!(iteration, error = %e, "Plotting failed");
        }

        let view = self.context.store.view(self.frozen.as_ref());
        let annotator = self
            .collaborators
            .annotator
            .as_mut()
            .map(|a| &mut **a as &mut dyn Annotator);
        let summary = self.evaluation.evaluate(
            self.mode,
            &view,
            &mut *self.collaborators.detector,
            &mut *self.collaborators.source,
            annotator,
        )?;

        let cycle = ReportCycle {
            experiment: &self.config.experiment,
            iteration,
            mode: self.mode,
            summary: &summary,
            stats: &self.context.stats,
            proposal_confusion: &self.context.proposal_confusion,
            classification_confusion: &self.context.classification_confusion,
        };
        for reporter in self.collaborators.reporters.iter_mut() {
            if let Err(e) = reporter.report(&cycle) {
                tracing::warn!(iteration, error = %e, "Report failed");
            }
        }

        self.context.reset_confusion();
        Ok(summary.map_percent)
    }
}
