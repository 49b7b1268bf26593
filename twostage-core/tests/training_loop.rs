//! End-to-end training runs against in-memory network stand-ins.

use std::path::PathBuf;

use tempfile::TempDir;
use twostage_core::data::{Batch, BatchSource, Sample};
use twostage_core::eval::matching::{
    BoundingBox, Detection, GroundTruthEntry, GroundTruthInstance,
};
use twostage_core::eval::runner::Detector;
use twostage_core::report::HtmlReporter;
use twostage_core::training::{
    Checkpoint, CheckpointStore, Collaborators, LoopState, LossBreakdown, NetworkView, Objective,
    ObjectiveEvaluator, ParameterStore, SubNetwork, TrainingLoop, TrainingMode,
};
use twostage_core::{TrainConfig, TrainError};

/// Least squares towards `target` for every weight.
struct Regression {
    target: f32,
    calls: usize,
}

impl ObjectiveEvaluator for Regression {
    fn evaluate(&mut self, view: &NetworkView<'_>) -> Result<Objective, TrainError> {
        self.calls += 1;
        let target = self.target;
        let sq = |s: &[f32]| -> f64 { s.iter().map(|w| ((w - target) as f64).powi(2)).sum() };
        Ok(Objective {
            gradient: view.weights().iter().map(|w| 2.0 * (w - target)).collect(),
            losses: LossBreakdown {
                pnet_reg: sq(view.proposal_weights()),
                cnet_reg: sq(view.classification_weights()),
                ..Default::default()
            },
            proposal_predictions: vec![(1, 1), (0, 0)],
            classification_predictions: vec![(3, 3)],
        })
    }
}

/// Predicts class 3 everywhere, scored against one class-3 object per image.
struct OneBox;

impl Detector for OneBox {
    fn detect(
        &mut self,
        _sample: &Sample,
        _view: &NetworkView<'_>,
    ) -> Result<Vec<Detection>, TrainError> {
        Ok(vec![
            Detection::new(BoundingBox::new(0.0, 0.0, 8.0, 8.0), 3, 0.8),
            Detection::new(BoundingBox::new(0.0, 0.0, 8.0, 8.0), 1, 0.0),
        ])
    }
}

fn object() -> GroundTruthEntry {
    GroundTruthInstance::new(BoundingBox::new(0.0, 0.0, 8.0, 8.0), 3).into()
}

struct Images {
    validation_calls: usize,
}

impl BatchSource for Images {
    fn next_training(&mut self, tag: &str) -> Result<Batch, TrainError> {
        Ok(Batch::new(vec![Sample {
            id: format!("{tag}-0"),
            image: PathBuf::from("train/0.jpg"),
            rois: vec![],
            positives: vec![object()],
        }]))
    }

    fn next_validation(&mut self, n: usize) -> Result<Batch, TrainError> {
        self.validation_calls += 1;
        Ok(Batch::new(
            (0..n)
                .map(|i| Sample {
                    id: format!("val-{i}"),
                    image: PathBuf::from(format!("val/{i}.jpg")),
                    rois: vec![object()],
                    positives: vec![],
                })
                .collect(),
        ))
    }
}

fn base_config(dir: &TempDir) -> TrainConfig {
    TrainConfig {
        optimizer: "LBFGS".into(),
        learning_rate: 1.0,
        max_iter: 3,
        iterations: 4,
        plot: 2,
        snapshot: 2,
        validation_samples: 5,
        classes: 4,
        result_dir: dir.path().to_path_buf(),
        experiment: "it".into(),
        ..Default::default()
    }
}

#[test]
fn test_full_run_writes_checkpoints_and_report() {
    let dir = TempDir::new().unwrap();
    let mut evaluator = Regression { target: 0.5, calls: 0 };
    let mut detector = OneBox;
    let mut source = Images { validation_calls: 0 };
    let mut reporter = HtmlReporter::new(dir.path().to_path_buf());

    let mut training = TrainingLoop::init(
        base_config(&dir),
        ParameterStore::zeros(3, 3),
        Collaborators {
            evaluator: &mut evaluator,
            detector: &mut detector,
            source: &mut source,
            annotator: None,
            plotter: None,
            reporters: vec![&mut reporter],
        },
    )
    .unwrap();
    let outcome = training.run().unwrap();
    assert_eq!(training.state(), LoopState::Terminated);
    assert_eq!(training.context().stats.len(), 4);
    let final_loss = training.context().stats.last().unwrap();
    assert!(final_loss.pnet_reg + final_loss.cnet_reg < 1.5);
    drop(training);

    assert_eq!(source.validation_calls, 2);
    assert!((outcome.last_map_percent.unwrap() - 100.0).abs() < 1e-9);

    let ckpts = CheckpointStore::new(dir.path().to_path_buf(), "it");
    let saved: Vec<usize> = ckpts.list().unwrap().into_iter().map(|(i, _)| i).collect();
    assert_eq!(saved, vec![2, 4]);
    assert_eq!(outcome.last_checkpoint, Some(dir.path().join("it_000004.json")));

    let report = std::fs::read_to_string(dir.path().join("it_report.html")).unwrap();
    assert!(report.contains("Iteration 4"));
}

#[test]
fn test_only_cnet_warm_start_from_previous_run() {
    let dir = TempDir::new().unwrap();
    let ckpts = CheckpointStore::new(dir.path().join("earlier"), "prev");
    let pnet_source = ParameterStore::new(vec![0.1, 0.2, 0.3], vec![9.0; 3]);
    let pnet_path = ckpts
        .save("r0", 100, TrainingMode::OnlyPnet, &pnet_source, &Default::default())
        .unwrap();

    let mut evaluator = Regression { target: 0.5, calls: 0 };
    let mut detector = OneBox;
    let mut source = Images { validation_calls: 0 };
    let config = TrainConfig {
        mode: TrainingMode::OnlyCnet,
        optimizer: "rmsprop".into(),
        learning_rate: 0.01,
        single_batch: true,
        pnet_snapshot: Some(pnet_path),
        ..base_config(&dir)
    };

    let mut training = TrainingLoop::init(
        config,
        ParameterStore::zeros(3, 3),
        Collaborators {
            evaluator: &mut evaluator,
            detector: &mut detector,
            source: &mut source,
            annotator: None,
            plotter: None,
            reporters: vec![],
        },
    )
    .unwrap();
    let outcome = training.run().unwrap();
    let store = &training.context().store;
    assert_eq!(store.slice(SubNetwork::Proposal), &[0.1, 0.2, 0.3]);
    assert!(store.slice(SubNetwork::Classification).iter().all(|w| *w > 0.0));
    assert_eq!(
        training.frozen_proposal().unwrap().weights(),
        &[0.1, 0.2, 0.3]
    );
    drop(training);

    // single-batch mode never draws validation samples
    assert_eq!(source.validation_calls, 0);
    assert!((outcome.last_map_percent.unwrap() - 100.0).abs() < 1e-9);

    let last = Checkpoint::load(&outcome.last_checkpoint.unwrap()).unwrap();
    assert_eq!(last.mode, TrainingMode::OnlyCnet);
    assert_eq!(last.stats.unwrap().len(), 4);
}

#[test]
fn test_missing_warm_start_checkpoint_fails_init() {
    let dir = TempDir::new().unwrap();
    let mut evaluator = Regression { target: 0.5, calls: 0 };
    let mut detector = OneBox;
    let mut source = Images { validation_calls: 0 };
    let config = TrainConfig {
        cnet_snapshot: Some(dir.path().join("missing.json")),
        ..base_config(&dir)
    };

    let result = TrainingLoop::init(
        config,
        ParameterStore::zeros(3, 3),
        Collaborators {
            evaluator: &mut evaluator,
            detector: &mut detector,
            source: &mut source,
            annotator: None,
            plotter: None,
            reporters: vec![],
        },
    );
    assert!(matches!(result, Err(TrainError::Checkpoint(_))));
}
