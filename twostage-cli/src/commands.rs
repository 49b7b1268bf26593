//! CLI subcommand handlers.

use crate::Commands;
use std::path::Path;
use twostage_core::config::TrainConfig;
use twostage_core::data::BatchSource;
use twostage_core::eval::{EvaluationRunner, EvaluationSummary, SamplingPolicy};
use twostage_core::training::ParameterStore;
use twostage_core::training::strategy::{OptimizerConfig, OptimizerKind, select};
use twostage_core::{RecordedDetections, TrainingMode};

/// Handle a CLI subcommand.
pub fn handle_command(command: Commands, config: TrainConfig) -> anyhow::Result<()> {
    match command {
        Commands::Evaluate {
            recording,
            single_batch,
            mode,
            json,
        } => {
            let mode = mode.unwrap_or(config.mode);
            let summary = evaluate_recording(&recording, &config, single_batch, mode)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                print!("{}", describe_summary(&summary));
            }
            Ok(())
        }
        Commands::Schedule {
            optimizer,
            iteration,
        } => {
            let kind: OptimizerKind = optimizer.parse()?;
            let effective = effective_hyperparameters(kind, iteration, &config);
            println!("# {kind} at iteration {iteration}");
            println!("{}", toml::to_string_pretty(&effective)?);
            Ok(())
        }
        Commands::Config => {
            println!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

/// Run one evaluation cycle over a recording, with no network weights involved.
pub fn evaluate_recording(
    path: &Path,
    config: &TrainConfig,
    single_batch: bool,
    mode: TrainingMode,
) -> anyhow::Result<EvaluationSummary> {
    let recorded = RecordedDetections::load(path, config.seed)?;
    tracing::info!(path = %path.display(), samples = recorded.len(), "Scoring recording");
    let (mut source, mut detector) = recorded.split();

    let policy = if single_batch {
        SamplingPolicy::SingleBatch(source.next_training("eval")?)
    } else {
        SamplingPolicy::RandomSampling {
            samples: config.validation_samples,
        }
    };
    let store = ParameterStore::zeros(0, 0);
    let summary = EvaluationRunner::new(policy).evaluate(
        mode,
        &store.view(None),
        &mut detector,
        &mut source,
        None,
    )?;
    Ok(summary)
}

/// Hyperparameters `kind` runs with at `iteration` after its schedule.
pub fn effective_hyperparameters(
    kind: OptimizerKind,
    iteration: usize,
    config: &TrainConfig,
) -> OptimizerConfig {
    let mut selected = select(kind, config);
    if let Some(schedule) = &selected.schedule {
        schedule.apply(iteration, &mut selected.config);
    }
    selected.config
}

pub fn describe_summary(summary: &EvaluationSummary) -> String {
    let tp: usize = summary.results.iter().map(|r| r.tp).sum();
    let fp: usize = summary.results.iter().map(|r| r.fp).sum();
    let npos: usize = summary.results.iter().map(|r| r.npos).sum();
    let fmt_ap = |ap: Option<f64>| ap.map_or_else(|| "n/a".to_string(), |v| format!("{v:.4}"));

    let mut out = String::new();
    out.push_str(&format!("mode:          {}\n", summary.mode));
    out.push_str(&format!("samples:       {}\n", summary.sample_ids.len()));
    out.push_str(&format!("tp / fp / pos: {tp} / {fp} / {npos}\n"));
    out.push_str(&format!("11-point AP:   {}\n", fmt_ap(summary.eleven_point_ap)));
    out.push_str(&format!("VOC AP:        {}\n", fmt_ap(summary.voc_ap)));
    out.push_str(&format!("mAP:           {:.2}%\n", summary.map_percent));
    out
}
