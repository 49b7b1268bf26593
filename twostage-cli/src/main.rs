//! twostage CLI: offline scoring and schedule inspection for detector training.

mod commands;

use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};
use twostage_core::TrainingMode;

/// Score recorded detections and inspect training configuration
#[derive(Parser, Debug)]
#[command(name = "twostage", version, about, long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "twostage.toml")]
    config: PathBuf,

    /// Override the configured seed
    #[arg(long)]
    seed: Option<u64>,

    /// Override the configured result directory
    #[arg(long)]
    result_dir: Option<PathBuf>,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Score a file of recorded detections
    Evaluate {
        /// JSON recording of samples, ground truth and detections
        recording: PathBuf,

        /// Score every sample against its positives instead of sampling
        #[arg(long)]
        single_batch: bool,

        /// Training mode to score under (onlyPnet skips scoring)
        #[arg(long)]
        mode: Option<TrainingMode>,

        /// Print the full summary as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show the hyperparameters an optimizer uses at an iteration
    Schedule {
        /// Strategy name: CG, LBFGS, sgd, rmsprop, adagrad, adam, adadelta
        #[arg(long, default_value = "sgd")]
        optimizer: String,

        /// Iteration to inspect (1-based)
        #[arg(long, default_value_t = 1)]
        iteration: usize,
    },
    /// Print the resolved configuration as TOML
    Config,
}

fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    // Set up tracing: human-readable stderr + JSON file logging
    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::new(filter));

    let log_dir = directories::ProjectDirs::from("dev", "twostage", "twostage")
        .map(|d| d.data_dir().join("logs"))
        .unwrap_or_else(|| PathBuf::from("."));
    let _ = std::fs::create_dir_all(&log_dir);
    let file_appender = tracing_appender::rolling::daily(&log_dir, "twostage.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::new("debug"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let overrides = twostage_core::config::ConfigOverrides {
        seed: cli.seed,
        result_dir: cli.result_dir.clone(),
        ..Default::default()
    };
    let config = twostage_core::config::load_config(Some(&cli.config), Some(&overrides))
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;

    commands::handle_command(cli.command, config)
}
