use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use scx_learning::{PipelineConfig, PipelineRuntime, PipelineTelemetry, TrainingMode};
use serde::Serialize;
use shared_event_bus::FileEventPublisher;
use shared_logging::LogLevel;

#[derive(Parser, Debug)]
#[command(
    name = "trn",
    version,
    about = "Scheduler load-average learning pipeline"
)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug)]
struct GlobalArgs {
    /// TOML configuration file; built-in defaults when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Directory holding the raw per-experiment CSVs.
    #[arg(long, global = true)]
    raw_dir: Option<PathBuf>,
    /// Directory for combined, split and preprocessed CSVs.
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
    /// Directory for model artifacts and the run manifest.
    #[arg(long, global = true)]
    model_dir: Option<PathBuf>,
    /// Split seed.
    #[arg(long, global = true)]
    seed: Option<u64>,
    /// Column to predict.
    #[arg(long, global = true)]
    target: Option<String>,
    /// Train one model per scheduler, e.g. `PRIORITY,RR`.
    #[arg(long, global = true, value_delimiter = ',')]
    per_scheduler: Option<Vec<String>>,
    /// Number of trees.
    #[arg(long, global = true)]
    n_estimators: Option<usize>,
    /// Minimum log level written to the log file.
    #[arg(long, global = true)]
    log_level: Option<LogLevel>,
    /// Append stage events as JSON lines to this file.
    #[arg(long, global = true)]
    event_log: Option<PathBuf>,
    /// Print reports as JSON instead of text.
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Merges the raw CSVs into the combined dataset.
    Collect,
    /// Splits the combined dataset into train/val/test.
    Split,
    /// Cleans, encodes, aligns and scales the partitions.
    Preprocess,
    /// Fits and saves the forest model(s), then scores them.
    Train,
    /// Scores saved model(s) on validation and test.
    Evaluate,
    /// Shows scheduler/resource extraction on the combined dataset.
    Inspect {
        /// Rows to preview.
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Runs collect, split, preprocess and train.
    Run,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli.global)?;
    let telemetry = build_telemetry(&config, &cli.global)?;
    let runtime = PipelineRuntime::new(config)
        .context("invalid pipeline configuration")?
        .with_telemetry(telemetry);
    let json = cli.global.json;
    match cli.command {
        Commands::Collect => {
            let report = runtime.collect().context("collect stage failed")?;
            emit(json, &report, report.summary())
        }
        Commands::Split => {
            let report = runtime.split().context("split stage failed")?;
            emit(json, &report, report.summary())
        }
        Commands::Preprocess => {
            let report = runtime.preprocess().context("preprocess stage failed")?;
            emit(json, &report, report.summary())
        }
        Commands::Train => {
            let outcome = runtime.train().context("train stage failed")?;
            emit(json, &outcome, outcome.summary())
        }
        Commands::Evaluate => {
            let summary = runtime.evaluate().context("evaluate stage failed")?;
            emit(json, &summary, summary.summary())
        }
        Commands::Inspect { limit } => {
            let preview = runtime.inspect(limit).context("inspect failed")?;
            emit(json, &preview, preview.render())
        }
        Commands::Run => {
            let summary = runtime.run_all().context("pipeline run failed")?;
            emit(json, &summary, summary.summary())
        }
    }
}

fn load_config(args: &GlobalArgs) -> Result<PipelineConfig> {
    let mut config = match &args.config {
        Some(path) => PipelineConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => PipelineConfig::default(),
    };
    if let Some(dir) = &args.raw_dir {
        config.paths.raw_dir.clone_from(dir);
    }
    if let Some(dir) = &args.data_dir {
        config.paths.data_dir.clone_from(dir);
    }
    if let Some(dir) = &args.model_dir {
        config.paths.model_dir.clone_from(dir);
    }
    if let Some(seed) = args.seed {
        config.split.seed = seed;
    }
    if let Some(target) = &args.target {
        config.features.target.clone_from(target);
    }
    if let Some(categories) = &args.per_scheduler {
        config.training.mode = TrainingMode::PerScheduler {
            categories: categories
                .iter()
                .map(|cat| cat.trim().to_uppercase())
                .filter(|cat| !cat.is_empty())
                .collect(),
        };
    }
    if let Some(trees) = args.n_estimators {
        config.forest.n_estimators = trees;
    }
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }
    Ok(config)
}

fn build_telemetry(config: &PipelineConfig, args: &GlobalArgs) -> Result<PipelineTelemetry> {
    let log_path = config.paths.log_dir.join(&config.logging.file);
    let mut builder = PipelineTelemetry::builder("trn")
        .log_path(&log_path)
        .min_level(config.logging.level);
    if let Some(path) = &args.event_log {
        let publisher = FileEventPublisher::new(path)
            .with_context(|| format!("opening event log {}", path.display()))?;
        builder = builder.event_publisher(Arc::new(publisher));
    }
    builder
        .build()
        .with_context(|| format!("opening log file {}", log_path.display()))
}

fn emit<T: Serialize>(json: bool, value: &T, text: String) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        println!("{text}");
    }
    Ok(())
}
