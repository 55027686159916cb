#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    rust_2018_idioms
)]

//! Offline learning pipeline for scheduler experiments: collect per-run CSV
//! samples, split them, preprocess and scale, then fit and score random-forest
//! regressors that predict the one-minute load average.

/// Error type shared by every stage.
#[path = "../error.rs"]
pub mod error;

/// Pipeline configuration (paths, split, features, forest, training, logging).
#[path = "../config.rs"]
pub mod config;

/// Column-oriented table with CSV I/O.
#[path = "../frame.rs"]
pub mod frame;

/// Structured logging and event emission for the stages.
#[path = "../telemetry.rs"]
pub mod telemetry;

/// Raw CSV collection.
#[path = "../collector.rs"]
pub mod collector;

/// Seeded train/validation/test split.
#[path = "../splitter.rs"]
pub mod splitter;

/// Feature engineering, alignment and scaling.
#[path = "../preprocessing/main.rs"]
pub mod preprocessing;

/// Forest regressor, training and evaluation.
#[path = "../ML/main.rs"]
pub mod classical_ml;

/// Stage orchestration entry point.
#[path = "../main.rs"]
pub mod orchestration_entry;

pub use classical_ml::{
    artifact::ModelArtifact,
    evaluator::{evaluate, evaluate_frame, EvaluationReport, Regressor},
    features::FeatureMatrix,
    forest::{ForestParams, ForestRegressor},
    trainer::{RunRecord, TrainedModel, Trainer, TrainingOutcome},
};
pub use collector::{CollectReport, Collector};
pub use config::{PipelineConfig, SplitRatios, TrainingMode};
pub use error::{PipelineError, Result};
pub use frame::{Column, Frame};
pub use orchestration_entry::{runtime_from_file, EvaluationSummary, PipelineRuntime, RunSummary};
pub use preprocessing::{
    categories::{CategoryPreview, Resource, Scheduler},
    scaler::StandardScaler,
    PreprocessReport, PreprocessedSplits, Preprocessor,
};
pub use splitter::{Partition, SplitReport, SplitSet, Splitter};
pub use telemetry::{PipelineTelemetry, PipelineTelemetryBuilder};
