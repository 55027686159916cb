//! Stage orchestration over one validated configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use shared_logging::LogLevel;

use crate::{
    classical_ml::{
        artifact::ModelArtifact,
        evaluator::EvaluationReport,
        trainer::{score_partition, TrainedModel, Trainer, TrainingOutcome},
    },
    collector::{CollectReport, Collector},
    config::PipelineConfig,
    error::Result,
    frame::Frame,
    preprocessing::{categories::CategoryPreview, PreprocessReport, Preprocessor},
    splitter::{Partition, SplitReport, SplitSet, Splitter},
    telemetry::{self, PipelineTelemetry},
};

/// Scores of previously saved models.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationSummary {
    /// One entry per artifact, in category order.
    pub models: Vec<TrainedModel>,
}

impl EvaluationSummary {
    /// Every score block.
    pub fn reports(&self) -> impl Iterator<Item = &EvaluationReport> {
        self.models
            .iter()
            .flat_map(|model| model.validation.iter().chain(model.test.iter()))
    }

    /// Console summary.
    #[must_use]
    pub fn summary(&self) -> String {
        self.reports()
            .map(EvaluationReport::summary)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Reports of a full collect → split → preprocess → train run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    /// Collection step.
    pub collect: CollectReport,
    /// Split step.
    pub split: SplitReport,
    /// Preprocessing step.
    pub preprocess: PreprocessReport,
    /// Training and scoring step.
    pub training: TrainingOutcome,
}

impl RunSummary {
    /// Console summary of every step.
    #[must_use]
    pub fn summary(&self) -> String {
        [
            self.collect.summary(),
            self.split.summary(),
            self.preprocess.summary(),
            self.training.summary(),
        ]
        .join("\n")
    }
}

/// Runs pipeline stages against a shared configuration.
#[derive(Debug, Clone)]
pub struct PipelineRuntime {
    config: PipelineConfig,
    telemetry: Option<PipelineTelemetry>,
}

impl PipelineRuntime {
    /// Validates `config` and creates a runtime without telemetry.
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            telemetry: None,
        })
    }

    /// Attaches telemetry sinks for structured logging/events.
    #[must_use]
    pub fn with_telemetry(mut self, telemetry: PipelineTelemetry) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Merges the raw CSVs into the combined dataset.
    pub fn collect(&self) -> Result<CollectReport> {
        let telemetry = self.stage("collector");
        let paths = &self.config.paths;
        Collector::new(&self.config.features.source_column).run(
            &paths.raw_dir,
            &paths.combined_csv(),
            telemetry.as_ref(),
        )
    }

    /// Splits the combined dataset into train/val/test files.
    pub fn split(&self) -> Result<SplitReport> {
        let telemetry = self.stage("splitter");
        let paths = &self.config.paths;
        Splitter::new(self.config.split.seed, self.config.split.ratios())?.run(
            &paths.combined_csv(),
            &paths.data_dir,
            telemetry.as_ref(),
        )
    }

    /// Preprocesses the split files and saves the scaler.
    pub fn preprocess(&self) -> Result<PreprocessReport> {
        let telemetry = self.stage("preprocessor");
        let paths = &self.config.paths;
        Preprocessor::from_config(&self.config.features).run(
            &paths.data_dir,
            &paths.scaler_json(),
            telemetry.as_ref(),
        )
    }

    /// Trains the configured models, scores them and records the run.
    pub fn train(&self) -> Result<TrainingOutcome> {
        let telemetry = self.stage("trainer");
        let paths = &self.config.paths;
        Trainer::from_config(&self.config).run(
            &paths.data_dir,
            &paths.model_dir,
            &paths.run_manifest(),
            telemetry.as_ref(),
        )
    }

    /// Loads the saved artifacts and scores them on validation and test.
    pub fn evaluate(&self) -> Result<EvaluationSummary> {
        let telemetry = self.stage("evaluator");
        let paths = &self.config.paths;
        let trainer = Trainer::from_config(&self.config);
        let splits = SplitSet::read_preprocessed(&paths.data_dir)?;
        let mut models = Vec::new();
        for (scheduler, path) in trainer.planned_artifacts(&paths.model_dir) {
            let artifact = ModelArtifact::load(&path)?;
            let validation =
                score_partition(&artifact, &splits.val, Partition::Validation, telemetry.as_ref())?;
            let test = score_partition(&artifact, &splits.test, Partition::Test, telemetry.as_ref())?;
            models.push(TrainedModel {
                scheduler,
                path,
                training_rows: artifact.training_rows,
                features: artifact.feature_names,
                validation,
                test,
            });
        }
        let summary = EvaluationSummary { models };
        telemetry::event(
            telemetry.as_ref(),
            "pipeline.evaluate.completed",
            json!({ "reports": summary.reports().collect::<Vec<_>>() }),
        );
        Ok(summary)
    }

    /// Previews scheduler/resource extraction on the combined dataset.
    pub fn inspect(&self, limit: usize) -> Result<CategoryPreview> {
        let combined = Frame::read_csv(self.config.paths.combined_csv())?;
        CategoryPreview::from_frame(&combined, &self.config.features.source_column, limit)
    }

    /// Runs collect, split, preprocess and train in order.
    pub fn run_all(&self) -> Result<RunSummary> {
        self.log(
            LogLevel::Info,
            "runtime.started",
            json!({ "raw_dir": self.config.paths.raw_dir, "mode": self.config.training.mode }),
        );
        let summary = RunSummary {
            collect: self.collect()?,
            split: self.split()?,
            preprocess: self.preprocess()?,
            training: self.train()?,
        };
        self.log(
            LogLevel::Info,
            "runtime.completed",
            json!({ "run_id": summary.training.run_id }),
        );
        Ok(summary)
    }

    fn stage(&self, stage: &str) -> Option<PipelineTelemetry> {
        self.telemetry.as_ref().map(|t| t.for_stage(stage))
    }

    fn log(&self, level: LogLevel, message: &str, fields: Value) {
        telemetry::log(self.telemetry.as_ref(), level, message, fields);
    }
}

/// Convenience for binaries: loads and validates a TOML file.
pub fn runtime_from_file(path: &Path) -> Result<PipelineRuntime> {
    PipelineRuntime::new(PipelineConfig::load(path)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        classical_ml::trainer::RunRecord,
        config::{PathsConfig, TrainingMode},
        error::PipelineError,
    };
    use shared_event_bus::MemoryEventBus;
    use std::{fmt::Write as _, fs, sync::Arc};
    use tempfile::{tempdir, TempDir};

    #[allow(clippy::cast_precision_loss)]
    fn write_run(path: &Path, rows: usize, start_ms: u64, base_load: f64) {
        let mut body = String::from("time_ms,load_avg_1,procs_running,cpu_util\n");
        for i in 0..rows {
            let procs = (i % 6) as f64;
            let cpu = if i % 11 == 3 {
                String::new()
            } else {
                format!("{}", 10.0 + (i % 9) as f64 * 5.0)
            };
            let load = base_load + procs * 0.25 + (i % 4) as f64 * 0.05;
            writeln!(body, "{},{load},{procs},{cpu}", start_ms + i as u64 * 1000).unwrap();
        }
        fs::write(path, body).unwrap();
    }

    fn workspace(mode: TrainingMode) -> (TempDir, PipelineRuntime) {
        let dir = tempdir().unwrap();
        let mut config = PipelineConfig::default();
        config.paths = PathsConfig::rooted(dir.path());
        config.forest.n_estimators = 16;
        config.training.mode = mode;
        fs::create_dir_all(&config.paths.raw_dir).unwrap();
        write_run(
            &config.paths.raw_dir.join("prio_cpu_run1.csv"),
            100,
            1_700_000_000_000,
            1.0,
        );
        write_run(
            &config.paths.raw_dir.join("rr_io_2.csv"),
            50,
            1_700_500_000_000,
            2.0,
        );
        (dir, PipelineRuntime::new(config).unwrap())
    }

    #[test]
    fn end_to_end_single_model() {
        let (_dir, runtime) = workspace(TrainingMode::Single);
        let summary = runtime.run_all().unwrap();
        assert_eq!(summary.collect.rows, 150);
        assert_eq!(
            (summary.split.train_rows, summary.split.val_rows, summary.split.test_rows),
            (105, 22, 23)
        );
        let paths = &runtime.config().paths;
        assert!(paths.model_dir.join("model.bin").exists());
        assert!(paths.scaler_json().exists());

        let evaluation = runtime.evaluate().unwrap();
        let reports: Vec<_> = evaluation.reports().collect();
        assert_eq!(reports.len(), 2);
        for report in reports {
            assert!(report.mae.is_finite() && report.mae >= 0.0);
            assert!(report.r2.is_finite() && report.r2 <= 1.0);
        }
        let records = RunRecord::read_all(&paths.run_manifest()).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].stage, "train");
        assert_eq!(records[0].run_id, summary.training.run_id);
    }

    #[test]
    fn end_to_end_per_scheduler_models() {
        let (_dir, runtime) = workspace(TrainingMode::PerScheduler {
            categories: vec!["PRIORITY".into(), "RR".into()],
        });
        let summary = runtime.run_all().unwrap();
        assert_eq!(summary.training.models.len(), 2);
        let model_dir = &runtime.config().paths.model_dir;
        assert!(model_dir.join("model_priority.bin").exists());
        assert!(model_dir.join("model_rr.bin").exists());
        assert!(!model_dir.join("model.bin").exists());
        let rows: usize = summary.training.models.iter().map(|m| m.training_rows).sum();
        assert_eq!(rows, 105);
    }

    #[test]
    fn evaluating_without_a_model_is_an_artifact_error() {
        let (_dir, runtime) = workspace(TrainingMode::Single);
        runtime.collect().unwrap();
        runtime.split().unwrap();
        runtime.preprocess().unwrap();
        let err = runtime.evaluate().unwrap_err();
        assert!(matches!(err, PipelineError::ArtifactLoad { .. }));
        assert!(err.to_string().contains("cannot load model artifact"));
    }

    #[test]
    fn inspect_reports_categories_of_the_combined_dataset() {
        let (_dir, runtime) = workspace(TrainingMode::Single);
        runtime.collect().unwrap();
        let preview = runtime.inspect(5).unwrap();
        assert_eq!(preview.head.len(), 5);
        assert_eq!(preview.schedulers["PRIORITY"], 100);
        assert_eq!(preview.resources["IO"], 50);
    }

    #[test]
    fn stages_publish_events() {
        let (_dir, runtime) = workspace(TrainingMode::Single);
        let bus = Arc::new(MemoryEventBus::new(32));
        let runtime = runtime.with_telemetry(
            PipelineTelemetry::builder("trn")
                .event_publisher(bus.clone())
                .build()
                .unwrap(),
        );
        runtime.collect().unwrap();
        runtime.split().unwrap();
        let events = bus.snapshot();
        let stages: Vec<_> = events.iter().map(|e| e.stage.as_str()).collect();
        assert_eq!(stages, vec!["collector", "splitter"]);
    }

    #[test]
    fn invalid_configuration_is_rejected_up_front() {
        let mut config = PipelineConfig::default();
        config.features.excluded.push("load_avg_1".into());
        assert!(matches!(
            PipelineRuntime::new(config),
            Err(PipelineError::InvalidConfig(_))
        ));
    }
}
