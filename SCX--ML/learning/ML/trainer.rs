use std::{
    fs::{self, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use shared_logging::LogLevel;
use uuid::Uuid;

use super::{
    artifact::{ModelArtifact, ARTIFACT_FORMAT},
    evaluator::{evaluate_frame, EvaluationReport},
    features::{scheduler_rows, FeatureMatrix},
    forest::{ForestParams, ForestRegressor},
};
use crate::{
    config::{PipelineConfig, TrainingMode},
    error::{PipelineError, Result},
    frame::Frame,
    splitter::{Partition, SplitSet},
    telemetry::{self, PipelineTelemetry},
};

/// One persisted model and its held-out scores.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainedModel {
    /// Scheduler subset, `None` for the global model.
    pub scheduler: Option<String>,
    /// Artifact location.
    pub path: PathBuf,
    /// Training rows used.
    pub training_rows: usize,
    /// Feature columns, in model order.
    pub features: Vec<String>,
    /// Validation scores; `None` when the subset had no rows.
    pub validation: Option<EvaluationReport>,
    /// Test scores; `None` when the subset had no rows.
    pub test: Option<EvaluationReport>,
}

/// Result of a training run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingOutcome {
    /// Identifier shared by every artifact of the run.
    pub run_id: Uuid,
    /// Run completion time.
    pub finished_at: DateTime<Utc>,
    /// Mode the run used.
    pub mode: TrainingMode,
    /// Predicted column.
    pub target: String,
    /// Models produced, in category order.
    pub models: Vec<TrainedModel>,
}

impl TrainingOutcome {
    /// Console summary: one line per artifact followed by its score blocks.
    #[must_use]
    pub fn summary(&self) -> String {
        let mut lines = Vec::new();
        for model in &self.models {
            lines.push(format!(
                "[train] {} rows={} features={} -> {}",
                model.scheduler.as_deref().unwrap_or("all"),
                model.training_rows,
                model.features.len(),
                model.path.display()
            ));
            lines.extend(reports(model).map(EvaluationReport::summary));
        }
        lines.join("\n")
    }

    /// Every score block of the run.
    pub fn reports(&self) -> impl Iterator<Item = &EvaluationReport> {
        self.models.iter().flat_map(reports)
    }
}

fn reports(model: &TrainedModel) -> impl Iterator<Item = &EvaluationReport> {
    model.validation.iter().chain(model.test.iter())
}

/// One line of `runs.jsonl`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    /// Training run.
    pub run_id: Uuid,
    /// Stage that appended the record (`train`).
    pub stage: String,
    /// When the record was written.
    pub recorded_at: DateTime<Utc>,
    /// Mode of the run.
    pub mode: TrainingMode,
    /// Predicted column.
    pub target: String,
    /// Forest settings.
    pub forest: ForestParams,
    /// Artifact files.
    pub artifacts: Vec<PathBuf>,
    /// Scores.
    pub metrics: Vec<EvaluationReport>,
}

impl RunRecord {
    /// Appends the record as one JSON line, creating the file if needed.
    pub fn append(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| PipelineError::io(parent, err))?;
        }
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|err| PipelineError::io(path, err))?;
        file.write_all(line.as_bytes())
            .map_err(|err| PipelineError::io(path, err))
    }

    /// Reads every record of a manifest.
    pub fn read_all(path: &Path) -> Result<Vec<Self>> {
        let body = fs::read_to_string(path).map_err(|err| PipelineError::io(path, err))?;
        body.lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).map_err(PipelineError::from))
            .collect()
    }
}

/// Fits forests on the preprocessed training partition.
#[derive(Debug, Clone)]
pub struct Trainer {
    target: String,
    excluded: Vec<String>,
    params: ForestParams,
    mode: TrainingMode,
    model_file: String,
}

impl Trainer {
    /// Global model for `target` with default exclusions and file name.
    #[must_use]
    pub fn new(target: impl Into<String>, params: ForestParams) -> Self {
        let defaults = PipelineConfig::default();
        Self {
            target: target.into(),
            excluded: defaults.features.excluded,
            params,
            mode: TrainingMode::Single,
            model_file: defaults.training.model_file,
        }
    }

    /// Trainer described by a validated configuration.
    #[must_use]
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            target: config.features.target.clone(),
            excluded: config.features.excluded.clone(),
            params: ForestParams::from(&config.forest),
            mode: config.training.mode.clone(),
            model_file: config.training.model_file.clone(),
        }
    }

    /// Switches between one global model and per-scheduler models.
    #[must_use]
    pub fn with_mode(mut self, mode: TrainingMode) -> Self {
        self.mode = mode;
        self
    }

    /// Predicted column.
    #[must_use]
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Training mode.
    #[must_use]
    pub const fn mode(&self) -> &TrainingMode {
        &self.mode
    }

    /// Forest settings.
    #[must_use]
    pub const fn params(&self) -> &ForestParams {
        &self.params
    }

    /// `model.bin`, or `model_<category>.bin` for a scheduler subset.
    #[must_use]
    pub fn artifact_path(&self, model_dir: &Path, scheduler: Option<&str>) -> PathBuf {
        let Some(category) = scheduler else {
            return model_dir.join(&self.model_file);
        };
        let file = Path::new(&self.model_file);
        let stem = file
            .file_stem()
            .map_or_else(|| "model".into(), |stem| stem.to_string_lossy());
        let name = match file.extension() {
            Some(ext) => format!(
                "{stem}_{}.{}",
                category.to_lowercase(),
                ext.to_string_lossy()
            ),
            None => format!("{stem}_{}", category.to_lowercase()),
        };
        model_dir.join(name)
    }

    /// Artifact paths this trainer writes, paired with their scheduler.
    #[must_use]
    pub fn planned_artifacts(&self, model_dir: &Path) -> Vec<(Option<String>, PathBuf)> {
        match &self.mode {
            TrainingMode::Single => vec![(None, self.artifact_path(model_dir, None))],
            TrainingMode::PerScheduler { categories } => categories
                .iter()
                .map(|cat| (Some(cat.clone()), self.artifact_path(model_dir, Some(cat))))
                .collect(),
        }
    }

    /// Fits one forest on `train`, restricted to a scheduler subset when given.
    pub fn fit(&self, train: &Frame, scheduler: Option<&str>, run_id: Uuid) -> Result<ModelArtifact> {
        let context = Partition::Train.to_string();
        let names = FeatureMatrix::feature_names(train, &self.target, &self.excluded);
        let rows = match scheduler {
            Some(category) => Some(scheduler_rows(train, category, &context)?),
            None => None,
        };
        let matrix =
            FeatureMatrix::from_frame(train, &names, &self.target, rows.as_deref(), &context)?;
        if matrix.is_empty() {
            return Err(PipelineError::EmptyPartition(format!(
                "{} training subset",
                scheduler.unwrap_or("global")
            )));
        }
        let forest = ForestRegressor::fit(&matrix.rows, &matrix.targets, &self.params)?;
        Ok(ModelArtifact {
            format: ARTIFACT_FORMAT,
            run_id,
            target: self.target.clone(),
            feature_names: names,
            scheduler: scheduler.map(str::to_string),
            training_rows: matrix.len(),
            trained_at: Utc::now(),
            forest,
        })
    }

    /// Fits and scores every model the mode calls for, then saves them.
    /// A failure in any category leaves `model_dir` untouched.
    pub fn train(
        &self,
        splits: &SplitSet,
        model_dir: &Path,
        telemetry: Option<&PipelineTelemetry>,
    ) -> Result<TrainingOutcome> {
        let run_id = Uuid::new_v4();
        telemetry::log(
            telemetry,
            LogLevel::Info,
            "trainer.started",
            json!({
                "run_id": run_id,
                "mode": self.mode,
                "target": self.target,
                "rows": splits.train.height(),
                "n_estimators": self.params.n_estimators,
            }),
        );
        // Every model is fitted and scored before the first file is written.
        let mut fitted = Vec::new();
        for (scheduler, path) in self.planned_artifacts(model_dir) {
            let artifact = self.fit(&splits.train, scheduler.as_deref(), run_id)?;
            let validation = score_partition(&artifact, &splits.val, Partition::Validation, telemetry)?;
            let test = score_partition(&artifact, &splits.test, Partition::Test, telemetry)?;
            fitted.push((scheduler, path, artifact, validation, test));
        }
        let mut models = Vec::with_capacity(fitted.len());
        for (scheduler, path, artifact, validation, test) in fitted {
            artifact.save(&path)?;
            telemetry::log(
                telemetry,
                LogLevel::Info,
                "trainer.model_saved",
                json!({
                    "scheduler": scheduler,
                    "path": path,
                    "training_rows": artifact.training_rows,
                    "trees": artifact.forest.n_trees(),
                }),
            );
            models.push(TrainedModel {
                scheduler,
                path,
                training_rows: artifact.training_rows,
                features: artifact.feature_names,
                validation,
                test,
            });
        }
        let outcome = TrainingOutcome {
            run_id,
            finished_at: Utc::now(),
            mode: self.mode.clone(),
            target: self.target.clone(),
            models,
        };
        telemetry::event(
            telemetry,
            "pipeline.train.completed",
            json!({
                "run_id": outcome.run_id,
                "models": outcome.models.len(),
                "artifacts": outcome.models.iter().map(|m| &m.path).collect::<Vec<_>>(),
            }),
        );
        Ok(outcome)
    }

    /// Trains from the `*_preprocessed.csv` files in `data_dir` and appends
    /// the run to `manifest`.
    pub fn run(
        &self,
        data_dir: &Path,
        model_dir: &Path,
        manifest: &Path,
        telemetry: Option<&PipelineTelemetry>,
    ) -> Result<TrainingOutcome> {
        let splits = SplitSet::read_preprocessed(data_dir)?;
        let outcome = self.train(&splits, model_dir, telemetry)?;
        self.record(&outcome, "train").append(manifest)?;
        Ok(outcome)
    }

    /// Manifest line for an outcome.
    #[must_use]
    pub fn record(&self, outcome: &TrainingOutcome, stage: &str) -> RunRecord {
        RunRecord {
            run_id: outcome.run_id,
            stage: stage.to_string(),
            recorded_at: Utc::now(),
            mode: outcome.mode.clone(),
            target: outcome.target.clone(),
            forest: self.params,
            artifacts: outcome.models.iter().map(|m| m.path.clone()).collect(),
            metrics: outcome.reports().cloned().collect(),
        }
    }
}

/// Scores an artifact on one partition, restricted to its scheduler subset.
/// An empty subset is logged and yields `None`.
pub fn score_partition(
    artifact: &ModelArtifact,
    frame: &Frame,
    partition: Partition,
    telemetry: Option<&PipelineTelemetry>,
) -> Result<Option<EvaluationReport>> {
    let title = match partition {
        Partition::Train => "Train",
        Partition::Validation => "Validation",
        Partition::Test => "Test",
    };
    let label = match &artifact.scheduler {
        Some(category) => format!("{category} {title}"),
        None => title.to_string(),
    };
    let rows = match &artifact.scheduler {
        Some(category) => Some(scheduler_rows(frame, category, &partition.to_string())?),
        None => None,
    };
    let samples = rows.as_ref().map_or(frame.height(), Vec::len);
    if samples == 0 {
        telemetry::log(
            telemetry,
            LogLevel::Warn,
            "evaluator.skipped_empty",
            json!({ "label": label }),
        );
        return Ok(None);
    }
    let report = evaluate_frame(artifact, frame, &artifact.target, rows.as_deref(), &label)?;
    telemetry::log(
        telemetry,
        LogLevel::Info,
        "evaluator.scored",
        json!({ "label": report.label, "samples": report.samples, "mae": report.mae, "r2": report.r2 }),
    );
    Ok(Some(report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Column;
    use tempfile::tempdir;

    #[allow(clippy::cast_precision_loss)]
    fn partition(rows: usize, offset: usize) -> Frame {
        let idx: Vec<usize> = (offset..offset + rows).collect();
        Frame::from_columns([
            (
                "time",
                Column::Numeric(idx.iter().map(|&i| Some(i as f64)).collect()),
            ),
            (
                "load_avg_1",
                Column::Numeric(idx.iter().map(|&i| Some((i % 10) as f64 / 10.0)).collect()),
            ),
            (
                "procs_running",
                Column::Numeric(idx.iter().map(|&i| Some((i % 10) as f64)).collect()),
            ),
            (
                "scheduler_PRIORITY",
                Column::Flag(idx.iter().map(|&i| i % 2 == 0).collect()),
            ),
            (
                "scheduler_RR",
                Column::Flag(idx.iter().map(|&i| i % 2 == 1).collect()),
            ),
        ])
        .unwrap()
    }

    fn splits() -> SplitSet {
        SplitSet {
            train: partition(40, 0),
            val: partition(8, 40),
            test: partition(8, 48),
        }
    }

    fn params() -> ForestParams {
        ForestParams {
            n_estimators: 8,
            max_depth: None,
            seed: 42,
            n_jobs: 2,
        }
    }

    #[test]
    fn artifact_names_follow_the_mode() {
        let trainer = Trainer::new("load_avg_1", params());
        let dir = Path::new("/models");
        assert_eq!(trainer.artifact_path(dir, None), dir.join("model.bin"));
        assert_eq!(
            trainer.artifact_path(dir, Some("PRIORITY")),
            dir.join("model_priority.bin")
        );
    }

    #[test]
    fn single_mode_excludes_time_and_target() {
        let trainer = Trainer::new("load_avg_1", params());
        let artifact = trainer.fit(&splits().train, None, Uuid::new_v4()).unwrap();
        assert_eq!(
            artifact.feature_names,
            vec!["procs_running", "scheduler_PRIORITY", "scheduler_RR"]
        );
        assert_eq!(artifact.training_rows, 40);
    }

    #[test]
    fn per_scheduler_mode_writes_one_model_per_category() {
        let dir = tempdir().unwrap();
        let trainer = Trainer::new("load_avg_1", params()).with_mode(TrainingMode::PerScheduler {
            categories: vec!["PRIORITY".into(), "RR".into()],
        });
        let outcome = trainer.train(&splits(), dir.path(), None).unwrap();
        assert_eq!(outcome.models.len(), 2);
        assert!(dir.path().join("model_priority.bin").exists());
        assert!(dir.path().join("model_rr.bin").exists());
        assert_eq!(outcome.models[0].training_rows, 20);
        let val = outcome.models[1].validation.as_ref().unwrap();
        assert_eq!(val.label, "RR Validation");
        assert_eq!(val.samples, 4);
        assert!(outcome.summary().contains("[train] PRIORITY"));
    }

    #[test]
    fn unknown_category_is_a_missing_column() {
        let trainer = Trainer::new("load_avg_1", params()).with_mode(TrainingMode::PerScheduler {
            categories: vec!["FIFO".into()],
        });
        let err = trainer
            .train(&splits(), tempdir().unwrap().path(), None)
            .unwrap_err();
        assert!(matches!(err, PipelineError::MissingColumn { column, .. } if column == "scheduler_FIFO"));
    }

    #[test]
    fn failing_category_writes_no_artifacts() {
        let dir = tempdir().unwrap();
        let trainer = Trainer::new("load_avg_1", params()).with_mode(TrainingMode::PerScheduler {
            categories: vec!["PRIORITY".into(), "FIFO".into()],
        });
        let err = trainer.train(&splits(), dir.path(), None).unwrap_err();
        assert!(matches!(err, PipelineError::MissingColumn { column, .. } if column == "scheduler_FIFO"));
        assert!(!dir.path().join("model_priority.bin").exists());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn empty_scoring_subset_is_skipped() {
        let trainer = Trainer::new("load_avg_1", params());
        let artifact = trainer.fit(&splits().train, Some("RR"), Uuid::new_v4()).unwrap();
        let mut only_priority = partition(4, 100);
        only_priority
            .set_column("scheduler_RR", Column::Flag(vec![false; 4]))
            .unwrap();
        let report = score_partition(&artifact, &only_priority, Partition::Test, None).unwrap();
        assert!(report.is_none());
    }

    #[test]
    fn manifest_collects_one_line_per_run() {
        let dir = tempdir().unwrap();
        let manifest = dir.path().join("runs.jsonl");
        let trainer = Trainer::new("load_avg_1", params());
        for _ in 0..2 {
            let outcome = trainer.train(&splits(), dir.path(), None).unwrap();
            trainer.record(&outcome, "train").append(&manifest).unwrap();
        }
        let records = RunRecord::read_all(&manifest).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].metrics.len(), 2);
        assert_ne!(records[0].run_id, records[1].run_id);
    }
}
