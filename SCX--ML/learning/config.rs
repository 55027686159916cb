use std::{
    fs,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use shared_logging::LogLevel;

use crate::error::{PipelineError, Result};

/// Complete pipeline configuration. Every section has defaults, so an empty
/// TOML document is valid.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Input and output locations.
    pub paths: PathsConfig,
    /// Partitioning settings.
    pub split: SplitConfig,
    /// Target and column roles.
    pub features: FeatureConfig,
    /// Random-forest settings.
    pub forest: ForestConfig,
    /// Single vs per-scheduler training.
    pub training: TrainingConfig,
    /// Log file and verbosity.
    pub logging: LoggingConfig,
}

impl PipelineConfig {
    /// Loads a TOML file, resolves relative paths against its directory and validates it.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|err| PipelineError::io(path, err))?;
        let mut config: Self = toml::from_str(&raw).map_err(|err| {
            PipelineError::InvalidConfig(format!("parsing {}: {err}", path.display()))
        })?;
        let base = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        config.paths.resolve_against(&base);
        config.validate()?;
        Ok(config)
    }

    /// Rejects settings that would make a stage misbehave.
    pub fn validate(&self) -> Result<()> {
        self.split.ratios().validate()?;
        let features = &self.features;
        if features.target.trim().is_empty() {
            return Err(PipelineError::InvalidConfig("target column is empty".into()));
        }
        if features.excluded.iter().any(|col| col == &features.target) {
            return Err(PipelineError::InvalidConfig(format!(
                "target `{}` is also listed as excluded",
                features.target
            )));
        }
        if features.target == features.time_column
            || features.target == features.source_column
            || features.target == crate::preprocessing::TIME_COLUMN
        {
            return Err(PipelineError::InvalidConfig(format!(
                "target `{}` is a metadata column",
                features.target
            )));
        }
        if self.forest.n_estimators == 0 {
            return Err(PipelineError::InvalidConfig(
                "forest.n_estimators must be positive".into(),
            ));
        }
        if let TrainingMode::PerScheduler { categories } = &self.training.mode {
            if categories.is_empty() {
                return Err(PipelineError::InvalidConfig(
                    "per_scheduler mode needs at least one category".into(),
                ));
            }
        }
        Ok(())
    }
}

/// Filesystem layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Directory with the raw per-experiment CSV files.
    pub raw_dir: PathBuf,
    /// Directory for combined, split and preprocessed CSVs.
    pub data_dir: PathBuf,
    /// Directory for model artifacts and the run manifest.
    pub model_dir: PathBuf,
    /// Directory for JSON logs.
    pub log_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            raw_dir: PathBuf::from("datasets"),
            data_dir: PathBuf::from("ml/datasets"),
            model_dir: PathBuf::from("ml/models"),
            log_dir: PathBuf::from("ml/logs"),
        }
    }
}

impl PathsConfig {
    /// Creates a layout rooted at `root` (handy for tests and scratch runs).
    #[must_use]
    pub fn rooted(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        Self {
            raw_dir: root.join("raw"),
            data_dir: root.join("datasets"),
            model_dir: root.join("models"),
            log_dir: root.join("logs"),
        }
    }

    fn resolve_against(&mut self, base: &Path) {
        for dir in [
            &mut self.raw_dir,
            &mut self.data_dir,
            &mut self.model_dir,
            &mut self.log_dir,
        ] {
            if dir.is_relative() {
                *dir = base.join(&*dir);
            }
        }
    }

    /// Merged dataset written by the collector.
    #[must_use]
    pub fn combined_csv(&self) -> PathBuf {
        self.data_dir.join("combined_dataset.csv")
    }

    /// Fitted scaler parameters.
    #[must_use]
    pub fn scaler_json(&self) -> PathBuf {
        self.data_dir.join("scaler.json")
    }

    /// Append-only record of training runs.
    #[must_use]
    pub fn run_manifest(&self) -> PathBuf {
        self.model_dir.join("runs.jsonl")
    }
}

/// Split proportions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SplitRatios {
    /// Training share.
    pub train: f64,
    /// Validation share.
    pub val: f64,
    /// Test share (receives the truncation remainder).
    pub test: f64,
}

impl Default for SplitRatios {
    fn default() -> Self {
        Self {
            train: 0.70,
            val: 0.15,
            test: 0.15,
        }
    }
}

impl SplitRatios {
    /// Checks ranges and that the shares add up to one.
    pub fn validate(&self) -> Result<()> {
        let shares = [self.train, self.val, self.test];
        if shares
            .iter()
            .any(|share| !share.is_finite() || !(0.0..=1.0).contains(share))
        {
            return Err(PipelineError::InvalidConfig(format!(
                "split ratios must lie in [0, 1], got {shares:?}"
            )));
        }
        if self.train <= 0.0 {
            return Err(PipelineError::InvalidConfig(
                "train ratio must be positive".into(),
            ));
        }
        let total: f64 = shares.iter().sum();
        if (total - 1.0).abs() > 1e-6 {
            return Err(PipelineError::InvalidConfig(format!(
                "split ratios must sum to 1, got {total}"
            )));
        }
        Ok(())
    }
}

/// Partitioning settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SplitConfig {
    /// Shuffle seed.
    pub seed: u64,
    /// Training share.
    pub train: f64,
    /// Validation share.
    pub val: f64,
    /// Test share.
    pub test: f64,
}

impl Default for SplitConfig {
    fn default() -> Self {
        let ratios = SplitRatios::default();
        Self {
            seed: 42,
            train: ratios.train,
            val: ratios.val,
            test: ratios.test,
        }
    }
}

impl SplitConfig {
    /// Ratios as a single value.
    #[must_use]
    pub const fn ratios(&self) -> SplitRatios {
        SplitRatios {
            train: self.train,
            val: self.val,
            test: self.test,
        }
    }
}

/// Column roles.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    /// Column the models predict.
    pub target: String,
    /// Columns never used as features (the target is always excluded too).
    pub excluded: Vec<String>,
    /// Raw millisecond timestamp column.
    pub time_column: String,
    /// Column carrying the originating file name.
    pub source_column: String,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            target: "load_avg_1".into(),
            excluded: vec![crate::preprocessing::TIME_COLUMN.into()],
            time_column: "time_ms".into(),
            source_column: "source_file".into(),
        }
    }
}

/// Random-forest settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ForestConfig {
    /// Number of trees.
    pub n_estimators: usize,
    /// Maximum tree depth; `None` grows trees until leaves are pure.
    pub max_depth: Option<u16>,
    /// Seed for bootstrap sampling.
    pub seed: u64,
    /// Worker threads for fitting; `0` uses every core.
    pub n_jobs: usize,
}

impl Default for ForestConfig {
    fn default() -> Self {
        Self {
            n_estimators: 200,
            max_depth: None,
            seed: 42,
            n_jobs: 0,
        }
    }
}

/// Which models a training run produces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TrainingMode {
    /// One global model over every row.
    Single,
    /// One independent model per scheduler category.
    PerScheduler {
        /// Scheduler labels, e.g. `PRIORITY` and `RR`.
        categories: Vec<String>,
    },
}

impl Default for TrainingMode {
    fn default() -> Self {
        Self::Single
    }
}

/// Training settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    /// Mode selection.
    pub mode: TrainingMode,
    /// Artifact file name; per-scheduler runs insert the category before the extension.
    pub model_file: String,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            mode: TrainingMode::default(),
            model_file: "model.bin".into(),
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Minimum level written to the log file.
    pub level: LogLevel,
    /// Log file name inside `paths.log_dir`.
    pub file: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            file: "pipeline.log.jsonl".into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn defaults_match_the_documented_constants() {
        let config = PipelineConfig::default();
        assert_eq!(config.split.seed, 42);
        assert_eq!(config.split.ratios(), SplitRatios::default());
        assert_eq!(config.features.target, "load_avg_1");
        assert_eq!(config.features.excluded, vec!["time".to_string()]);
        assert_eq!(config.forest.n_estimators, 200);
        assert_eq!(config.forest.max_depth, None);
        assert_eq!(config.training.mode, TrainingMode::Single);
        config.validate().unwrap();
    }

    #[test]
    fn loads_toml_and_resolves_paths() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pipeline.toml");
        fs::write(
            &path,
            r#"
[paths]
raw_dir = "raw"

[split]
seed = 7

[training]
mode = { kind = "per_scheduler", categories = ["PRIORITY", "RR"] }

[logging]
level = "DEBUG"
"#,
        )
        .unwrap();
        let config = PipelineConfig::load(&path).unwrap();
        assert_eq!(config.paths.raw_dir, dir.path().join("raw"));
        assert!(config.paths.model_dir.is_absolute());
        assert_eq!(config.split.seed, 7);
        assert_eq!(config.split.train, 0.70);
        assert_eq!(
            config.training.mode,
            TrainingMode::PerScheduler {
                categories: vec!["PRIORITY".into(), "RR".into()]
            }
        );
        assert_eq!(config.logging.level, LogLevel::Debug);
    }

    #[test]
    fn rejects_bad_ratios_and_targets() {
        let mut config = PipelineConfig::default();
        config.split.val = 0.5;
        assert!(matches!(
            config.validate(),
            Err(PipelineError::InvalidConfig(_))
        ));

        let mut config = PipelineConfig::default();
        config.features.target = "time".into();
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.features.excluded.push("load_avg_1".into());
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.training.mode = TrainingMode::PerScheduler { categories: vec![] };
        assert!(config.validate().is_err());
    }

    #[test]
    fn example_file_matches_defaults() {
        let config: PipelineConfig = toml::from_str(include_str!("pipeline.example.toml")).unwrap();
        let defaults = PipelineConfig::default();
        assert_eq!(config.split.ratios(), defaults.split.ratios());
        assert_eq!(config.features.excluded, defaults.features.excluded);
        assert_eq!(config.forest.n_estimators, defaults.forest.n_estimators);
        assert_eq!(config.training.mode, TrainingMode::Single);
        assert_eq!(config.logging.level, LogLevel::Info);
        config.validate().unwrap();
    }
}
