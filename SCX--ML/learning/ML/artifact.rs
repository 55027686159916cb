use std::{
    fs::{self, File},
    io::{BufReader, BufWriter, Write},
    path::Path,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{evaluator::Regressor, forest::ForestRegressor};
use crate::error::{PipelineError, Result};

/// Bumped whenever the on-disk layout changes.
pub const ARTIFACT_FORMAT: u32 = 1;

/// A fitted forest together with what is needed to score new rows.
#[derive(Debug, Serialize, Deserialize)]
pub struct ModelArtifact {
    /// On-disk layout version.
    pub format: u32,
    /// Training run that produced the model.
    pub run_id: Uuid,
    /// Predicted column.
    pub target: String,
    /// Feature columns, in the order the forest expects them.
    pub feature_names: Vec<String>,
    /// Scheduler subset the model was trained on, if any.
    pub scheduler: Option<String>,
    /// Training rows used.
    pub training_rows: usize,
    /// Fit completion time.
    pub trained_at: DateTime<Utc>,
    /// The forest itself.
    pub forest: ForestRegressor,
}

impl ModelArtifact {
    /// Writes the artifact in binary form, replacing any previous file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| PipelineError::io(parent, err))?;
        }
        let file = File::create(path).map_err(|err| PipelineError::io(path, err))?;
        let mut writer = BufWriter::new(file);
        bincode::serialize_into(&mut writer, self)?;
        writer.flush().map_err(|err| PipelineError::io(path, err))?;
        Ok(())
    }

    /// Reads an artifact; any failure is reported as [`PipelineError::ArtifactLoad`].
    pub fn load(path: &Path) -> Result<Self> {
        let failed = |reason: String| PipelineError::ArtifactLoad {
            path: path.to_path_buf(),
            reason,
        };
        let file = File::open(path).map_err(|err| failed(err.to_string()))?;
        let artifact: Self =
            bincode::deserialize_from(BufReader::new(file)).map_err(|err| failed(err.to_string()))?;
        if artifact.format != ARTIFACT_FORMAT {
            return Err(failed(format!(
                "format {} is not supported (expected {ARTIFACT_FORMAT})",
                artifact.format
            )));
        }
        Ok(artifact)
    }
}

impl Regressor for ModelArtifact {
    fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    fn predict(&self, features: &[Vec<f64>]) -> Result<Vec<f64>> {
        self.forest.predict(features)
    }
}
