use std::{io, path::PathBuf};

use thiserror::Error;

/// Convenience alias used across the learning crate.
pub type Result<T, E = PipelineError> = std::result::Result<T, E>;

/// Errors raised by the pipeline stages.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The raw-data directory holds no CSV files.
    #[error("no csv files in {}", dir.display())]
    NoInputFiles {
        /// Directory that was scanned.
        dir: PathBuf,
    },
    /// A column the stage depends on is absent.
    #[error("required column `{column}` missing from {context}")]
    MissingColumn {
        /// Column name.
        column: String,
        /// Where it was expected (partition, file).
        context: String,
    },
    /// A column that must be numeric holds text.
    #[error("column `{column}` in {context} is not numeric")]
    NonNumericColumn {
        /// Column name.
        column: String,
        /// Where it was found.
        context: String,
    },
    /// A feature or target cell is missing where a value is required.
    #[error("column `{column}` has a missing value at row {row}")]
    MissingValue {
        /// Column name.
        column: String,
        /// Zero-based row index.
        row: usize,
    },
    /// A stage received a partition with no rows.
    #[error("{0} has no rows")]
    EmptyPartition(String),
    /// Configuration rejected by validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// Column lengths disagree inside a frame.
    #[error("column `{column}` has {found} rows, expected {expected}")]
    RaggedColumn {
        /// Offending column.
        column: String,
        /// Frame height.
        expected: usize,
        /// Column length.
        found: usize,
    },
    /// A model artifact could not be read back.
    #[error("cannot load model artifact {}: {reason}", path.display())]
    ArtifactLoad {
        /// Artifact path.
        path: PathBuf,
        /// Underlying cause.
        reason: String,
    },
    /// Filesystem failure.
    #[error("io error on {}: {source}", path.display())]
    Io {
        /// Path being accessed.
        path: PathBuf,
        /// Source error.
        #[source]
        source: io::Error,
    },
    /// CSV parse or write failure.
    #[error("csv error on {}: {source}", path.display())]
    Csv {
        /// File being read or written.
        path: PathBuf,
        /// Source error.
        #[source]
        source: csv::Error,
    },
    /// JSON encoding failure.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    /// Binary encoding failure while saving a model.
    #[error("serialization error: {0}")]
    Serialization(#[from] bincode::Error),
    /// The regression backend rejected the input.
    #[error("model error: {0}")]
    Model(String),
}

impl PipelineError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn csv(path: impl Into<PathBuf>, source: csv::Error) -> Self {
        Self::Csv {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn missing_column(column: impl Into<String>, context: impl Into<String>) -> Self {
        Self::MissingColumn {
            column: column.into(),
            context: context.into(),
        }
    }
}
