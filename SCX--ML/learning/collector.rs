use std::{
    fs,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use serde_json::json;
use shared_logging::LogLevel;

use crate::{
    error::{PipelineError, Result},
    frame::{Column, Frame},
    telemetry::{self, PipelineTelemetry},
};

/// Outcome of a collection run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectReport {
    /// File names read, in processing order.
    pub files: Vec<String>,
    /// Rows in the combined table.
    pub rows: usize,
    /// Columns in the combined table (including the source tag).
    pub columns: usize,
    /// Where the combined table was written.
    pub output: PathBuf,
}

impl CollectReport {
    /// One-line console summary.
    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "[collect] files={} combined shape=({}, {}) -> {}",
            self.files.len(),
            self.rows,
            self.columns,
            self.output.display()
        )
    }
}

/// Merges every raw CSV of a directory into one tagged table.
#[derive(Debug, Clone)]
pub struct Collector {
    source_column: String,
}

impl Collector {
    /// Tags rows with their file name under `source_column`.
    #[must_use]
    pub fn new(source_column: impl Into<String>) -> Self {
        Self {
            source_column: source_column.into(),
        }
    }

    /// CSV files directly inside `dir`, sorted by file name.
    pub fn discover(dir: &Path) -> Result<Vec<PathBuf>> {
        let entries = fs::read_dir(dir).map_err(|err| PipelineError::io(dir, err))?;
        let mut files = Vec::new();
        for entry in entries {
            let path = entry.map_err(|err| PipelineError::io(dir, err))?.path();
            let is_csv = path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"));
            if is_csv && path.is_file() {
                files.push(path);
            }
        }
        if files.is_empty() {
            return Err(PipelineError::NoInputFiles {
                dir: dir.to_path_buf(),
            });
        }
        files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
        Ok(files)
    }

    /// Reads and concatenates every CSV in `raw_dir`, tagging each row.
    pub fn collect(
        &self,
        raw_dir: &Path,
        telemetry: Option<&PipelineTelemetry>,
    ) -> Result<(Frame, Vec<String>)> {
        let files = Self::discover(raw_dir)?;
        let mut frames = Vec::with_capacity(files.len());
        let mut names = Vec::with_capacity(files.len());
        for path in &files {
            let name = path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default();
            let mut frame = Frame::read_csv(path)?;
            let height = frame.height();
            frame.set_column(
                self.source_column.clone(),
                Column::Text(vec![Some(name.clone()); height]),
            )?;
            telemetry::log(
                telemetry,
                LogLevel::Debug,
                "collector.file_read",
                json!({ "file": name, "rows": height, "columns": frame.width() }),
            );
            frames.push(frame);
            names.push(name);
        }
        Ok((Frame::concat(&frames)?, names))
    }

    /// Collects `raw_dir` and writes the combined table to `output`.
    pub fn run(
        &self,
        raw_dir: &Path,
        output: &Path,
        telemetry: Option<&PipelineTelemetry>,
    ) -> Result<CollectReport> {
        let (combined, files) = self.collect(raw_dir, telemetry)?;
        combined.write_csv(output)?;
        let report = CollectReport {
            files,
            rows: combined.height(),
            columns: combined.width(),
            output: output.to_path_buf(),
        };
        telemetry::log(
            telemetry,
            LogLevel::Info,
            "collector.completed",
            json!({ "files": report.files, "rows": report.rows, "columns": report.columns }),
        );
        telemetry::event(
            telemetry,
            "pipeline.collect.completed",
            json!({ "rows": report.rows, "output": report.output }),
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn concatenates_and_tags_rows() {
        let dir = tempdir().unwrap();
        let raw = dir.path().join("raw");
        fs::create_dir_all(&raw).unwrap();
        fs::write(raw.join("rr_io_2.csv"), "time_ms,load_avg_1\n0,0.5\n1000,0.6\n").unwrap();
        fs::write(
            raw.join("PRIO_cpu_run1.CSV"),
            "time_ms,load_avg_1,procs_running\n0,1.5,3\n",
        )
        .unwrap();
        fs::write(raw.join("notes.txt"), "ignored").unwrap();

        let output = dir.path().join("datasets/combined_dataset.csv");
        let report = Collector::new("source_file")
            .run(&raw, &output, None)
            .unwrap();
        assert_eq!(report.files, vec!["PRIO_cpu_run1.CSV", "rr_io_2.csv"]);
        assert_eq!(report.rows, 3);
        assert_eq!(report.columns, 4);

        let combined = Frame::read_csv(&output).unwrap();
        assert_eq!(
            combined.column_names(),
            vec!["time_ms", "load_avg_1", "procs_running", "source_file"]
        );
        assert_eq!(
            combined.column("procs_running"),
            Some(&Column::Numeric(vec![Some(3.0), None, None]))
        );
        assert_eq!(
            combined.column("source_file"),
            Some(&Column::Text(vec![
                Some("PRIO_cpu_run1.CSV".into()),
                Some("rr_io_2.csv".into()),
                Some("rr_io_2.csv".into()),
            ]))
        );
    }

    #[test]
    fn empty_directory_is_a_configuration_error() {
        let dir = tempdir().unwrap();
        let err = Collector::new("source_file")
            .run(dir.path(), &dir.path().join("out.csv"), None)
            .unwrap_err();
        assert!(matches!(err, PipelineError::NoInputFiles { .. }));
        assert!(!dir.path().join("out.csv").exists());
    }
}
