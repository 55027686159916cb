//! Feature engineering applied identically to every partition, followed by
//! column alignment and scaling fitted on the training partition only.

/// Scheduler and resource extraction from source file names.
pub mod categories;
/// Missing-value filling.
pub mod fill;
/// One-hot encoding.
pub mod encode;
/// Reindexing partitions to the training columns.
pub mod align;
/// Standard scaling.
pub mod scaler;

use std::{
    cmp::Ordering,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use serde_json::json;
use shared_logging::LogLevel;

use crate::{
    config::FeatureConfig,
    error::Result,
    frame::{Column, Frame},
    splitter::{Partition, SplitSet},
    telemetry::{self, PipelineTelemetry},
};

use self::{align::align_to, scaler::StandardScaler};

/// Name of the derived Unix-seconds column.
pub const TIME_COLUMN: &str = "time";
/// Categorical column holding the scheduler label before encoding.
pub const SCHEDULER_FIELD: &str = "scheduler";
/// Categorical column holding the resource label before encoding.
pub const RESOURCE_FIELD: &str = "resource";

/// Indicator column name for a scheduler label, e.g. `scheduler_RR`.
#[must_use]
pub fn scheduler_indicator(label: &str) -> String {
    format!("{SCHEDULER_FIELD}_{label}")
}

/// Preprocessed partitions plus the scaler fitted on training data.
#[derive(Debug, Clone)]
pub struct PreprocessedSplits {
    /// Scaled training rows.
    pub train: Frame,
    /// Validation rows aligned to training columns.
    pub val: Frame,
    /// Test rows aligned to training columns.
    pub test: Frame,
    /// Scaling parameters learned from `train`.
    pub scaler: StandardScaler,
}

impl PreprocessedSplits {
    /// Partition by name.
    #[must_use]
    pub const fn get(&self, partition: Partition) -> &Frame {
        match partition {
            Partition::Train => &self.train,
            Partition::Validation => &self.val,
            Partition::Test => &self.test,
        }
    }
}

/// What a preprocessing run produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreprocessReport {
    /// Rows per partition after deduplication, train/val/test.
    pub rows: [usize; 3],
    /// Final column layout shared by all partitions.
    pub columns: Vec<String>,
    /// Columns standardized by the scaler.
    pub scaled: Vec<String>,
    /// Partition files written, train/val/test.
    pub outputs: Vec<PathBuf>,
    /// Saved scaler parameters.
    pub scaler_path: PathBuf,
}

impl PreprocessReport {
    /// Console summary.
    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "[preprocess] train={} val={} test={} columns={} scaled={} -> {}",
            self.rows[0],
            self.rows[1],
            self.rows[2],
            self.columns.len(),
            self.scaled.len(),
            self.scaler_path.display()
        )
    }
}

/// Turns raw partitions into model-ready tables.
#[derive(Debug, Clone)]
pub struct Preprocessor {
    time_column: String,
    source_column: String,
}

impl Preprocessor {
    /// Uses the given raw timestamp and source-tag columns.
    #[must_use]
    pub fn new(time_column: impl Into<String>, source_column: impl Into<String>) -> Self {
        Self {
            time_column: time_column.into(),
            source_column: source_column.into(),
        }
    }

    /// Column roles from configuration.
    #[must_use]
    pub fn from_config(features: &FeatureConfig) -> Self {
        Self::new(&features.time_column, &features.source_column)
    }

    /// Feature engineering for one partition, before alignment and scaling.
    pub fn prepare(&self, frame: &Frame, partition: Partition) -> Result<Frame> {
        let context = partition.to_string();
        frame.require(&self.time_column, &context)?;
        frame.require(&self.source_column, &context)?;

        let mut frame = frame.drop_duplicates();
        frame = self.derive_time(&frame, &context)?;
        categories::categorize(&mut frame, &self.source_column, &context)?;
        fill::fill_numeric(
            &mut frame,
            &[
                self.time_column.as_str(),
                self.source_column.as_str(),
                SCHEDULER_FIELD,
                RESOURCE_FIELD,
            ],
            &context,
        )?;
        encode::one_hot(&mut frame, SCHEDULER_FIELD, &context)?;
        encode::one_hot(&mut frame, RESOURCE_FIELD, &context)?;
        frame.drop_column(&self.time_column);
        frame.drop_column(&self.source_column);
        Ok(frame)
    }

    /// Prepares all partitions, aligns validation and test to the training
    /// columns, then fits the scaler on training rows and applies it everywhere.
    pub fn process(
        &self,
        splits: &SplitSet,
        telemetry: Option<&PipelineTelemetry>,
    ) -> Result<PreprocessedSplits> {
        let mut train = self.prepare(&splits.train, Partition::Train)?;
        let mut val = self.aligned(&splits.val, &train, Partition::Validation, telemetry)?;
        let mut test = self.aligned(&splits.test, &train, Partition::Test, telemetry)?;

        let scaler = StandardScaler::fit(&train)?;
        scaler.transform(&mut train, &Partition::Train.to_string())?;
        scaler.transform(&mut val, &Partition::Validation.to_string())?;
        scaler.transform(&mut test, &Partition::Test.to_string())?;
        Ok(PreprocessedSplits {
            train,
            val,
            test,
            scaler,
        })
    }

    /// Reads `train/val/test.csv` from `data_dir`, writes the
    /// `*_preprocessed.csv` files next to them and saves the scaler.
    pub fn run(
        &self,
        data_dir: &Path,
        scaler_path: &Path,
        telemetry: Option<&PipelineTelemetry>,
    ) -> Result<PreprocessReport> {
        let splits = SplitSet::read(data_dir)?;
        let processed = self.process(&splits, telemetry)?;
        let mut outputs = Vec::with_capacity(3);
        for partition in Partition::ALL {
            let path = partition.preprocessed_csv(data_dir);
            processed.get(partition).write_csv(&path)?;
            outputs.push(path);
        }
        processed.scaler.save(scaler_path)?;
        let report = PreprocessReport {
            rows: [
                processed.train.height(),
                processed.val.height(),
                processed.test.height(),
            ],
            columns: processed.train.column_names(),
            scaled: processed.scaler.columns.clone(),
            outputs,
            scaler_path: scaler_path.to_path_buf(),
        };
        telemetry::log(
            telemetry,
            LogLevel::Info,
            "preprocessor.completed",
            json!({
                "rows": report.rows,
                "columns": report.columns,
                "scaled": report.scaled,
            }),
        );
        telemetry::event(
            telemetry,
            "pipeline.preprocess.completed",
            json!({ "rows": report.rows, "columns": report.columns.len() }),
        );
        Ok(report)
    }

    fn aligned(
        &self,
        frame: &Frame,
        train: &Frame,
        partition: Partition,
        telemetry: Option<&PipelineTelemetry>,
    ) -> Result<Frame> {
        let prepared = self.prepare(frame, partition)?;
        let (aligned, alignment) = align_to(&prepared, train)?;
        if !alignment.is_noop() {
            telemetry::log(
                telemetry,
                LogLevel::Debug,
                "preprocessor.aligned",
                json!({
                    "partition": partition.stem(),
                    "added": alignment.added,
                    "dropped": alignment.dropped,
                }),
            );
        }
        Ok(aligned)
    }

    /// Inserts Unix seconds derived from the millisecond column at its
    /// position and orders rows by it, unparseable timestamps last.
    fn derive_time(&self, frame: &Frame, context: &str) -> Result<Frame> {
        let raw = frame.require(&self.time_column, context)?;
        let seconds: Vec<Option<f64>> = (0..frame.height())
            .map(|row| {
                raw.value(row)
                    .filter(|ms| ms.is_finite())
                    .map(|ms| (ms / 1000.0).floor())
            })
            .collect();

        let mut order: Vec<usize> = (0..frame.height()).collect();
        order.sort_by(|&a, &b| match (seconds[a], seconds[b]) {
            (Some(x), Some(y)) => x.total_cmp(&y),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        });

        let position = frame.position(&self.time_column).unwrap_or(0);
        let mut sorted = frame.take_rows(&order);
        let column = Column::Numeric(order.iter().map(|&row| seconds[row]).collect());
        if sorted.column(TIME_COLUMN).is_some() {
            sorted.set_column(TIME_COLUMN, column)?;
        } else {
            sorted.insert_column(position, TIME_COLUMN, column)?;
        }
        Ok(sorted)
    }
}
