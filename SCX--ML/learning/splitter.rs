use std::{
    fmt,
    path::{Path, PathBuf},
};

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use serde_json::json;
use shared_logging::LogLevel;

use crate::{
    config::SplitRatios,
    error::{PipelineError, Result},
    frame::Frame,
    telemetry::{self, PipelineTelemetry},
};

/// One of the three dataset partitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Partition {
    /// Fitting data.
    Train,
    /// Model selection data.
    Validation,
    /// Held-out data.
    Test,
}

impl Partition {
    /// Every partition, in pipeline order.
    pub const ALL: [Self; 3] = [Self::Train, Self::Validation, Self::Test];

    /// File stem used for the partition's CSVs.
    #[must_use]
    pub const fn stem(self) -> &'static str {
        match self {
            Self::Train => "train",
            Self::Validation => "val",
            Self::Test => "test",
        }
    }

    /// `<dir>/<stem>.csv`
    #[must_use]
    pub fn split_csv(self, dir: &Path) -> PathBuf {
        dir.join(format!("{}.csv", self.stem()))
    }

    /// `<dir>/<stem>_preprocessed.csv`
    #[must_use]
    pub fn preprocessed_csv(self, dir: &Path) -> PathBuf {
        dir.join(format!("{}_preprocessed.csv", self.stem()))
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Train => f.write_str("train partition"),
            Self::Validation => f.write_str("validation partition"),
            Self::Test => f.write_str("test partition"),
        }
    }
}

/// The three partitions of one dataset.
#[derive(Debug, Clone)]
pub struct SplitSet {
    /// Training rows.
    pub train: Frame,
    /// Validation rows.
    pub val: Frame,
    /// Test rows.
    pub test: Frame,
}

impl SplitSet {
    /// Partition by name.
    #[must_use]
    pub const fn get(&self, partition: Partition) -> &Frame {
        match partition {
            Partition::Train => &self.train,
            Partition::Validation => &self.val,
            Partition::Test => &self.test,
        }
    }

    /// Reads `train.csv`, `val.csv` and `test.csv` from `dir`.
    pub fn read(dir: &Path) -> Result<Self> {
        Ok(Self {
            train: Frame::read_csv(Partition::Train.split_csv(dir))?,
            val: Frame::read_csv(Partition::Validation.split_csv(dir))?,
            test: Frame::read_csv(Partition::Test.split_csv(dir))?,
        })
    }

    /// Reads the `*_preprocessed.csv` files from `dir`.
    pub fn read_preprocessed(dir: &Path) -> Result<Self> {
        Ok(Self {
            train: Frame::read_csv(Partition::Train.preprocessed_csv(dir))?,
            val: Frame::read_csv(Partition::Validation.preprocessed_csv(dir))?,
            test: Frame::read_csv(Partition::Test.preprocessed_csv(dir))?,
        })
    }
}

/// Row counts and locations of a split.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SplitReport {
    /// Seed used for the permutation.
    pub seed: u64,
    /// Training rows.
    pub train_rows: usize,
    /// Validation rows.
    pub val_rows: usize,
    /// Test rows.
    pub test_rows: usize,
    /// Files written, train/val/test.
    pub outputs: Vec<PathBuf>,
}

impl SplitReport {
    /// Console summary.
    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "[split] seed={} train={} val={} test={}",
            self.seed, self.train_rows, self.val_rows, self.test_rows
        )
    }
}

/// Seeded shuffle followed by contiguous slicing.
#[derive(Debug, Clone, Copy)]
pub struct Splitter {
    seed: u64,
    ratios: SplitRatios,
}

impl Splitter {
    /// Validates the ratios up front.
    pub fn new(seed: u64, ratios: SplitRatios) -> Result<Self> {
        ratios.validate()?;
        Ok(Self { seed, ratios })
    }

    /// Partition sizes for `rows` rows: truncated train and validation
    /// shares, remainder to test.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
    pub fn sizes(&self, rows: usize) -> (usize, usize, usize) {
        let train = ((rows as f64) * self.ratios.train) as usize;
        let val = (((rows as f64) * self.ratios.val) as usize).min(rows - train);
        (train, val, rows - train - val)
    }

    /// Row order after the seeded permutation.
    #[must_use]
    pub fn permutation(&self, rows: usize) -> Vec<usize> {
        let mut order: Vec<usize> = (0..rows).collect();
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        order.shuffle(&mut rng);
        order
    }

    /// Splits a frame in memory.
    #[must_use]
    pub fn split(&self, frame: &Frame) -> SplitSet {
        let shuffled = frame.take_rows(&self.permutation(frame.height()));
        let (train, val, _) = self.sizes(frame.height());
        SplitSet {
            train: shuffled.slice(0, train),
            val: shuffled.slice(train, train + val),
            test: shuffled.slice(train + val, shuffled.height()),
        }
    }

    /// Reads the combined table, splits it and writes the three partition files into `out_dir`.
    pub fn run(
        &self,
        combined: &Path,
        out_dir: &Path,
        telemetry: Option<&PipelineTelemetry>,
    ) -> Result<SplitReport> {
        let frame = Frame::read_csv(combined)?;
        if frame.height() == 0 {
            return Err(PipelineError::EmptyPartition(format!(
                "combined dataset {}",
                combined.display()
            )));
        }
        let set = self.split(&frame);
        let mut outputs = Vec::with_capacity(3);
        for partition in Partition::ALL {
            let path = partition.split_csv(out_dir);
            set.get(partition).write_csv(&path)?;
            outputs.push(path);
        }
        let report = SplitReport {
            seed: self.seed,
            train_rows: set.train.height(),
            val_rows: set.val.height(),
            test_rows: set.test.height(),
            outputs,
        };
        telemetry::log(
            telemetry,
            LogLevel::Info,
            "splitter.completed",
            json!({
                "seed": report.seed,
                "train": report.train_rows,
                "val": report.val_rows,
                "test": report.test_rows,
            }),
        );
        telemetry::event(telemetry, "pipeline.split.completed", json!(report));
        Ok(report)
    }
}
