use std::{fs, path::Path};

use serde::{Deserialize, Serialize};

use crate::{
    error::{PipelineError, Result},
    frame::{Column, Frame},
};

/// Per-column standardization `(x - mean) / scale` learned from one frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    /// Scaled columns, in training order.
    pub columns: Vec<String>,
    /// Column means.
    pub means: Vec<f64>,
    /// Population standard deviations; `1.0` for constant columns.
    pub scales: Vec<f64>,
}

impl StandardScaler {
    /// Learns means and deviations of every numeric column. Indicator
    /// columns keep their 0/1 encoding and are not scaled.
    pub fn fit(frame: &Frame) -> Result<Self> {
        if frame.height() == 0 {
            return Err(PipelineError::EmptyPartition(
                "training data for the scaler".into(),
            ));
        }
        let mut scaler = Self {
            columns: Vec::new(),
            means: Vec::new(),
            scales: Vec::new(),
        };
        for (name, column) in frame.columns() {
            let Column::Numeric(values) = column else {
                continue;
            };
            let (mean, std) = moments(name, values)?;
            scaler.columns.push(name.to_string());
            scaler.means.push(mean);
            scaler.scales.push(if std > f64::EPSILON { std } else { 1.0 });
        }
        Ok(scaler)
    }

    /// Standardizes the fitted columns of `frame` in place.
    pub fn transform(&self, frame: &mut Frame, context: &str) -> Result<()> {
        self.apply(frame, context, |value, mean, scale| (value - mean) / scale)
    }

    /// Maps standardized values back to the original units.
    pub fn inverse_transform(&self, frame: &mut Frame, context: &str) -> Result<()> {
        self.apply(frame, context, |value, mean, scale| value.mul_add(scale, mean))
    }

    /// Mean and scale of one fitted column.
    #[must_use]
    pub fn parameters(&self, column: &str) -> Option<(f64, f64)> {
        let idx = self.columns.iter().position(|name| name == column)?;
        Some((self.means[idx], self.scales[idx]))
    }

    /// Writes the parameters as pretty JSON.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| PipelineError::io(parent, err))?;
        }
        let body = serde_json::to_string_pretty(self)?;
        fs::write(path, body).map_err(|err| PipelineError::io(path, err))
    }

    /// Reads parameters written by [`StandardScaler::save`].
    pub fn load(path: &Path) -> Result<Self> {
        let body = fs::read_to_string(path).map_err(|err| PipelineError::io(path, err))?;
        Ok(serde_json::from_str(&body)?)
    }

    fn apply(
        &self,
        frame: &mut Frame,
        context: &str,
        op: impl Fn(f64, f64, f64) -> f64,
    ) -> Result<()> {
        for (idx, name) in self.columns.iter().enumerate() {
            let values = match frame.require(name, context)? {
                Column::Numeric(values) => values.clone(),
                Column::Flag(flags) => flags
                    .iter()
                    .map(|flag| Some(f64::from(u8::from(*flag))))
                    .collect(),
                Column::Text(_) => {
                    return Err(PipelineError::NonNumericColumn {
                        column: name.clone(),
                        context: context.to_string(),
                    })
                }
            };
            let (mean, scale) = (self.means[idx], self.scales[idx]);
            let scaled = values
                .into_iter()
                .map(|value| value.map(|v| op(v, mean, scale)))
                .collect();
            frame.set_column(name.clone(), Column::Numeric(scaled))?;
        }
        Ok(())
    }
}

#[allow(clippy::cast_precision_loss)]
fn moments(name: &str, values: &[Option<f64>]) -> Result<(f64, f64)> {
    let mut present = Vec::with_capacity(values.len());
    for (row, value) in values.iter().enumerate() {
        match value {
            Some(v) => present.push(*v),
            None => {
                return Err(PipelineError::MissingValue {
                    column: name.to_string(),
                    row,
                })
            }
        }
    }
    let n = present.len() as f64;
    let mean = present.iter().sum::<f64>() / n;
    let variance = present.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    Ok((mean, variance.sqrt()))
}
