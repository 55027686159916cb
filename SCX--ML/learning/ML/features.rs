use crate::{
    error::{PipelineError, Result},
    frame::{Column, Frame},
    preprocessing::scheduler_indicator,
};

/// Row-major features and the matching targets.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureMatrix {
    /// Feature names, one per matrix column.
    pub names: Vec<String>,
    /// One feature vector per sample.
    pub rows: Vec<Vec<f64>>,
    /// Target per sample.
    pub targets: Vec<f64>,
}

impl FeatureMatrix {
    /// Every column except the target and the excluded ones, in frame order.
    #[must_use]
    pub fn feature_names(frame: &Frame, target: &str, excluded: &[String]) -> Vec<String> {
        frame
            .columns()
            .map(|(name, _)| name)
            .filter(|name| *name != target && !excluded.iter().any(|ex| ex == name))
            .map(str::to_string)
            .collect()
    }

    /// Builds the matrix for the selected rows (all rows when `rows` is `None`).
    pub fn from_frame(
        frame: &Frame,
        names: &[String],
        target: &str,
        rows: Option<&[usize]>,
        context: &str,
    ) -> Result<Self> {
        let all: Vec<usize>;
        let rows = if let Some(rows) = rows {
            rows
        } else {
            all = (0..frame.height()).collect();
            &all
        };
        let target_column = numeric(frame, target, context)?;
        let columns = names
            .iter()
            .map(|name| numeric(frame, name, context))
            .collect::<Result<Vec<_>>>()?;

        let mut matrix = Self {
            names: names.to_vec(),
            rows: Vec::with_capacity(rows.len()),
            targets: Vec::with_capacity(rows.len()),
        };
        for &row in rows {
            matrix.targets.push(cell(target_column, target, row)?);
            let features = columns
                .iter()
                .zip(names)
                .map(|(column, name)| cell(column, name, row))
                .collect::<Result<Vec<_>>>()?;
            matrix.rows.push(features);
        }
        Ok(matrix)
    }

    /// Number of samples.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// True when there are no samples.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Rows whose `scheduler_<label>` indicator is set.
pub fn scheduler_rows(frame: &Frame, label: &str, context: &str) -> Result<Vec<usize>> {
    let name = scheduler_indicator(label);
    let column = numeric(frame, &name, context)?;
    Ok((0..frame.height())
        .filter(|&row| column.value(row).is_some_and(|v| (v - 1.0).abs() < 1e-9))
        .collect())
}

fn numeric<'a>(frame: &'a Frame, name: &str, context: &str) -> Result<&'a Column> {
    match frame.require(name, context)? {
        Column::Text(values) if values.iter().any(Option::is_some) => {
            Err(PipelineError::NonNumericColumn {
                column: name.to_string(),
                context: context.to_string(),
            })
        }
        column => Ok(column),
    }
}

fn cell(column: &Column, name: &str, row: usize) -> Result<f64> {
    column.value(row).ok_or_else(|| PipelineError::MissingValue {
        column: name.to_string(),
        row,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame() -> Frame {
        Frame::from_columns([
            ("time", Column::Numeric(vec![Some(0.0), Some(1.0), Some(2.0)])),
            ("load_avg_1", Column::Numeric(vec![Some(0.5), Some(0.6), Some(0.7)])),
            ("cpu", Column::Numeric(vec![Some(10.0), Some(20.0), Some(30.0)])),
            ("scheduler_PRIORITY", Column::Flag(vec![true, false, true])),
            ("scheduler_RR", Column::Flag(vec![false, true, false])),
        ])
        .unwrap()
    }

    #[test]
    fn features_skip_target_and_excluded_columns() {
        let names = FeatureMatrix::feature_names(&frame(), "load_avg_1", &["time".into()]);
        assert_eq!(names, vec!["cpu", "scheduler_PRIORITY", "scheduler_RR"]);
    }

    #[test]
    fn builds_rows_for_a_scheduler_subset() {
        let frame = frame();
        let names = FeatureMatrix::feature_names(&frame, "load_avg_1", &["time".into()]);
        let rows = scheduler_rows(&frame, "PRIORITY", "train partition").unwrap();
        assert_eq!(rows, vec![0, 2]);
        let matrix =
            FeatureMatrix::from_frame(&frame, &names, "load_avg_1", Some(&rows), "train").unwrap();
        assert_eq!(matrix.targets, vec![0.5, 0.7]);
        assert_eq!(matrix.rows[1], vec![30.0, 1.0, 0.0]);
    }

    #[test]
    fn missing_target_or_indicator_is_reported() {
        let frame = frame();
        let err = FeatureMatrix::from_frame(&frame, &[], "load_avg_5", None, "train partition")
            .unwrap_err();
        assert!(matches!(err, PipelineError::MissingColumn { column, .. } if column == "load_avg_5"));
        let err = scheduler_rows(&frame, "FIFO", "train partition").unwrap_err();
        assert!(matches!(err, PipelineError::MissingColumn { column, .. } if column == "scheduler_FIFO"));
    }

    #[test]
    fn text_target_is_rejected() {
        let mut frame = frame();
        frame
            .set_column(
                "label",
                Column::Text(vec![Some("a".into()), Some("b".into()), None]),
            )
            .unwrap();
        let err = FeatureMatrix::from_frame(&frame, &[], "label", None, "train").unwrap_err();
        assert!(matches!(err, PipelineError::NonNumericColumn { .. }));
    }
}
