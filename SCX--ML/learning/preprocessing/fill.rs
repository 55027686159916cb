use crate::{
    error::{PipelineError, Result},
    frame::{Column, Frame},
};

/// Carries the last seen value forward, then zero-fills the leading gap.
pub fn fill_forward_then_zero(values: &mut [Option<f64>]) {
    let mut last = None;
    for value in values.iter_mut() {
        match value {
            Some(current) => last = Some(*current),
            None => *value = Some(last.unwrap_or(0.0)),
        }
    }
}

/// Fills every numeric column of `frame`. Text columns listed in
/// `categorical` are left untouched; any other text column is an error.
/// Returns how many cells were filled.
pub fn fill_numeric(frame: &mut Frame, categorical: &[&str], context: &str) -> Result<usize> {
    let mut filled = 0;
    for (name, column) in frame.columns_mut() {
        match column {
            Column::Numeric(values) => {
                filled += values.iter().filter(|value| value.is_none()).count();
                fill_forward_then_zero(values);
            }
            Column::Flag(_) => {}
            Column::Text(_) if categorical.contains(&name) => {}
            Column::Text(_) => {
                return Err(PipelineError::NonNumericColumn {
                    column: name.to_string(),
                    context: context.to_string(),
                })
            }
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_fill_then_zero() {
        let mut values = vec![Some(1.0), None, None, Some(3.0)];
        fill_forward_then_zero(&mut values);
        assert_eq!(values, vec![Some(1.0), Some(1.0), Some(1.0), Some(3.0)]);

        let mut leading = vec![None, None, Some(2.0)];
        fill_forward_then_zero(&mut leading);
        assert_eq!(leading, vec![Some(0.0), Some(0.0), Some(2.0)]);
    }

    #[test]
    fn categorical_text_is_never_filled() {
        let mut frame = Frame::from_columns([
            ("cpu", Column::Numeric(vec![None, Some(0.5)])),
            ("scheduler", Column::Text(vec![None, Some("RR".into())])),
        ])
        .unwrap();
        let filled = fill_numeric(&mut frame, &["scheduler"], "train partition").unwrap();
        assert_eq!(filled, 1);
        assert_eq!(
            frame.column("cpu"),
            Some(&Column::Numeric(vec![Some(0.0), Some(0.5)]))
        );
        assert_eq!(
            frame.column("scheduler"),
            Some(&Column::Text(vec![None, Some("RR".into())]))
        );
    }

    #[test]
    fn unexpected_text_column_is_rejected() {
        let mut frame =
            Frame::from_columns([("host", Column::Text(vec![Some("node-a".into())]))]).unwrap();
        let err = fill_numeric(&mut frame, &[], "train partition").unwrap_err();
        assert!(matches!(err, PipelineError::NonNumericColumn { column, .. } if column == "host"));
    }
}
