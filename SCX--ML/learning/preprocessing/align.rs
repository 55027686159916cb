use serde::{Deserialize, Serialize};

use crate::{error::Result, frame::Frame};

/// Columns changed while aligning a partition to the training layout.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alignment {
    /// Training columns the partition lacked (zero-filled).
    pub added: Vec<String>,
    /// Partition columns unknown to training (discarded).
    pub dropped: Vec<String>,
}

impl Alignment {
    /// True when the partition already matched.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.added.is_empty() && self.dropped.is_empty()
    }
}

/// Rebuilds `frame` with exactly the columns of `template`, in its order.
pub fn align_to(frame: &Frame, template: &Frame) -> Result<(Frame, Alignment)> {
    let mut alignment = Alignment::default();
    let mut aligned = Frame::new();
    let height = frame.height();
    for (name, template_column) in template.columns() {
        let column = frame.column(name).cloned().unwrap_or_else(|| {
            alignment.added.push(name.to_string());
            template_column.zeros_like(height)
        });
        aligned.set_column(name, column)?;
    }
    alignment.dropped = frame
        .columns()
        .filter(|(name, _)| template.column(name).is_none())
        .map(|(name, _)| name.to_string())
        .collect();
    Ok((aligned, alignment))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Column;

    #[test]
    fn missing_indicators_are_zero_and_extras_dropped() {
        let train = Frame::from_columns([
            ("cpu", Column::Numeric(vec![Some(1.0)])),
            ("scheduler_PRIORITY", Column::Flag(vec![true])),
            ("scheduler_RR", Column::Flag(vec![false])),
        ])
        .unwrap();
        let test = Frame::from_columns([
            ("scheduler_RR", Column::Flag(vec![true, true])),
            ("resource_MEM", Column::Flag(vec![true, false])),
            ("cpu", Column::Numeric(vec![Some(2.0), Some(3.0)])),
        ])
        .unwrap();
        let (aligned, alignment) = align_to(&test, &train).unwrap();
        assert_eq!(aligned.column_names(), train.column_names());
        assert_eq!(
            aligned.column("scheduler_PRIORITY"),
            Some(&Column::Flag(vec![false, false]))
        );
        assert_eq!(alignment.added, vec!["scheduler_PRIORITY"]);
        assert_eq!(alignment.dropped, vec!["resource_MEM"]);
    }
}
