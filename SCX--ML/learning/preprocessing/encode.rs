use std::collections::BTreeSet;

use crate::{
    error::{PipelineError, Result},
    frame::{Column, Frame},
};

/// Replaces the text column `field` with one indicator column per distinct
/// value, named `<field>_<value>` and appended in sorted order. Rows with an
/// unset value get zero in every indicator. Returns the created names.
pub fn one_hot(frame: &mut Frame, field: &str, context: &str) -> Result<Vec<String>> {
    let values = match frame.require(field, context)? {
        Column::Text(values) => values.clone(),
        _ => {
            return Err(PipelineError::NonNumericColumn {
                column: field.to_string(),
                context: format!("{context} (expected categories)"),
            })
        }
    };
    frame.drop_column(field);
    let levels: BTreeSet<&str> = values.iter().flatten().map(String::as_str).collect();
    let mut created = Vec::with_capacity(levels.len());
    for level in levels {
        let name = format!("{field}_{level}");
        let flags = values
            .iter()
            .map(|value| value.as_deref() == Some(level))
            .collect();
        frame.set_column(name.clone(), Column::Flag(flags))?;
        created.push(name);
    }
    Ok(created)
}
