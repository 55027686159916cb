use std::{collections::HashSet, fs, path::Path};

use indexmap::IndexMap;

use crate::error::{PipelineError, Result};

/// One named column of a [`Frame`].
#[derive(Debug, Clone, PartialEq)]
pub enum Column {
    /// Numeric values; `None` marks a missing cell.
    Numeric(Vec<Option<f64>>),
    /// Free text; `None` marks a missing cell.
    Text(Vec<Option<String>>),
    /// One-hot indicator values.
    Flag(Vec<bool>),
}

impl Column {
    /// Number of cells.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Numeric(values) => values.len(),
            Self::Text(values) => values.len(),
            Self::Flag(values) => values.len(),
        }
    }

    /// True when the column has no cells.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// A column of the same kind holding `len` zero (or false / missing text) cells.
    #[must_use]
    pub fn zeros_like(&self, len: usize) -> Self {
        match self {
            Self::Numeric(_) => Self::Numeric(vec![Some(0.0); len]),
            Self::Text(_) => Self::Text(vec![None; len]),
            Self::Flag(_) => Self::Flag(vec![false; len]),
        }
    }

    /// Numeric view of the cell at `row`: flags become 0/1, text is parsed.
    #[must_use]
    pub fn value(&self, row: usize) -> Option<f64> {
        match self {
            Self::Numeric(values) => values.get(row).copied().flatten(),
            Self::Flag(values) => values.get(row).map(|flag| f64::from(u8::from(*flag))),
            Self::Text(values) => values
                .get(row)
                .and_then(Option::as_deref)
                .and_then(parse_number),
        }
    }

    fn take(&self, rows: &[usize]) -> Self {
        match self {
            Self::Numeric(values) => Self::Numeric(rows.iter().map(|&idx| values[idx]).collect()),
            Self::Text(values) => {
                Self::Text(rows.iter().map(|&idx| values[idx].clone()).collect())
            }
            Self::Flag(values) => Self::Flag(rows.iter().map(|&idx| values[idx]).collect()),
        }
    }

    fn missing(len: usize, like: &Self) -> Self {
        match like {
            Self::Numeric(_) => Self::Numeric(vec![None; len]),
            Self::Text(_) => Self::Text(vec![None; len]),
            Self::Flag(_) => Self::Flag(vec![false; len]),
        }
    }

    fn append(&mut self, other: &Self) {
        match (self, other) {
            (Self::Numeric(left), Self::Numeric(right)) => left.extend_from_slice(right),
            (Self::Flag(left), Self::Flag(right)) => left.extend_from_slice(right),
            (Self::Numeric(left), Self::Flag(right)) => {
                left.extend(right.iter().map(|flag| Some(f64::from(u8::from(*flag)))));
            }
            (this, other) => {
                let merged = match (&*this, other) {
                    (Self::Flag(left), Self::Numeric(right)) => Self::Numeric(
                        left.iter()
                            .map(|flag| Some(f64::from(u8::from(*flag))))
                            .chain(right.iter().copied())
                            .collect(),
                    ),
                    // Mixed kinds degrade to text so no cell is lost.
                    _ => {
                        let mut cells = this.to_text();
                        cells.extend(other.to_text());
                        Self::Text(cells)
                    }
                };
                *this = merged;
            }
        }
    }

    /// Cells rendered as CSV text; missing cells stay `None`.
    #[must_use]
    pub fn to_text(&self) -> Vec<Option<String>> {
        (0..self.len()).map(|row| self.cell(row)).collect()
    }

    fn cell(&self, row: usize) -> Option<String> {
        match self {
            Self::Numeric(values) => values[row].map(format_number),
            Self::Text(values) => values[row].clone(),
            Self::Flag(values) => Some(if values[row] { "1" } else { "0" }.to_string()),
        }
    }

    fn key(&self, row: usize) -> CellKey {
        match self {
            Self::Numeric(values) => values[row].map_or(CellKey::Missing, |v| {
                // 0.0 and -0.0 compare equal, so they must dedupe together.
                let v = if v == 0.0 { 0.0 } else { v };
                CellKey::Number(v.to_bits())
            }),
            Self::Text(values) => values[row]
                .clone()
                .map_or(CellKey::Missing, CellKey::Text),
            Self::Flag(values) => CellKey::Flag(values[row]),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum CellKey {
    Missing,
    Number(u64),
    Text(String),
    Flag(bool),
}

/// Ordered collection of equal-length named columns.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Frame {
    columns: IndexMap<String, Column>,
    height: usize,
}

impl Frame {
    /// Empty frame with no columns and no rows.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a frame, checking that every column has the same length.
    pub fn from_columns<I, S>(columns: I) -> Result<Self>
    where
        I: IntoIterator<Item = (S, Column)>,
        S: Into<String>,
    {
        let mut frame = Self::new();
        for (name, column) in columns {
            frame.set_column(name, column)?;
        }
        Ok(frame)
    }

    /// Number of rows.
    #[must_use]
    pub const fn height(&self) -> usize {
        self.height
    }

    /// Number of columns.
    #[must_use]
    pub fn width(&self) -> usize {
        self.columns.len()
    }

    /// Column names in order.
    #[must_use]
    pub fn column_names(&self) -> Vec<String> {
        self.columns.keys().cloned().collect()
    }

    /// Looks a column up by name.
    #[must_use]
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.get(name)
    }

    /// Position of a column.
    #[must_use]
    pub fn position(&self, name: &str) -> Option<usize> {
        self.columns.get_index_of(name)
    }

    /// Iterates `(name, column)` pairs in order.
    pub fn columns(&self) -> impl Iterator<Item = (&str, &Column)> {
        self.columns.iter().map(|(name, column)| (name.as_str(), column))
    }

    /// Mutable access to every column, in order.
    pub fn columns_mut(&mut self) -> impl Iterator<Item = (&str, &mut Column)> {
        self.columns
            .iter_mut()
            .map(|(name, column)| (name.as_str(), column))
    }

    /// Returns a column or a [`PipelineError::MissingColumn`] naming `context`.
    pub fn require(&self, name: &str, context: &str) -> Result<&Column> {
        self.columns
            .get(name)
            .ok_or_else(|| PipelineError::missing_column(name, context))
    }

    /// Inserts or replaces a column, keeping the position of a replaced one.
    pub fn set_column(&mut self, name: impl Into<String>, column: Column) -> Result<()> {
        let name = name.into();
        self.check_height(&name, &column)?;
        self.columns.insert(name, column);
        Ok(())
    }

    /// Inserts a column at `index`, shifting later columns right.
    pub fn insert_column(
        &mut self,
        index: usize,
        name: impl Into<String>,
        column: Column,
    ) -> Result<()> {
        let name = name.into();
        self.check_height(&name, &column)?;
        let index = index.min(self.columns.len());
        self.columns.shift_insert(index, name, column);
        Ok(())
    }

    /// Removes a column, preserving the order of the rest.
    pub fn drop_column(&mut self, name: &str) -> Option<Column> {
        let removed = self.columns.shift_remove(name);
        if self.columns.is_empty() {
            self.height = 0;
        }
        removed
    }

    /// New frame holding the given rows, in the given order.
    #[must_use]
    pub fn take_rows(&self, rows: &[usize]) -> Self {
        Self {
            columns: self
                .columns
                .iter()
                .map(|(name, column)| (name.clone(), column.take(rows)))
                .collect(),
            height: rows.len(),
        }
    }

    /// Contiguous row slice `[start, end)`.
    #[must_use]
    pub fn slice(&self, start: usize, end: usize) -> Self {
        let end = end.min(self.height);
        let start = start.min(end);
        self.take_rows(&(start..end).collect::<Vec<_>>())
    }

    /// Drops rows that repeat an earlier row exactly, keeping the first occurrence.
    #[must_use]
    pub fn drop_duplicates(&self) -> Self {
        let mut seen = HashSet::with_capacity(self.height);
        let keep: Vec<usize> = (0..self.height)
            .filter(|&row| {
                let key: Vec<CellKey> = self.columns.values().map(|col| col.key(row)).collect();
                seen.insert(key)
            })
            .collect();
        self.take_rows(&keep)
    }

    /// Concatenates frames vertically. The result has the union of the
    /// columns in first-seen order; cells of absent columns are missing.
    pub fn concat<'a>(frames: impl IntoIterator<Item = &'a Self>) -> Result<Self> {
        let mut combined = Self::new();
        for frame in frames {
            let offset = combined.height;
            for (name, column) in &frame.columns {
                if !combined.columns.contains_key(name) {
                    combined
                        .columns
                        .insert(name.clone(), Column::missing(offset, column));
                }
            }
            for (name, column) in &mut combined.columns {
                if let Some(incoming) = frame.columns.get(name) {
                    column.append(incoming);
                } else {
                    let filler = Column::missing(frame.height, column);
                    column.append(&filler);
                }
            }
            combined.height = offset + frame.height;
            for (name, column) in &combined.columns {
                if column.len() != combined.height {
                    return Err(PipelineError::RaggedColumn {
                        column: name.clone(),
                        expected: combined.height,
                        found: column.len(),
                    });
                }
            }
        }
        Ok(combined)
    }

    /// Reads a headed, comma-separated file. A column is numeric when every
    /// non-empty cell parses as a number; empty cells and `NaN` are missing.
    pub fn read_csv(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_path(path)
            .map_err(|err| PipelineError::csv(path, err))?;
        let headers: Vec<String> = reader
            .headers()
            .map_err(|err| PipelineError::csv(path, err))?
            .iter()
            .map(|h| h.trim().to_string())
            .collect();
        let mut raw: Vec<Vec<Option<String>>> = vec![Vec::new(); headers.len()];
        for record in reader.records() {
            let record = record.map_err(|err| PipelineError::csv(path, err))?;
            for (idx, cells) in raw.iter_mut().enumerate() {
                let cell = record.get(idx).map(str::trim).unwrap_or_default();
                cells.push((!cell.is_empty()).then(|| cell.to_string()));
            }
        }
        let mut frame = Self::new();
        for (name, cells) in headers.into_iter().zip(raw) {
            frame.set_column(name, infer_column(cells))?;
        }
        Ok(frame)
    }

    /// Writes the frame with a header row and no index column, creating
    /// parent directories and overwriting any existing file.
    pub fn write_csv(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| PipelineError::io(parent, err))?;
        }
        let mut writer = csv::Writer::from_path(path).map_err(|err| PipelineError::csv(path, err))?;
        writer
            .write_record(self.columns.keys())
            .map_err(|err| PipelineError::csv(path, err))?;
        for row in 0..self.height {
            let cells = self
                .columns
                .values()
                .map(|column| column.cell(row).unwrap_or_default());
            writer
                .write_record(cells)
                .map_err(|err| PipelineError::csv(path, err))?;
        }
        writer
            .flush()
            .map_err(|err| PipelineError::io(path, err))?;
        Ok(())
    }

    fn check_height(&mut self, name: &str, column: &Column) -> Result<()> {
        let replacing_only = self.columns.len() == 1 && self.columns.contains_key(name);
        if self.columns.is_empty() || replacing_only {
            self.height = column.len();
            return Ok(());
        }
        if column.len() != self.height {
            return Err(PipelineError::RaggedColumn {
                column: name.to_string(),
                expected: self.height,
                found: column.len(),
            });
        }
        Ok(())
    }
}

/// Parses a numeric cell; `NaN` counts as missing.
#[must_use]
pub fn parse_number(cell: &str) -> Option<f64> {
    cell.trim().parse::<f64>().ok().filter(|v| !v.is_nan())
}

fn infer_column(cells: Vec<Option<String>>) -> Column {
    let numeric = cells.iter().flatten().all(|cell| cell.parse::<f64>().is_ok());
    if numeric {
        Column::Numeric(
            cells
                .iter()
                .map(|cell| cell.as_deref().and_then(parse_number))
                .collect(),
        )
    } else {
        Column::Text(cells)
    }
}

fn format_number(value: f64) -> String {
    value.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn numeric(values: &[Option<f64>]) -> Column {
        Column::Numeric(values.to_vec())
    }

    #[test]
    fn rejects_ragged_columns() {
        let err = Frame::from_columns([
            ("a", numeric(&[Some(1.0), Some(2.0)])),
            ("b", numeric(&[Some(1.0)])),
        ])
        .unwrap_err();
        assert!(matches!(err, PipelineError::RaggedColumn { .. }));
    }

    #[test]
    fn csv_round_trip_infers_types_and_missing_cells() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("in.csv");
        fs::write(&path, "time_ms,cpu,name\n1000,0.5,a\n2000,,b\n3000,NaN,\n").unwrap();
        let frame = Frame::read_csv(&path).unwrap();
        assert_eq!(frame.height(), 3);
        assert_eq!(frame.column_names(), vec!["time_ms", "cpu", "name"]);
        assert_eq!(
            frame.column("cpu"),
            Some(&numeric(&[Some(0.5), None, None]))
        );
        assert!(matches!(frame.column("name"), Some(Column::Text(_))));

        let out = dir.path().join("nested/out.csv");
        frame.write_csv(&out).unwrap();
        assert_eq!(
            fs::read_to_string(&out).unwrap(),
            "time_ms,cpu,name\n1000,0.5,a\n2000,,b\n3000,,\n"
        );
    }

    #[test]
    fn concat_unions_columns_in_first_seen_order() {
        let left = Frame::from_columns([("a", numeric(&[Some(1.0)])), ("b", numeric(&[Some(2.0)]))])
            .unwrap();
        let right = Frame::from_columns([("c", numeric(&[Some(3.0)])), ("a", numeric(&[Some(4.0)]))])
            .unwrap();
        let combined = Frame::concat([&left, &right]).unwrap();
        assert_eq!(combined.column_names(), vec!["a", "b", "c"]);
        assert_eq!(combined.height(), 2);
        assert_eq!(combined.column("a"), Some(&numeric(&[Some(1.0), Some(4.0)])));
        assert_eq!(combined.column("b"), Some(&numeric(&[Some(2.0), None])));
        assert_eq!(combined.column("c"), Some(&numeric(&[None, Some(3.0)])));
    }

    #[test]
    fn drop_duplicates_keeps_first_occurrence() {
        let frame = Frame::from_columns([
            ("x", numeric(&[Some(1.0), Some(1.0), Some(2.0), Some(-0.0), Some(0.0)])),
            (
                "s",
                Column::Text(vec![
                    Some("a".into()),
                    Some("a".into()),
                    Some("a".into()),
                    None,
                    None,
                ]),
            ),
        ])
        .unwrap();
        let deduped = frame.drop_duplicates();
        assert_eq!(deduped.height(), 3);
        assert_eq!(
            deduped.column("x"),
            Some(&numeric(&[Some(1.0), Some(2.0), Some(-0.0)]))
        );
    }

    #[test]
    fn insert_and_drop_keep_order() {
        let mut frame = Frame::from_columns([("a", numeric(&[Some(1.0)])), ("c", numeric(&[Some(3.0)]))])
            .unwrap();
        frame.insert_column(1, "b", numeric(&[Some(2.0)])).unwrap();
        assert_eq!(frame.column_names(), vec!["a", "b", "c"]);
        frame.drop_column("a");
        assert_eq!(frame.column_names(), vec!["b", "c"]);
        assert_eq!(frame.position("c"), Some(1));
    }
}
