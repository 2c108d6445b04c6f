//! Column-oriented table keyed by a zoned timestamp.
//!
//! Every column declares whether it is numeric or categorical when it is
//! created. Resampling and fusion branch on that declaration instead of
//! inspecting values.

use crate::error::RecordingError;
use chrono::DateTime;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// A metadata value such as a gender code or a BMI reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl Scalar {
    /// Parse a CSV cell, preferring a number when the text is numeric.
    pub fn parse(cell: &str) -> Option<Scalar> {
        let trimmed = cell.trim();
        if trimmed.is_empty() {
            return None;
        }
        if let Ok(value) = trimmed.parse::<f64>() {
            return value.is_finite().then_some(Scalar::Number(value));
        }
        match trimmed {
            "true" | "True" => Some(Scalar::Bool(true)),
            "false" | "False" => Some(Scalar::Bool(false)),
            _ => Some(Scalar::Text(trimmed.to_string())),
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Bool(b) => write!(f, "{}", b),
            Scalar::Number(n) => write!(f, "{}", n),
            Scalar::Text(s) => f.write_str(s),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Numeric,
    Categorical,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ColumnData {
    Numeric(Vec<Option<f64>>),
    Categorical(Vec<Option<Scalar>>),
}

impl ColumnData {
    pub fn kind(&self) -> ColumnKind {
        match self {
            ColumnData::Numeric(_) => ColumnKind::Numeric,
            ColumnData::Categorical(_) => ColumnKind::Categorical,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            ColumnData::Numeric(values) => values.len(),
            ColumnData::Categorical(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// An all-undefined column of the given kind.
    pub fn undefined(kind: ColumnKind, len: usize) -> Self {
        match kind {
            ColumnKind::Numeric => ColumnData::Numeric(vec![None; len]),
            ColumnKind::Categorical => ColumnData::Categorical(vec![None; len]),
        }
    }

    /// Gather rows by index; `None` produces an undefined cell.
    pub fn gather(&self, indices: &[Option<usize>]) -> ColumnData {
        match self {
            ColumnData::Numeric(values) => ColumnData::Numeric(
                indices
                    .iter()
                    .map(|idx| idx.and_then(|i| values[i]))
                    .collect(),
            ),
            ColumnData::Categorical(values) => ColumnData::Categorical(
                indices
                    .iter()
                    .map(|idx| idx.and_then(|i| values[i].clone()))
                    .collect(),
            ),
        }
    }

    /// Render one cell for tabular output. Undefined cells render empty.
    pub fn format_cell(&self, row: usize, float_precision: Option<usize>) -> String {
        match self {
            ColumnData::Numeric(values) => match (values[row], float_precision) {
                (Some(v), Some(p)) => format!("{:.*}", p, v),
                (Some(v), None) => v.to_string(),
                (None, _) => String::new(),
            },
            ColumnData::Categorical(values) => values[row]
                .as_ref()
                .map(|s| s.to_string())
                .unwrap_or_default(),
        }
    }

    fn extend_from(&mut self, other: &ColumnData) {
        match (self, other) {
            (ColumnData::Numeric(a), ColumnData::Numeric(b)) => a.extend_from_slice(b),
            (ColumnData::Categorical(a), ColumnData::Categorical(b)) => {
                a.extend(b.iter().cloned())
            }
            (ColumnData::Categorical(a), ColumnData::Numeric(b)) => {
                a.extend(b.iter().map(|v| v.map(Scalar::Number)))
            }
            (ColumnData::Numeric(a), ColumnData::Categorical(b)) => a.extend(b.iter().map(|v| {
                match v {
                    Some(Scalar::Number(n)) => Some(*n),
                    _ => None,
                }
            })),
        }
    }

    fn extend_undefined(&mut self, count: usize) {
        match self {
            ColumnData::Numeric(values) => values.extend(std::iter::repeat(None).take(count)),
            ColumnData::Categorical(values) => {
                values.extend(std::iter::repeat(None).take(count))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub data: ColumnData,
}

impl Column {
    pub fn numeric(name: impl Into<String>, values: Vec<Option<f64>>) -> Self {
        Self {
            name: name.into(),
            data: ColumnData::Numeric(values),
        }
    }

    pub fn categorical(name: impl Into<String>, values: Vec<Option<Scalar>>) -> Self {
        Self {
            name: name.into(),
            data: ColumnData::Categorical(values),
        }
    }

    /// Numeric column holding the same value on every row.
    pub fn broadcast(name: impl Into<String>, value: Option<f64>, len: usize) -> Self {
        Self::numeric(name, vec![value; len])
    }

    /// Categorical column holding the same value on every row.
    pub fn constant(name: impl Into<String>, value: Option<Scalar>, len: usize) -> Self {
        Self::categorical(name, vec![value; len])
    }

    pub fn kind(&self) -> ColumnKind {
        self.data.kind()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_numeric(&self) -> Option<&[Option<f64>]> {
        match &self.data {
            ColumnData::Numeric(values) => Some(values),
            ColumnData::Categorical(_) => None,
        }
    }

    pub fn as_categorical(&self) -> Option<&[Option<Scalar>]> {
        match &self.data {
            ColumnData::Categorical(values) => Some(values),
            ColumnData::Numeric(_) => None,
        }
    }
}

/// Timestamped table. All columns have exactly one cell per timestamp.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Frame {
    timestamps: Vec<DateTime<Tz>>,
    columns: Vec<Column>,
}

impl Frame {
    pub fn new(timestamps: Vec<DateTime<Tz>>) -> Self {
        Self {
            timestamps,
            columns: Vec::new(),
        }
    }

    /// Build a frame from prepared columns, checking their lengths.
    pub fn with_columns(
        timestamps: Vec<DateTime<Tz>>,
        columns: Vec<Column>,
    ) -> Result<Self, RecordingError> {
        let mut frame = Self::new(timestamps);
        for column in columns {
            frame.push_column(column)?;
        }
        Ok(frame)
    }

    /// Append a column, replacing any existing column of the same name.
    pub fn push_column(&mut self, column: Column) -> Result<(), RecordingError> {
        if column.len() != self.timestamps.len() {
            return Err(RecordingError::LengthMismatch {
                expected: self.timestamps.len(),
                actual: column.len(),
            });
        }
        match self.columns.iter_mut().find(|c| c.name == column.name) {
            Some(existing) => *existing = column,
            None => self.columns.push(column),
        }
        Ok(())
    }

    pub fn remove_column(&mut self, name: &str) -> Option<Column> {
        let idx = self.columns.iter().position(|c| c.name == name)?;
        Some(self.columns.remove(idx))
    }

    pub fn timestamps(&self) -> &[DateTime<Tz>] {
        &self.timestamps
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn numeric(&self, name: &str) -> Option<&[Option<f64>]> {
        self.column(name).and_then(Column::as_numeric)
    }

    pub fn categorical(&self, name: &str) -> Option<&[Option<Scalar>]> {
        self.column(name).and_then(Column::as_categorical)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    pub fn schema(&self) -> Vec<(&str, ColumnKind)> {
        self.columns
            .iter()
            .map(|c| (c.name.as_str(), c.kind()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    /// Stack frames vertically. Columns missing from a frame are left
    /// undefined for its rows; column order follows first appearance.
    pub fn concat(frames: Vec<Frame>) -> Frame {
        let mut out = Frame::default();
        for frame in frames {
            let existing_rows = out.len();
            let incoming_rows = frame.len();
            let mut seen: HashSet<String> = HashSet::new();

            for column in frame.columns {
                seen.insert(column.name.clone());
                match out.columns.iter_mut().find(|c| c.name == column.name) {
                    Some(target) => target.data.extend_from(&column.data),
                    None => {
                        let mut data = ColumnData::undefined(column.kind(), existing_rows);
                        data.extend_from(&column.data);
                        out.columns.push(Column {
                            name: column.name,
                            data,
                        });
                    }
                }
            }
            for target in out.columns.iter_mut() {
                if !seen.contains(&target.name) {
                    target.data.extend_undefined(incoming_rows);
                }
            }
            out.timestamps.extend(frame.timestamps);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use chrono_tz::Asia::Bangkok;

    fn ts(secs: i64) -> DateTime<Tz> {
        Bangkok.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn scalar_parse_prefers_numbers() {
        assert_eq!(Scalar::parse("22.5"), Some(Scalar::Number(22.5)));
        assert_eq!(Scalar::parse(" F "), Some(Scalar::Text("F".into())));
        assert_eq!(Scalar::parse(""), None);
        assert_eq!(Scalar::parse("nan"), None);
    }

    #[test]
    fn push_column_rejects_wrong_length() {
        let mut frame = Frame::new(vec![ts(0), ts(1)]);
        let err = frame
            .push_column(Column::numeric("x", vec![Some(1.0)]))
            .unwrap_err();
        assert!(matches!(
            err,
            RecordingError::LengthMismatch {
                expected: 2,
                actual: 1
            }
        ));
    }

    #[test]
    fn push_column_replaces_same_name() {
        let mut frame = Frame::new(vec![ts(0)]);
        frame.push_column(Column::numeric("x", vec![Some(1.0)])).unwrap();
        frame.push_column(Column::numeric("x", vec![Some(2.0)])).unwrap();
        assert_eq!(frame.columns().len(), 1);
        assert_eq!(frame.numeric("x").unwrap(), &[Some(2.0)]);
    }

    #[test]
    fn concat_fills_missing_columns() {
        let a = Frame::with_columns(
            vec![ts(0)],
            vec![
                Column::numeric("x", vec![Some(1.0)]),
                Column::constant("id", Some(Scalar::Text("S01".into())), 1),
            ],
        )
        .unwrap();
        let b = Frame::with_columns(vec![ts(1), ts(2)], vec![Column::numeric("y", vec![Some(5.0), None])])
            .unwrap();

        let out = Frame::concat(vec![a, b]);
        assert_eq!(out.len(), 3);
        assert_eq!(out.numeric("x").unwrap(), &[Some(1.0), None, None]);
        assert_eq!(out.numeric("y").unwrap(), &[None, Some(5.0), None]);
        assert_eq!(out.categorical("id").unwrap()[0], Some(Scalar::Text("S01".into())));
        assert_eq!(out.categorical("id").unwrap()[2], None);
    }

    #[test]
    fn gather_leaves_unmatched_rows_undefined() {
        let data = ColumnData::Numeric(vec![Some(1.0), Some(2.0)]);
        let gathered = data.gather(&[Some(1), None, Some(0)]);
        assert_eq!(gathered, ColumnData::Numeric(vec![Some(2.0), None, Some(1.0)]));
    }
}
