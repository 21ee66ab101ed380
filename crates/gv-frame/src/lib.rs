#![forbid(unsafe_code)]

use gv_columnar::{Column, ColumnError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("column '{column}' has {found} rows but the frame holds {expected}")]
    LengthMismatch {
        column: String,
        expected: usize,
        found: usize,
    },
    #[error("duplicate column name '{column}'")]
    DuplicateColumn { column: String },
    #[error(transparent)]
    Column(#[from] ColumnError),
}

/// A named, insertion-ordered collection of equal-length columns.
///
/// Rows are positional; column order is the order columns were supplied in
/// and is preserved through every operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataFrame {
    columns: Vec<(String, Column)>,
    rows: usize,
}

impl DataFrame {
    pub fn new(columns: Vec<(String, Column)>) -> Result<Self, FrameError> {
        let rows = columns.first().map_or(0, |(_, column)| column.len());

        for (name, column) in &columns {
            if column.len() != rows {
                return Err(FrameError::LengthMismatch {
                    column: name.clone(),
                    expected: rows,
                    found: column.len(),
                });
            }
        }

        for (idx, (name, _)) in columns.iter().enumerate() {
            if columns[..idx].iter().any(|(seen, _)| seen == name) {
                return Err(FrameError::DuplicateColumn {
                    column: name.clone(),
                });
            }
        }

        Ok(Self { columns, rows })
    }

    #[must_use]
    pub fn empty() -> Self {
        Self {
            columns: Vec::new(),
            rows: 0,
        }
    }

    #[must_use]
    pub fn rows(&self) -> usize {
        self.rows
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    #[must_use]
    pub fn columns(&self) -> &[(String, Column)] {
        &self.columns
    }

    #[must_use]
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|(name, _)| name.as_str()).collect()
    }

    #[must_use]
    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|(seen, _)| seen == name)
    }

    #[must_use]
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns
            .iter()
            .find(|(seen, _)| seen == name)
            .map(|(_, column)| column)
    }

    /// Gather the rows at `positions` (in that order) across every column.
    pub fn select_rows(&self, positions: &[usize]) -> Result<Self, FrameError> {
        let columns = self
            .columns
            .iter()
            .map(|(name, column)| Ok((name.clone(), column.take(positions)?)))
            .collect::<Result<Vec<_>, ColumnError>>()?;

        Ok(Self {
            columns,
            rows: positions.len(),
        })
    }

    /// Equality up to missing-value representation, for tests and snapshot
    /// comparisons. Column names and order must match exactly.
    #[must_use]
    pub fn semantic_eq(&self, other: &Self) -> bool {
        self.rows == other.rows
            && self.columns.len() == other.columns.len()
            && self
                .columns
                .iter()
                .zip(&other.columns)
                .all(|((left_name, left), (right_name, right))| {
                    left_name == right_name && left.semantic_eq(right)
                })
    }
}

#[cfg(test)]
mod tests {
    use gv_columnar::Column;
    use gv_types::{NullKind, Scalar};

    use super::{DataFrame, FrameError};

    fn sample_frame() -> DataFrame {
        DataFrame::new(vec![
            (
                "a".to_owned(),
                Column::from_values(vec![Scalar::Int64(1), Scalar::Int64(2), Scalar::Int64(3)])
                    .expect("a"),
            ),
            (
                "b".to_owned(),
                Column::from_values(vec![
                    Scalar::Utf8("a".to_owned()),
                    Scalar::Utf8("b".to_owned()),
                    Scalar::Utf8("c".to_owned()),
                ])
                .expect("b"),
            ),
        ])
        .expect("frame")
    }

    #[test]
    fn construction_rejects_ragged_columns() {
        let err = DataFrame::new(vec![
            (
                "a".to_owned(),
                Column::from_values(vec![Scalar::Int64(1)]).expect("a"),
            ),
            (
                "b".to_owned(),
                Column::from_values(vec![Scalar::Int64(1), Scalar::Int64(2)]).expect("b"),
            ),
        ])
        .expect_err("must fail");

        assert!(matches!(err, FrameError::LengthMismatch { .. }));
    }

    #[test]
    fn construction_rejects_duplicate_names() {
        let err = DataFrame::new(vec![
            (
                "a".to_owned(),
                Column::from_values(vec![Scalar::Int64(1)]).expect("a"),
            ),
            (
                "a".to_owned(),
                Column::from_values(vec![Scalar::Int64(2)]).expect("a again"),
            ),
        ])
        .expect_err("must fail");

        assert!(matches!(err, FrameError::DuplicateColumn { .. }));
    }

    #[test]
    fn column_order_follows_insertion() {
        let frame = sample_frame();
        assert_eq!(frame.column_names(), vec!["a", "b"]);
    }

    #[test]
    fn select_rows_preserves_order_and_values() {
        let frame = sample_frame();
        let out = frame.select_rows(&[2, 0]).expect("select");

        assert_eq!(out.rows(), 2);
        assert_eq!(
            out.column("a").expect("a").values(),
            &[Scalar::Int64(3), Scalar::Int64(1)]
        );
        assert_eq!(
            out.column("b").expect("b").values(),
            &[Scalar::Utf8("c".to_owned()), Scalar::Utf8("a".to_owned())]
        );
    }

    #[test]
    fn semantic_eq_ignores_missing_value_representation() {
        let left = DataFrame::new(vec![(
            "v".to_owned(),
            Column::from_values(vec![Scalar::Float64(1.0), Scalar::Float64(f64::NAN)])
                .expect("left"),
        )])
        .expect("left frame");
        let right = DataFrame::new(vec![(
            "v".to_owned(),
            Column::from_values(vec![Scalar::Float64(1.0), Scalar::Null(NullKind::NaN)])
                .expect("right"),
        )])
        .expect("right frame");

        assert!(left.semantic_eq(&right));
    }

    #[test]
    fn empty_frame_has_no_rows_or_columns() {
        let frame = DataFrame::empty();
        assert!(frame.is_empty());
        assert!(frame.column_names().is_empty());
    }
}
