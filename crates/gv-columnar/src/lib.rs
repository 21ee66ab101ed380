#![forbid(unsafe_code)]

use std::cmp::Ordering;

use gv_types::{
    DType, NullKind, Scalar, TypeError, cast_scalar, common_dtype, infer_dtype,
    partial_cmp_scalars,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidityMask {
    bits: Vec<bool>,
}

impl ValidityMask {
    #[must_use]
    pub fn from_values(values: &[Scalar]) -> Self {
        let bits = values.iter().map(|value| !value.is_missing()).collect();
        Self { bits }
    }

    #[must_use]
    pub fn bits(&self) -> &[bool] {
        &self.bits
    }
}

/// Comparison operator a filter bound is applied with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    Ge,
    Le,
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ColumnError {
    #[error("column length mismatch: left={left}, right={right}")]
    LengthMismatch { left: usize, right: usize },
    #[error("{reducer} reduction is unsupported for dtype {dtype:?}")]
    UnsupportedReduction { reducer: String, dtype: DType },
    #[error(transparent)]
    Type(#[from] TypeError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    dtype: DType,
    values: Vec<Scalar>,
    validity: ValidityMask,
}

impl Column {
    /// Construct a column, coercing values to the target dtype.
    pub fn new(dtype: DType, values: Vec<Scalar>) -> Result<Self, ColumnError> {
        let needs_coercion = values.iter().any(|v| {
            let d = v.dtype();
            d != dtype && d != DType::Null
        });

        let coerced = if needs_coercion {
            values
                .iter()
                .map(|value| cast_scalar(value, dtype))
                .collect::<Result<Vec<_>, _>>()?
        } else {
            // No coercion needed: values already match dtype.
            // Only remap Null variants to the dtype-specific missing marker.
            values
                .into_iter()
                .map(|value| match value {
                    Scalar::Null(_) => Scalar::missing_for_dtype(dtype),
                    other => other,
                })
                .collect()
        };

        let validity = ValidityMask::from_values(&coerced);

        Ok(Self {
            dtype,
            values: coerced,
            validity,
        })
    }

    pub fn from_values(values: Vec<Scalar>) -> Result<Self, ColumnError> {
        let dtype = infer_dtype(&values)?;
        Self::new(dtype, values)
    }

    #[must_use]
    pub fn dtype(&self) -> DType {
        self.dtype
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    #[must_use]
    pub fn values(&self) -> &[Scalar] {
        &self.values
    }

    #[must_use]
    pub fn value(&self, idx: usize) -> Option<&Scalar> {
        self.values.get(idx)
    }

    #[must_use]
    pub fn validity(&self) -> &ValidityMask {
        &self.validity
    }

    /// Gather the rows at `positions` into a new column. Positions outside
    /// the column map to the dtype's missing marker.
    pub fn take(&self, positions: &[usize]) -> Result<Self, ColumnError> {
        let values = positions
            .iter()
            .map(|idx| {
                self.values
                    .get(*idx)
                    .cloned()
                    .unwrap_or_else(|| Scalar::missing_for_dtype(self.dtype))
            })
            .collect::<Vec<_>>();

        Self::new(self.dtype, values)
    }

    /// Row-wise comparison against a scalar bound. Missing values and
    /// incomparable pairs never pass.
    #[must_use]
    pub fn compare_mask(&self, op: CompareOp, bound: &Scalar) -> Vec<bool> {
        self.values
            .iter()
            .map(|value| match partial_cmp_scalars(value, bound) {
                Some(ordering) => match op {
                    CompareOp::Ge => ordering != Ordering::Less,
                    CompareOp::Le => ordering != Ordering::Greater,
                },
                None => false,
            })
            .collect()
    }

    /// Sum of the column's values, skipping missing entries. Integer and
    /// boolean columns sum to `Int64`, float columns to `Float64`; an empty
    /// or all-missing column sums to the dtype's zero.
    pub fn sum(&self) -> Result<Scalar, ColumnError> {
        match self.dtype {
            DType::Null => Ok(Scalar::Int64(0)),
            DType::Bool | DType::Int64 => {
                let mut total = 0_i64;
                for value in self.present_values() {
                    match value {
                        Scalar::Bool(v) => total += i64::from(*v),
                        Scalar::Int64(v) => total += v,
                        _ => {}
                    }
                }
                Ok(Scalar::Int64(total))
            }
            DType::Float64 => {
                let mut total = 0.0_f64;
                for value in self.present_values() {
                    if let Scalar::Float64(v) = value {
                        total += v;
                    }
                }
                Ok(Scalar::Float64(total))
            }
            dtype => Err(ColumnError::UnsupportedReduction {
                reducer: "sum".to_owned(),
                dtype,
            }),
        }
    }

    /// Smallest present value, or the dtype's missing marker when no value
    /// is present.
    #[must_use]
    pub fn min(&self) -> Scalar {
        self.extremum(Ordering::Less)
    }

    /// Largest present value, or the dtype's missing marker when no value
    /// is present.
    #[must_use]
    pub fn max(&self) -> Scalar {
        self.extremum(Ordering::Greater)
    }

    /// Number of present (non-missing) values.
    #[must_use]
    pub fn count(&self) -> Scalar {
        Scalar::Int64(self.present_values().count() as i64)
    }

    pub fn mean(&self) -> Result<Scalar, ColumnError> {
        self.require_numeric("mean")?;

        let mut total = 0.0_f64;
        let mut seen = 0_usize;
        for value in self.present_values() {
            total += value.to_f64()?;
            seen += 1;
        }

        if seen == 0 {
            return Ok(Scalar::Null(NullKind::NaN));
        }
        Ok(Scalar::Float64(total / seen as f64))
    }

    pub fn median(&self) -> Result<Scalar, ColumnError> {
        self.require_numeric("median")?;

        let mut sorted = self
            .present_values()
            .map(Scalar::to_f64)
            .collect::<Result<Vec<_>, _>>()?;
        sorted.sort_by(f64::total_cmp);

        if sorted.is_empty() {
            return Ok(Scalar::Null(NullKind::NaN));
        }

        let mid = sorted.len() / 2;
        let median = if sorted.len() % 2 == 0 {
            f64::midpoint(sorted[mid - 1], sorted[mid])
        } else {
            sorted[mid]
        };
        Ok(Scalar::Float64(median))
    }

    /// Collapse the whole column into one sequence cell, casting each
    /// element to `dtype`. Missing entries stay missing inside the sequence.
    pub fn implode(&self, dtype: DType) -> Result<Scalar, ColumnError> {
        let elements = self
            .values
            .iter()
            .map(|value| cast_scalar(value, dtype))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Scalar::List(elements))
    }

    #[must_use]
    pub fn semantic_eq(&self, other: &Self) -> bool {
        self.dtype == other.dtype
            && self.values.len() == other.values.len()
            && self
                .values
                .iter()
                .zip(&other.values)
                .all(|(left, right)| left.semantic_eq(right))
    }

    fn present_values(&self) -> impl Iterator<Item = &Scalar> {
        self.values.iter().filter(|value| !value.is_missing())
    }

    fn extremum(&self, keep: Ordering) -> Scalar {
        let mut best: Option<&Scalar> = None;
        for value in self.present_values() {
            best = match best {
                None => Some(value),
                Some(current) => match partial_cmp_scalars(value, current) {
                    Some(ordering) if ordering == keep => Some(value),
                    _ => Some(current),
                },
            };
        }

        best.cloned()
            .unwrap_or_else(|| Scalar::missing_for_dtype(self.dtype))
    }

    fn require_numeric(&self, reducer: &str) -> Result<(), ColumnError> {
        if common_dtype(self.dtype, DType::Float64).is_err() {
            return Err(ColumnError::UnsupportedReduction {
                reducer: reducer.to_owned(),
                dtype: self.dtype,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use gv_types::{DType, NullKind, Scalar};

    use super::{Column, ColumnError, CompareOp};

    fn date(year: i32, month: u32, day: u32) -> Scalar {
        Scalar::Date(NaiveDate::from_ymd_opt(year, month, day).expect("valid date"))
    }

    #[test]
    fn take_injects_missing_for_out_of_range_positions() {
        let column = Column::from_values(vec![Scalar::Int64(10), Scalar::Int64(20)])
            .expect("column should build");

        let out = column.take(&[1, 5, 0]).expect("take should work");

        assert_eq!(
            out.values(),
            &[
                Scalar::Int64(20),
                Scalar::Null(NullKind::Null),
                Scalar::Int64(10)
            ]
        );
    }

    #[test]
    fn ge_mask_drops_missing_rows() {
        let column = Column::from_values(vec![
            Scalar::Int64(1),
            Scalar::Null(NullKind::Null),
            Scalar::Int64(3),
        ])
        .expect("column");

        let mask = column.compare_mask(CompareOp::Ge, &Scalar::Int64(2));
        assert_eq!(mask, vec![false, false, true]);
    }

    #[test]
    fn le_mask_uses_inclusive_bound() {
        let column =
            Column::from_values(vec![Scalar::Int64(1), Scalar::Int64(2), Scalar::Int64(3)])
                .expect("column");

        let mask = column.compare_mask(CompareOp::Le, &Scalar::Int64(2));
        assert_eq!(mask, vec![true, true, false]);
    }

    #[test]
    fn integer_sum_skips_missing_and_stays_integer() {
        let column = Column::from_values(vec![
            Scalar::Int64(1),
            Scalar::Null(NullKind::Null),
            Scalar::Int64(3),
        ])
        .expect("column");

        assert_eq!(column.sum().expect("sum"), Scalar::Int64(4));
    }

    #[test]
    fn sum_rejects_string_columns() {
        let column = Column::from_values(vec![Scalar::Utf8("a".to_owned())]).expect("column");
        let err = column.sum().expect_err("must fail");
        assert!(matches!(
            err,
            ColumnError::UnsupportedReduction { dtype: DType::Utf8, .. }
        ));
    }

    #[test]
    fn min_max_over_dates_ignore_insertion_order() {
        let column = Column::from_values(vec![
            date(1987, 12, 12),
            date(1986, 11, 11),
            date(2000, 1, 1),
        ])
        .expect("column");

        assert_eq!(column.min(), date(1986, 11, 11));
        assert_eq!(column.max(), date(2000, 1, 1));
    }

    #[test]
    fn extremum_of_empty_column_is_missing() {
        let column = Column::new(DType::Date, Vec::new()).expect("column");
        assert_eq!(column.min(), Scalar::Null(NullKind::NaT));
    }

    #[test]
    fn count_ignores_missing_values() {
        let column = Column::from_values(vec![
            Scalar::Float64(1.0),
            Scalar::Float64(f64::NAN),
            Scalar::Float64(3.0),
        ])
        .expect("column");

        assert_eq!(column.count(), Scalar::Int64(2));
    }

    #[test]
    fn median_averages_middle_pair_for_even_counts() {
        let column =
            Column::from_values(vec![Scalar::Int64(1), Scalar::Int64(2)]).expect("column");
        assert_eq!(column.median().expect("median"), Scalar::Float64(1.5));
    }

    #[test]
    fn median_of_odd_count_is_middle_value() {
        let column =
            Column::from_values(vec![Scalar::Int64(3), Scalar::Int64(1), Scalar::Int64(2)])
                .expect("column");
        assert_eq!(column.median().expect("median"), Scalar::Float64(2.0));
    }

    #[test]
    fn implode_casts_elements_to_target_dtype() {
        let column =
            Column::from_values(vec![Scalar::Int64(1), Scalar::Int64(2), Scalar::Int64(3)])
                .expect("column");

        let cell = column.implode(DType::Float64).expect("implode");
        assert_eq!(
            cell,
            Scalar::List(vec![
                Scalar::Float64(1.0),
                Scalar::Float64(2.0),
                Scalar::Float64(3.0)
            ])
        );
    }

    #[test]
    fn implode_keeps_missing_entries_in_sequence() {
        let column = Column::from_values(vec![Scalar::Int64(1), Scalar::Null(NullKind::Null)])
            .expect("column");

        let cell = column.implode(DType::Float64).expect("implode");
        assert_eq!(
            cell,
            Scalar::List(vec![Scalar::Float64(1.0), Scalar::Null(NullKind::NaN)])
        );
    }
}
