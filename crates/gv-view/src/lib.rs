#![forbid(unsafe_code)]

//! Deferred-expression query building over a borrowed [`DataFrame`].
//!
//! A [`QueryView`] accumulates filter predicates, at most one time-bucketing
//! rule, and an ordered list of aggregation expressions, then evaluates the
//! whole configuration in one [`QueryView::resolve`] pass. Registration is
//! fail-fast: a column is validated before any pending state is touched, so
//! a rejected call leaves the view exactly as it was.

use std::collections::HashMap;

use chrono::{Datelike, NaiveDate};
use gv_columnar::{Column, ColumnError, CompareOp};
use gv_frame::{DataFrame, FrameError};
use gv_types::{DType, Scalar, TypeError};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum ViewError {
    #[error("column name '{column}' not found in data view")]
    UnknownColumn { column: String },
    #[error("unable to apply grouping based on input value '{value}'")]
    InvalidRank { value: String },
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error(transparent)]
    Column(#[from] ColumnError),
}

/// Calendar resolution a time-bucketing rule groups by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BucketRank {
    Year,
    Month,
    Day,
}

impl BucketRank {
    fn from_token(token: Option<&str>) -> Result<Self, ViewError> {
        match token {
            Some("Year") => Ok(Self::Year),
            Some("Month") => Ok(Self::Month),
            Some("Day") => Ok(Self::Day),
            other => Err(ViewError::InvalidRank {
                value: other.map_or_else(|| "None".to_owned(), ToOwned::to_owned),
            }),
        }
    }

    /// Format string the caller uses to render the bucket column.
    #[must_use]
    pub fn display_format(self) -> &'static str {
        match self {
            Self::Year => "YYYY",
            Self::Month => "YYYY MMMM",
            Self::Day => "YYYY MMM DD",
        }
    }

    /// Truncate a date to the start of its calendar bucket.
    #[must_use]
    pub fn truncate(self, date: NaiveDate) -> NaiveDate {
        let truncated = match self {
            Self::Year => date.with_day(1).and_then(|d| d.with_month(1)),
            Self::Month => date.with_day(1),
            Self::Day => Some(date),
        };
        // Day 1 of an existing month is always representable.
        truncated.unwrap_or(date)
    }
}

/// Named aggregation operator, carrying its canonical label prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reducer {
    Sum,
    Min,
    Max,
    Count,
    Mean,
    Median,
}

impl Reducer {
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Sum => "sum",
            Self::Min => "min",
            Self::Max => "max",
            Self::Count => "count",
            Self::Mean => "mean",
            Self::Median => "median",
        }
    }

    fn apply(self, column: &Column) -> Result<Scalar, ColumnError> {
        match self {
            Self::Sum => column.sum(),
            Self::Min => Ok(column.min()),
            Self::Max => Ok(column.max()),
            Self::Count => Ok(column.count()),
            Self::Mean => column.mean(),
            Self::Median => column.median(),
        }
    }
}

/// A pending `column op bound` filter, ANDed with its peers at resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterPredicate {
    pub column: String,
    pub op: CompareOp,
    pub bound: Scalar,
}

/// The active time-bucketing rule; at most one per view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketRule {
    pub column: String,
    pub rank: BucketRank,
}

impl BucketRule {
    #[must_use]
    pub fn display_format(&self) -> &'static str {
        self.rank.display_format()
    }
}

/// A pending derived-column specification, labeled at registration time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AggExpr {
    Reduce {
        column: String,
        reducer: Reducer,
        label: String,
    },
    Implode {
        column: String,
        dtype: DType,
        label: String,
    },
}

impl AggExpr {
    #[must_use]
    pub fn label(&self) -> &str {
        match self {
            Self::Reduce { label, .. } | Self::Implode { label, .. } => label,
        }
    }

    fn evaluate(&self, bucket: &Column) -> Result<Scalar, ColumnError> {
        match self {
            Self::Reduce { reducer, .. } => reducer.apply(bucket),
            Self::Implode { dtype, .. } => bucket.implode(*dtype),
        }
    }

    fn column(&self) -> &str {
        match self {
            Self::Reduce { column, .. } | Self::Implode { column, .. } => column,
        }
    }
}

/// Accumulates a declarative, re-evaluable query over one fixed source table.
///
/// The view borrows its source and never mutates it; several views may read
/// the same table at once. [`QueryView::resolve`] leaves the pending state
/// intact, so the same configuration can be re-executed after further edits.
#[derive(Debug)]
pub struct QueryView<'a> {
    source: &'a DataFrame,
    filters: Vec<FilterPredicate>,
    bucket: Option<BucketRule>,
    aggregations: Vec<AggExpr>,
}

impl<'a> QueryView<'a> {
    #[must_use]
    pub fn new(source: &'a DataFrame) -> Self {
        Self {
            source,
            filters: Vec::new(),
            bucket: None,
            aggregations: Vec::new(),
        }
    }

    /// Confirm that `name` exists in the source table.
    pub fn validate_column(&self, name: &str) -> Result<(), ViewError> {
        self.source_column(name).map(|_| ())
    }

    /// `(min, max)` over the named column of the *unfiltered* source table,
    /// for seeding UI bounds. Pending filters are not consulted.
    pub fn extract_range(&self, column: &str) -> Result<(Scalar, Scalar), ViewError> {
        let column = self.source_column(column)?;
        Ok((column.min(), column.max()))
    }

    /// Sum over the named column of the unfiltered source table.
    pub fn extract_total(&self, column: &str) -> Result<Scalar, ViewError> {
        Ok(self.source_column(column)?.sum()?)
    }

    /// Install the time-bucketing rule for `column` from a raw rank token
    /// (`"Year"`, `"Month"`, or `"Day"`), returning the display format for
    /// the eventual bucket column. Any other token fails and clears a
    /// previously-set rule rather than keeping it silently active.
    pub fn set_time_bucket(
        &mut self,
        rank: Option<&str>,
        column: &str,
    ) -> Result<&'static str, ViewError> {
        self.validate_column(column)?;

        match BucketRank::from_token(rank) {
            Ok(rank) => {
                self.bucket = Some(BucketRule {
                    column: column.to_owned(),
                    rank,
                });
                Ok(rank.display_format())
            }
            Err(err) => {
                self.bucket = None;
                Err(err)
            }
        }
    }

    /// Append a `column >= bound` predicate.
    pub fn add_filter_ge(&mut self, column: &str, bound: Scalar) -> Result<(), ViewError> {
        self.push_filter(column, CompareOp::Ge, bound)
    }

    /// Append a `column <= bound` predicate.
    pub fn add_filter_le(&mut self, column: &str, bound: Scalar) -> Result<(), ViewError> {
        self.push_filter(column, CompareOp::Le, bound)
    }

    /// Append a reduction over `column` and return its output label,
    /// `{reducer}_{column}`.
    pub fn add_reduction(&mut self, column: &str, reducer: Reducer) -> Result<String, ViewError> {
        self.validate_column(column)?;

        let label = format!("{}_{}", reducer.name(), column);
        self.aggregations.push(AggExpr::Reduce {
            column: column.to_owned(),
            reducer,
            label: label.clone(),
        });
        Ok(label)
    }

    /// Append a collect-into-sequence expression over `column`, casting
    /// elements to `Float64`, and return its output label,
    /// `{column}_implode`. Carries a temporal micro-series into a single
    /// summary row, e.g. for sparkline rendering.
    pub fn add_sequence(&mut self, column: &str) -> Result<String, ViewError> {
        self.add_sequence_with_dtype(column, DType::Float64)
    }

    /// [`QueryView::add_sequence`] with an explicit element dtype.
    pub fn add_sequence_with_dtype(
        &mut self,
        column: &str,
        dtype: DType,
    ) -> Result<String, ViewError> {
        self.validate_column(column)?;

        let label = format!("{column}_implode");
        self.aggregations.push(AggExpr::Implode {
            column: column.to_owned(),
            dtype,
            label: label.clone(),
        });
        Ok(label)
    }

    #[must_use]
    pub fn filters(&self) -> &[FilterPredicate] {
        &self.filters
    }

    #[must_use]
    pub fn bucket_rule(&self) -> Option<&BucketRule> {
        self.bucket.as_ref()
    }

    #[must_use]
    pub fn aggregations(&self) -> &[AggExpr] {
        &self.aggregations
    }

    /// Evaluate the pending configuration against the source table.
    ///
    /// Filters apply first, as one conjunction. With a bucketing rule set,
    /// the filtered rows are partitioned into calendar buckets and every
    /// aggregation expression runs per bucket; the output carries the bucket
    /// key column first and one column per expression in registration order,
    /// one row per non-empty bucket in first-seen order. Without a rule the
    /// filtered rows are returned as-is and registered aggregations are
    /// ignored.
    pub fn resolve(&self) -> Result<DataFrame, ViewError> {
        let kept = self.filtered_row_positions();

        if let Some(rule) = &self.bucket {
            return self.resolve_buckets(rule, &kept);
        }

        if !self.aggregations.is_empty() {
            let unused = self
                .aggregations
                .iter()
                .map(AggExpr::label)
                .collect::<Vec<_>>();
            warn!(
                ?unused,
                "aggregation expressions ignored: no time bucket rule is set"
            );
        }

        if self.filters.is_empty() {
            return Ok(self.source.clone());
        }
        Ok(self.source.select_rows(&kept)?)
    }

    fn push_filter(
        &mut self,
        column: &str,
        op: CompareOp,
        bound: Scalar,
    ) -> Result<(), ViewError> {
        self.validate_column(column)?;

        self.filters.push(FilterPredicate {
            column: column.to_owned(),
            op,
            bound,
        });
        Ok(())
    }

    fn source_column(&self, name: &str) -> Result<&Column, ViewError> {
        self.source
            .column(name)
            .ok_or_else(|| ViewError::UnknownColumn {
                column: name.to_owned(),
            })
    }

    /// Positions of the source rows satisfying every pending predicate.
    fn filtered_row_positions(&self) -> Vec<usize> {
        let mut keep = vec![true; self.source.rows()];

        for predicate in &self.filters {
            // Registration validated the column; the source is immutable.
            if let Some(column) = self.source.column(&predicate.column) {
                let mask = column.compare_mask(predicate.op, &predicate.bound);
                for (slot, pass) in keep.iter_mut().zip(mask) {
                    *slot = *slot && pass;
                }
            }
        }

        keep.iter()
            .enumerate()
            .filter_map(|(idx, keep)| keep.then_some(idx))
            .collect()
    }

    fn resolve_buckets(&self, rule: &BucketRule, kept: &[usize]) -> Result<DataFrame, ViewError> {
        let key_column = self.source_column(&rule.column)?;
        if !matches!(key_column.dtype(), DType::Date | DType::Null) {
            return Err(ViewError::Column(ColumnError::Type(TypeError::InvalidCast {
                from: key_column.dtype(),
                to: DType::Date,
            })));
        }

        // Partition in first-seen order; rows with a missing key are dropped.
        let mut ordering = Vec::<NaiveDate>::new();
        let mut buckets = HashMap::<NaiveDate, Vec<usize>>::new();
        for &row in kept {
            let Some(Scalar::Date(date)) = key_column.value(row) else {
                continue;
            };
            let key = rule.rank.truncate(*date);
            buckets
                .entry(key)
                .or_insert_with(|| {
                    ordering.push(key);
                    Vec::new()
                })
                .push(row);
        }

        let mut key_values = Vec::with_capacity(ordering.len());
        let mut agg_values = vec![Vec::with_capacity(ordering.len()); self.aggregations.len()];
        for key in &ordering {
            let Some(rows) = buckets.get(key) else {
                continue;
            };

            key_values.push(Scalar::Date(*key));
            for (expr, out) in self.aggregations.iter().zip(agg_values.iter_mut()) {
                let bucket = self.source_column(expr.column())?.take(rows)?;
                out.push(expr.evaluate(&bucket)?);
            }
        }

        let mut columns = Vec::with_capacity(1 + self.aggregations.len());
        columns.push((rule.column.clone(), Column::new(DType::Date, key_values)?));
        for (expr, values) in self.aggregations.iter().zip(agg_values) {
            columns.push((expr.label().to_owned(), Column::from_values(values)?));
        }

        Ok(DataFrame::new(columns)?)
    }
}
