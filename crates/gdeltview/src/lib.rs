#![forbid(unsafe_code)]

//! Facade over the gdeltview workspace.
//!
//! The usual flow: fetch a country's event rows from a [`Store`], wrap them
//! in a [`QueryView`], accumulate filters and aggregations from user input,
//! then [`QueryView::resolve`] into the table handed to the charting layer.

pub use gv_columnar::{Column, ColumnError, CompareOp, ValidityMask};
pub use gv_frame::{DataFrame, FrameError};
pub use gv_store::{Country, GeoTag, NewGdeltRecord, Store, StoreError};
pub use gv_types::{DType, NullKind, Scalar, TypeError};
pub use gv_view::{
    AggExpr, BucketRank, BucketRule, FilterPredicate, QueryView, Reducer, ViewError,
};
