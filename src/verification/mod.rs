//! Bookkeeping of index verification runs.
//!
//! A verification run compares index rows against the data table region by
//! region. Each region's counters are stored as one row of the result table,
//! keyed by the run's scan-max timestamp so a run can be read back and summed
//! with a single prefix scan.

mod repository;
pub mod result;
pub mod row_key;

use bytes::Bytes;
use thiserror::Error;

pub use self::{
    repository::{ResultScan, VerificationResultRepository},
    result::{PhaseResult, VerificationResult, VerifyPhase},
    row_key::{generate_row_key, next_row_key_after_prefix, split_row_key, ResultRowKey},
};
use crate::store::StoreError;

/// A result row that could not be read back.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RowKeyError {
    #[error("result row key {row:?} has {found} fields, expected 5")]
    FieldCount { row: Bytes, found: usize },
    #[error("result row key {row:?} does not start with a decimal timestamp")]
    Timestamp { row: Bytes },
    #[error("result row {row:?}: counter {counter:?} holds non-decimal value {value:?}")]
    Counter {
        row: Bytes,
        counter: Bytes,
        value: Bytes,
    },
}

#[derive(Debug, Error)]
pub enum RepositoryError {
    /// Writes need the index table; the repository was built read-only.
    #[error("verification result repository is read-only")]
    ReadOnly,
    #[error("verification result store error: {0}")]
    Store(#[from] StoreError),
    /// Some rows of the run could not be parsed. `result` sums the rows that
    /// could.
    #[error("{} malformed verification result row(s) in run {}", .errors.len(), .result.scan_max_ts)]
    MalformedRows {
        result: VerificationResult,
        errors: Vec<RowKeyError>,
    },
}
