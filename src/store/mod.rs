//! Backing key-value store collaborators.
//!
//! The index layer never owns the primary store. It consumes four narrow
//! capabilities: point lookups of prior row state, batched writes to a table,
//! range scans, and table lifecycle. [`memory::MemoryStore`] implements all of
//! them in process.

pub mod memory;

use std::{future::Future, io, time::Duration};

use bytes::Bytes;
use futures_core::Stream;
use thiserror::Error;

use crate::{
    cell::{Cell, Mutation, TableName},
    column::ColumnReference,
    timestamp::Timestamp,
};

pub use self::memory::MemoryStore;

/// Visible cells of one row, as returned by a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    pub key: Bytes,
    pub cells: Vec<Cell>,
}

/// Shape of a table to create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDescriptor {
    pub name: TableName,
    pub family: Bytes,
    /// Cells older than this are eligible for expiry. `None` keeps them forever.
    pub ttl: Option<Duration>,
}

/// Point lookup of the current state of a row, used to find stale index
/// entries.
pub trait RowLookup: Send + Sync {
    /// Visible cells of `columns` in `row` written at or below `max_ts`, or at
    /// any version when `max_ts` is `None`.
    fn get(
        &self,
        table: &TableName,
        row: &[u8],
        columns: &[ColumnReference],
        max_ts: Option<Timestamp>,
    ) -> impl Future<Output = Result<Vec<Cell>, StoreError>> + Send;
}

/// Batched writes of index mutations.
pub trait IndexWriter: Send + Sync {
    /// Apply `mutations` to `table` in order.
    fn batch_write(
        &self,
        table: &TableName,
        mutations: Vec<Mutation>,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;
}

/// Range scans over a table.
pub trait TableScanner: Send + Sync {
    /// Rows with keys in `[start, stop)`; an empty `stop` scans to the end.
    fn scan(
        &self,
        table: TableName,
        start: Bytes,
        stop: Bytes,
    ) -> impl Stream<Item = Result<Row, StoreError>> + Send + '_;
}

/// Table lifecycle.
pub trait TableAdmin: Send + Sync {
    fn exists(&self, table: &TableName) -> impl Future<Output = Result<bool, StoreError>> + Send;

    /// Create `descriptor.name`. Fails with [`StoreError::TableExists`] if it is
    /// already there.
    fn create(
        &self,
        descriptor: TableDescriptor,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;
}

/// Failure reported by the backing store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store io error: {0}")]
    Io(#[from] io::Error),
    #[error("table not found: {0}")]
    TableNotFound(TableName),
    #[error("table already exists: {0}")]
    TableExists(TableName),
    #[error("{failed} of {total} mutations rejected by {table}: {reason}")]
    Rejected {
        table: TableName,
        failed: usize,
        total: usize,
        reason: String,
    },
}
