//! Secondary index maintenance for row-oriented, multi-version key-value
//! stores.
//!
//! For every data mutation, [`IndexBuilder`] loads just enough prior row state
//! through a per-row [`RowIndexState`] to derive the index entries to delete
//! and to write. [`IndexCommitter`] writes those entries to their index tables
//! in parallel, one independent task per table. Index rebuild tooling records
//! its per-region verification counters through a
//! [`VerificationResultRepository`].
//!
//! The primary store is never owned here: it is reached through the narrow
//! traits of [`store`], which [`MemoryStore`] implements in process.

mod observability;

/// Versions of cells.
pub mod timestamp;

/// Cells, mutations and table names.
pub mod cell;

/// Column references and the columns already loaded for a row.
pub mod column;

/// Requested column sets and their next-newer watermark.
pub mod tracker;

/// Single-row overlay of prior state and pending cells.
pub mod memstore;

/// Per-row state behind index update derivation.
pub mod row_state;

/// The boundary that turns row state into index mutations.
pub mod codec;

/// Index mutations for batches of data mutations.
pub mod builder;

/// Backing store collaborators.
pub mod store;

/// Parallel index table writes.
pub mod committer;

/// Verification result bookkeeping.
pub mod verification;

/// Configuration.
pub mod option;

pub use crate::{
    builder::{IndexBuilder, IndexMutationBatch},
    cell::{Cell, CellKind, Mutation, TableName},
    codec::{
        CoveredColumnIndexCodec, IndexCodec, IndexMetaData, IndexSpec, IndexUpdate, TableMetaData,
    },
    column::{ColumnReference, CoveredColumns},
    committer::{
        CommitError, FailureCause, IndexCommitter, TableFailure, WaitPolicy, WriterPool,
    },
    option::IndexOption,
    row_state::{RequestedColumns, RowIndexState, RowStateError},
    store::{MemoryStore, StoreError},
    timestamp::Timestamp,
    tracker::{ColumnTracker, TrackedColumns},
    verification::{
        RepositoryError, RowKeyError, VerificationResult, VerificationResultRepository,
        VerifyPhase,
    },
};
