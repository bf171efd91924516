//! Derivation of index mutations from a row's state.
//!
//! [`RowIndexState`] only exposes the merged, time-bounded view of a row. An
//! [`IndexCodec`] consumes that view to decide which index entries to put and
//! which stale ones to delete.

use std::{future::Future, sync::Arc};

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::{
    cell::{Cell, CellKind, Mutation, TableName},
    column::ColumnReference,
    memstore::ValueGetter,
    row_state::{RowIndexState, RowStateError},
    store::RowLookup,
    timestamp::Timestamp,
    tracker::ColumnTracker,
};

/// Qualifier of the marker column every index row carries.
pub const EMPTY_COLUMN_QUALIFIER: &[u8] = b"_0";

/// Per-table facts that decide how much prior state an update needs.
pub trait IndexMetaData {
    /// Whether stale index entries can exist for `mutation`, which requires
    /// looking up the prior row.
    fn requires_prior_row_state(&self, mutation: &Mutation) -> bool;
}

/// Index metadata of a data table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableMetaData {
    /// Rows are written once and never updated in place, so plain inserts
    /// cannot leave stale index entries behind.
    pub immutable_rows: bool,
}

impl TableMetaData {
    pub fn mutable() -> Self {
        Self {
            immutable_rows: false,
        }
    }

    pub fn immutable() -> Self {
        Self {
            immutable_rows: true,
        }
    }
}

impl IndexMetaData for TableMetaData {
    fn requires_prior_row_state(&self, mutation: &Mutation) -> bool {
        !self.immutable_rows || !mutation.is_insert_only()
    }
}

/// One derived change to an index table.
#[derive(Debug, Clone)]
pub struct IndexUpdate {
    pub table: TableName,
    pub mutation: Mutation,
    /// Tracker of the column set the update was derived from.
    pub tracker: Arc<ColumnTracker>,
}

/// Turns row state into index mutations.
pub trait IndexCodec {
    /// Deletes for index entries made stale by the pending update. Called with
    /// the ceiling at the update's timestamp and the update not yet applied.
    fn index_deletes<'s, L, M>(
        &self,
        state: &mut RowIndexState<'s, L>,
        meta: &M,
    ) -> impl Future<Output = Result<Vec<IndexUpdate>, RowStateError>>
    where
        L: RowLookup,
        M: IndexMetaData + ?Sized;

    /// Puts for the index entries of the row with the update applied.
    fn index_upserts<'s, L, M>(
        &self,
        state: &mut RowIndexState<'s, L>,
        meta: &M,
    ) -> impl Future<Output = Result<Vec<IndexUpdate>, RowStateError>>
    where
        L: RowLookup,
        M: IndexMetaData + ?Sized;

    /// Whether `mutation` concerns any index at all.
    fn is_enabled(&self, _mutation: &Mutation) -> bool {
        true
    }
}

/// Definition of one index maintained by [`CoveredColumnIndexCodec`].
#[derive(Debug, Clone)]
pub struct IndexSpec {
    pub table: TableName,
    /// Columns whose values make up the index row key, in key order.
    pub indexed: Vec<ColumnReference>,
    /// Columns copied into the index row so reads need not visit the data row.
    pub covered: Vec<ColumnReference>,
}

impl IndexSpec {
    pub fn new(table: impl Into<TableName>, indexed: Vec<ColumnReference>) -> Self {
        Self {
            table: table.into(),
            indexed,
            covered: Vec::new(),
        }
    }

    pub fn covering(mut self, covered: Vec<ColumnReference>) -> Self {
        self.covered = covered;
        self
    }

    fn columns(&self) -> Vec<ColumnReference> {
        self.indexed
            .iter()
            .chain(self.covered.iter())
            .cloned()
            .collect()
    }
}

/// Codec whose index row key is the length-prefixed values of the indexed
/// columns followed by the data row key.
///
/// A row with none of its indexed columns set has no index entry.
#[derive(Debug, Clone)]
pub struct CoveredColumnIndexCodec {
    specs: Vec<IndexSpec>,
    family: Bytes,
}

impl CoveredColumnIndexCodec {
    pub fn new(specs: Vec<IndexSpec>, family: impl Into<Bytes>) -> Self {
        Self {
            specs,
            family: family.into(),
        }
    }

    pub fn specs(&self) -> &[IndexSpec] {
        &self.specs
    }

    /// Index row key for data row `row` with the given indexed values, or
    /// `None` when a value is too long for its `u32` length prefix.
    pub fn index_row_key(row: &[u8], values: &[Option<&Bytes>]) -> Option<Bytes> {
        let len = values
            .iter()
            .map(|value| 4 + value.map_or(0, |v| v.len()))
            .sum::<usize>();
        let mut key = BytesMut::with_capacity(len + row.len());
        for value in values {
            match value {
                Some(value) => {
                    key.put_u32(length_prefix(value.len())?);
                    key.put_slice(value);
                }
                None => key.put_u32(0),
            }
        }
        key.put_slice(row);
        Some(key.freeze())
    }

    /// Split an index row key built for `columns` indexed values back into the
    /// values and the data row key.
    pub fn split_index_row_key(key: &[u8], columns: usize) -> Option<(Vec<Bytes>, Bytes)> {
        let mut buf = key;
        let mut values = Vec::with_capacity(columns);
        for _ in 0..columns {
            if buf.remaining() < 4 {
                return None;
            }
            let len = buf.get_u32() as usize;
            if buf.remaining() < len {
                return None;
            }
            values.push(Bytes::copy_from_slice(&buf[..len]));
            buf.advance(len);
        }
        Some((values, Bytes::copy_from_slice(buf)))
    }

    fn covered_qualifier(column: &ColumnReference) -> Bytes {
        let qualifier = column.qualifier().cloned().unwrap_or_default();
        let mut name = BytesMut::with_capacity(column.family().len() + 1 + qualifier.len());
        name.put_slice(column.family());
        name.put_u8(b':');
        name.put_slice(&qualifier);
        name.freeze()
    }

    /// Index row key for `spec` as seen by `getter`, or `None` when no indexed
    /// column has a value.
    fn entry_key(spec: &IndexSpec, getter: &ValueGetter) -> Result<Option<Bytes>, RowStateError> {
        let values = spec
            .indexed
            .iter()
            .map(|column| getter.latest_value(column))
            .collect::<Vec<_>>();
        if values.iter().all(Option::is_none) {
            return Ok(None);
        }
        match Self::index_row_key(getter.row_key(), &values) {
            Some(key) => Ok(Some(key)),
            None => Err(RowStateError::IndexValueTooLarge {
                table: spec.table.clone(),
                row: getter.row_key().clone(),
            }),
        }
    }

    /// Put of the entry for `spec`. Covered columns the pending update
    /// deleted are deleted from the entry too, as the entry may already carry
    /// them.
    fn upsert(
        &self,
        spec: &IndexSpec,
        getter: &ValueGetter,
        pending: &[Cell],
        ts: Timestamp,
    ) -> Result<Option<Mutation>, RowStateError> {
        let Some(key) = Self::entry_key(spec, getter)? else {
            return Ok(None);
        };
        let mut mutation =
            Mutation::new(key).put(self.family.clone(), EMPTY_COLUMN_QUALIFIER, ts, Bytes::new());
        for column in &spec.covered {
            let qualifier = Self::covered_qualifier(column);
            if let Some(value) = getter.latest_value(column) {
                mutation = mutation.put(self.family.clone(), qualifier, ts, value.clone());
            } else if pending.iter().any(|cell| deletes(cell, column)) {
                mutation = mutation.delete_columns(self.family.clone(), qualifier, ts);
            }
        }
        Ok(Some(mutation))
    }
}

impl IndexCodec for CoveredColumnIndexCodec {
    async fn index_deletes<'s, L, M>(
        &self,
        state: &mut RowIndexState<'s, L>,
        meta: &M,
    ) -> Result<Vec<IndexUpdate>, RowStateError>
    where
        L: RowLookup,
        M: IndexMetaData + ?Sized,
    {
        let ts = state.timestamp();
        let mut updates = Vec::new();
        for spec in &self.specs {
            let (getter, tracker) = state.value_getter(&spec.columns(), false, true, meta).await?;
            let Some(getter) = getter else {
                continue;
            };
            let Some(key) = Self::entry_key(spec, &getter)? else {
                continue;
            };
            updates.push(IndexUpdate {
                table: spec.table.clone(),
                mutation: Mutation::new(key).delete_family(self.family.clone(), ts),
                tracker,
            });
        }
        Ok(updates)
    }

    async fn index_upserts<'s, L, M>(
        &self,
        state: &mut RowIndexState<'s, L>,
        meta: &M,
    ) -> Result<Vec<IndexUpdate>, RowStateError>
    where
        L: RowLookup,
        M: IndexMetaData + ?Sized,
    {
        let ts = state
            .pending_update()
            .iter()
            .map(|cell| cell.ts)
            .max()
            .unwrap_or_else(|| state.timestamp());
        let pending = state.pending_update().to_vec();
        let mut updates = Vec::new();
        for spec in &self.specs {
            let (getter, tracker) = state
                .value_getter(&spec.columns(), false, false, meta)
                .await?;
            let Some(getter) = getter else {
                continue;
            };
            let Some(mutation) = self.upsert(spec, &getter, &pending, ts)? else {
                continue;
            };
            updates.push(IndexUpdate {
                table: spec.table.clone(),
                mutation,
                tracker,
            });
        }
        Ok(updates)
    }

    fn is_enabled(&self, mutation: &Mutation) -> bool {
        self.specs.iter().any(|spec| {
            spec.columns().iter().any(|column| {
                mutation
                    .cells()
                    .iter()
                    .any(|cell| column.matches(cell) || deletes(cell, column))
            })
        })
    }
}

/// Whether `cell` is a delete marker covering `column`.
fn deletes(cell: &Cell, column: &ColumnReference) -> bool {
    match cell.kind {
        CellKind::Put => false,
        CellKind::DeleteFamily => column.matches_family(&cell.family),
        CellKind::DeleteColumns | CellKind::DeleteCell => column.matches(cell),
    }
}

fn length_prefix(len: usize) -> Option<u32> {
    u32::try_from(len).ok()
}
