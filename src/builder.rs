//! Derivation of the index mutations for a batch of data mutations.

use std::collections::{btree_map, BTreeMap, BTreeSet, HashMap};

use bytes::Bytes;

use crate::{
    cell::{Mutation, TableName},
    codec::{IndexCodec, IndexMetaData, IndexUpdate},
    observability::log_debug,
    row_state::{RowIndexState, RowStateError},
    store::RowLookup,
    timestamp::Timestamp,
};

/// Index mutations grouped by destination table.
///
/// Within a table, mutations keep the order they were pushed in.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexMutationBatch {
    tables: BTreeMap<TableName, Vec<Mutation>>,
}

impl IndexMutationBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, table: TableName, mutation: Mutation) {
        self.tables.entry(table).or_default().push(mutation);
    }

    /// Append every mutation of `other` after the ones already queued.
    pub fn extend(&mut self, other: IndexMutationBatch) {
        for (table, mutations) in other.tables {
            self.tables.entry(table).or_default().extend(mutations);
        }
    }

    pub fn get(&self, table: &TableName) -> Option<&[Mutation]> {
        self.tables.get(table).map(Vec::as_slice)
    }

    pub fn tables(&self) -> impl Iterator<Item = &TableName> {
        self.tables.keys()
    }

    /// Number of destination tables.
    pub fn table_count(&self) -> usize {
        self.tables.len()
    }

    /// Number of mutations across all tables.
    pub fn mutation_count(&self) -> usize {
        self.tables.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn into_inner(self) -> BTreeMap<TableName, Vec<Mutation>> {
        self.tables
    }
}

impl From<BTreeMap<TableName, Vec<Mutation>>> for IndexMutationBatch {
    fn from(tables: BTreeMap<TableName, Vec<Mutation>>) -> Self {
        Self { tables }
    }
}

impl IntoIterator for IndexMutationBatch {
    type Item = (TableName, Vec<Mutation>);
    type IntoIter = btree_map::IntoIter<TableName, Vec<Mutation>>;

    fn into_iter(self) -> Self::IntoIter {
        self.tables.into_iter()
    }
}

/// Drives one [`RowIndexState`] per data mutation through an [`IndexCodec`].
///
/// Cells of a mutation are replayed one timestamp at a time, oldest first.
/// For each timestamp the prior row is read with the pending cells staged but
/// not applied to find stale entries, then the cells are applied and the
/// current entries are derived. A delete of an entry that the same timestamp
/// writes again is dropped, as the put would otherwise be shadowed by it.
pub struct IndexBuilder<'a, L, C, M> {
    lookup: &'a L,
    table: TableName,
    codec: C,
    meta: M,
}

impl<'a, L, C, M> IndexBuilder<'a, L, C, M>
where
    L: RowLookup,
    C: IndexCodec,
    M: IndexMetaData,
{
    pub fn new(lookup: &'a L, table: impl Into<TableName>, codec: C, meta: M) -> Self {
        Self {
            lookup,
            table: table.into(),
            codec,
            meta,
        }
    }

    pub fn codec(&self) -> &C {
        &self.codec
    }

    pub fn table(&self) -> &TableName {
        &self.table
    }

    /// Index mutations for every mutation of `mutations`, in order.
    pub async fn batch_index_updates(
        &self,
        mutations: &[Mutation],
    ) -> Result<IndexMutationBatch, RowStateError> {
        let mut batch = IndexMutationBatch::new();
        for mutation in mutations {
            batch.extend(self.index_updates(mutation).await?);
        }
        Ok(batch)
    }

    /// Index mutations keeping the indexes of one data row in step with
    /// `mutation`.
    pub async fn index_updates(
        &self,
        mutation: &Mutation,
    ) -> Result<IndexMutationBatch, RowStateError> {
        let mut batch = IndexMutationBatch::new();
        if mutation.is_empty() || !self.codec.is_enabled(mutation) {
            return Ok(batch);
        }

        let mut state = RowIndexState::new(self.lookup, self.table.clone(), mutation.clone());
        for ts in mutation.timestamps() {
            state.reset_tracked_columns();
            state.set_pending_update(mutation.cells_at(ts));
            state.set_timestamp_ceiling(ts);
            let mut deletes = self.codec.index_deletes(&mut state, &self.meta).await?;

            state.apply_pending_update();
            state.reset_tracked_columns();
            state.set_timestamp_ceiling(ts.next());
            let upserts = self.codec.index_upserts(&mut state, &self.meta).await?;
            let superseded = self.superseded_entries(&mut state, &upserts).await?;

            deletes.retain(|delete| {
                !upserts.iter().any(|upsert| {
                    upsert.table == delete.table && upsert.mutation.row() == delete.mutation.row()
                })
            });
            log_debug!(
                component = "builder",
                event = "index_updates",
                table = %self.table,
                row = ?mutation.row(),
                ts = %ts,
                deletes = deletes.len(),
                upserts = upserts.len(),
                superseded = superseded.len(),
            );
            for update in deletes.into_iter().chain(upserts) {
                batch.push(update.table, update.mutation);
            }
            for (table, cleanup) in superseded {
                batch.push(table, cleanup);
            }
        }
        Ok(batch)
    }

    /// Deletes for entries in `upserts` that a newer version of the row,
    /// already in the store, no longer produces.
    ///
    /// Each such entry is deleted at the timestamp of that next newer version,
    /// so it stays visible for reads between the two versions.
    async fn superseded_entries(
        &self,
        state: &mut RowIndexState<'a, L>,
        upserts: &[IndexUpdate],
    ) -> Result<Vec<(TableName, Mutation)>, RowStateError> {
        let newer = upserts
            .iter()
            .filter_map(|upsert| upsert.tracker.next_newer_ts())
            .collect::<BTreeSet<_>>();
        if newer.is_empty() {
            return Ok(Vec::new());
        }

        let mut entries_at: HashMap<Timestamp, Vec<IndexUpdate>> = HashMap::new();
        for ts in newer {
            state.reset_tracked_columns();
            state.set_timestamp_ceiling(ts.next());
            let entries = self.codec.index_upserts(state, &self.meta).await?;
            entries_at.insert(ts, entries);
        }

        let mut cleanups = Vec::new();
        for upsert in upserts {
            let Some(ts) = upsert.tracker.next_newer_ts() else {
                continue;
            };
            let still_current = entries_at.get(&ts).is_some_and(|entries| {
                entries.iter().any(|entry| {
                    entry.table == upsert.table && entry.mutation.row() == upsert.mutation.row()
                })
            });
            if still_current {
                continue;
            }
            let families = upsert
                .mutation
                .cells()
                .iter()
                .map(|cell| cell.family.clone())
                .collect::<BTreeSet<Bytes>>();
            let cleanup = families
                .into_iter()
                .fold(Mutation::new(upsert.mutation.row().clone()), |cleanup, family| {
                    cleanup.delete_family(family, ts)
                });
            cleanups.push((upsert.table.clone(), cleanup));
        }
        Ok(cleanups)
    }
}
