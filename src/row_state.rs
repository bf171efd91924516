//! Per-row view used to derive index updates.
//!
//! A [`RowIndexState`] serves exactly one row through one mutation cycle. It
//! merges the pending mutation with just enough prior row state, loaded
//! lazily and at most once per column, and hands out time-bounded cursors
//! over the merged view.
//!
//! Not thread-safe: create one per row instead of sharing one. The tracked
//! column set is the one piece that tolerates concurrent registration.

use std::sync::Arc;

use bytes::Bytes;
use thiserror::Error;

use crate::{
    cell::{Cell, Mutation, TableName},
    codec::IndexMetaData,
    column::{ColumnReference, CoveredColumns},
    memstore::{ColumnCursor, OverlayStore, ValueGetter},
    observability::log_debug,
    store::{RowLookup, StoreError},
    timestamp::{Timestamp, EPOCH},
    tracker::{ColumnTracker, TrackedColumns},
};

/// Columns an index groups together, handed to codecs as a hint.
pub type IndexedColumnGroup = Vec<ColumnReference>;

/// Result of [`RowIndexState::request_columns`].
#[derive(Debug)]
pub struct RequestedColumns {
    /// `None` when computing delete state for a row that has no state for the
    /// requested columns, meaning there is nothing to clean up.
    pub cursor: Option<ColumnCursor>,
    /// Tracker shared by every request for the same column set.
    pub tracker: Arc<ColumnTracker>,
}

#[derive(Debug, Error)]
pub enum RowStateError {
    #[error("prior row state lookup failed for row {row:?} of {table}: {source}")]
    Lookup {
        table: TableName,
        row: Bytes,
        #[source]
        source: StoreError,
    },
    /// An indexed value does not fit the `u32` length prefix of an index row
    /// key.
    #[error("indexed value of row {row:?} is too large for an entry of {table}")]
    IndexValueTooLarge { table: TableName, row: Bytes },
}

pub struct RowIndexState<'a, L>
where
    L: RowLookup,
{
    lookup: &'a L,
    table: TableName,
    update: Mutation,
    ts: Timestamp,
    memstore: OverlayStore,
    covered: CoveredColumns,
    tracked: TrackedColumns,
    pending: Vec<Cell>,
    hints: Vec<IndexedColumnGroup>,
}

impl<'a, L> RowIndexState<'a, L>
where
    L: RowLookup,
{
    /// State for the row of `update` in data table `table`.
    ///
    /// The ceiling starts at the epoch; set it with
    /// [`RowIndexState::set_timestamp_ceiling`] before requesting columns.
    pub fn new(lookup: &'a L, table: TableName, update: Mutation) -> Self {
        Self {
            lookup,
            table,
            update,
            ts: EPOCH,
            memstore: OverlayStore::new(),
            covered: CoveredColumns::new(),
            tracked: TrackedColumns::for_trackers(),
            pending: Vec::new(),
            hints: Vec::new(),
        }
    }

    pub fn row_key(&self) -> &Bytes {
        self.update.row()
    }

    pub fn table(&self) -> &TableName {
        &self.table
    }

    pub fn mutation(&self) -> &Mutation {
        &self.update
    }

    /// Ceiling for every following lookup and cursor: only cells strictly
    /// older than `ts` are visible.
    ///
    /// Must be called before switching between the phase that cleans up the
    /// prior row and the phase that indexes the current row.
    pub fn set_timestamp_ceiling(&mut self, ts: Timestamp) {
        self.ts = ts;
    }

    pub fn timestamp(&self) -> Timestamp {
        self.ts
    }

    /// Stage `cells` as the pending update and merge them right away.
    pub fn add_pending_update(&mut self, cells: Vec<Cell>) {
        self.set_pending_update(cells);
        self.apply_pending_update();
    }

    /// Stage `cells` as the pending update without merging them.
    pub fn set_pending_update(&mut self, cells: Vec<Cell>) {
        self.pending = cells;
    }

    pub fn pending_update(&self) -> &[Cell] {
        &self.pending
    }

    /// Merge the staged pending cells, shadowing history at equal coordinates.
    pub fn apply_pending_update(&mut self) {
        for cell in &self.pending {
            self.memstore.add(cell.clone(), true);
        }
    }

    /// Remove previously merged cells; returns how many were present.
    pub fn rollback<'c, I>(&mut self, cells: I) -> usize
    where
        I: IntoIterator<Item = &'c Cell>,
    {
        cells
            .into_iter()
            .filter(|cell| self.memstore.rollback(cell))
            .count()
    }

    pub fn set_hints(&mut self, hints: Vec<IndexedColumnGroup>) {
        self.hints = hints;
    }

    pub fn hints(&self) -> &[IndexedColumnGroup] {
        &self.hints
    }

    pub fn tracked_columns(&self) -> Vec<Arc<ColumnTracker>> {
        self.tracked.values()
    }

    pub fn reset_tracked_columns(&mut self) {
        self.tracked.clear();
    }

    pub fn covered_columns(&self) -> &CoveredColumns {
        &self.covered
    }

    /// Cursor over `requested` as of the current ceiling, together with the
    /// tracker for that column set.
    ///
    /// Columns not yet covered are fetched from the backing store in one
    /// lookup when `meta` says the mutation needs prior row state. A column is
    /// never fetched twice for this row. With `ignore_newer` the lookup only
    /// sees versions at or below the ceiling, for replaying a mutation whose
    /// data write landed but whose index write did not.
    pub async fn request_columns<M>(
        &mut self,
        requested: &[ColumnReference],
        ignore_newer: bool,
        for_delete: bool,
        meta: &M,
    ) -> Result<RequestedColumns, RowStateError>
    where
        M: IndexMetaData + ?Sized,
    {
        let to_cover = self.covered.find_non_covered_columns(requested);
        let requires_prior_state = meta.requires_prior_row_state(&self.update);

        if !to_cover.is_empty() && requires_prior_state {
            let max_ts = ignore_newer.then_some(self.ts);
            log_debug!(
                component = "row_state",
                event = "prior_state_lookup",
                table = %self.table,
                row = ?self.update.row(),
                columns = to_cover.len(),
                max_ts = ?max_ts,
            );
            let cells = self
                .lookup
                .get(&self.table, self.update.row(), &to_cover, max_ts)
                .await
                .map_err(|source| RowStateError::Lookup {
                    table: self.table.clone(),
                    row: self.update.row().clone(),
                    source,
                })?;
            for cell in cells {
                self.memstore.add(cell, false);
            }
        }
        for column in to_cover {
            self.covered.add_column(column);
        }

        let tracker = self
            .tracked
            .get_or_insert(Arc::new(ColumnTracker::new(requested)));
        let cursor = self
            .memstore
            .column_cursor(requested, self.ts, Some(tracker.as_ref()));

        let absent_row_allowed =
            for_delete && (requires_prior_state || self.update.is_insert_only());
        let cursor = if absent_row_allowed && cursor.is_empty() {
            None
        } else {
            Some(cursor)
        };

        Ok(RequestedColumns { cursor, tracker })
    }

    /// Like [`RowIndexState::request_columns`], but resolves the cursor into
    /// the newest value per column.
    pub async fn value_getter<M>(
        &mut self,
        requested: &[ColumnReference],
        ignore_newer: bool,
        for_delete: bool,
        meta: &M,
    ) -> Result<(Option<ValueGetter>, Arc<ColumnTracker>), RowStateError>
    where
        M: IndexMetaData + ?Sized,
    {
        let row = self.row_key().clone();
        let RequestedColumns { cursor, tracker } = self
            .request_columns(requested, ignore_newer, for_delete, meta)
            .await?;
        Ok((cursor.map(|cursor| cursor.into_value_getter(row)), tracker))
    }
}

#[cfg(test)]
mod tests {
    use std::{
        io,
        sync::atomic::{AtomicBool, AtomicUsize, Ordering},
    };

    use super::*;
    use crate::{
        codec::TableMetaData,
        store::{IndexWriter, MemoryStore},
    };

    const DATA: &str = "data";

    /// Counts lookups and can be told to fail them.
    struct CountingLookup {
        inner: MemoryStore,
        gets: AtomicUsize,
        fail: AtomicBool,
    }

    impl CountingLookup {
        async fn with_cells(cells: Vec<Mutation>) -> Self {
            let inner = MemoryStore::new();
            inner.ensure_table(DATA);
            inner.batch_write(&DATA.into(), cells).await.unwrap();
            Self {
                inner,
                gets: AtomicUsize::new(0),
                fail: AtomicBool::new(false),
            }
        }
    }

    impl RowLookup for CountingLookup {
        async fn get(
            &self,
            table: &TableName,
            row: &[u8],
            columns: &[ColumnReference],
            max_ts: Option<Timestamp>,
        ) -> Result<Vec<Cell>, StoreError> {
            self.gets.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                return Err(StoreError::Io(io::Error::other("region offline")));
            }
            self.inner.get(table, row, columns, max_ts).await
        }
    }

    fn ts(raw: u64) -> Timestamp {
        Timestamp::new(raw)
    }

    fn value(state: &RequestedColumns) -> Option<Bytes> {
        state
            .cursor
            .as_ref()
            .and_then(|cursor| cursor.peek())
            .map(|cell| cell.value.clone())
    }

    #[tokio::test]
    async fn pending_write_shadows_prior_state() {
        let lookup =
            CountingLookup::with_cells(vec![Mutation::new("r").put("f", "q", ts(5), "old")])
                .await;
        let update = Mutation::new("r").put("f", "q", ts(10), "new");
        let column = [ColumnReference::new("f", "q")];
        let meta = TableMetaData::mutable();

        let mut state = RowIndexState::new(&lookup, DATA.into(), update.clone());
        state.add_pending_update(update.cells().to_vec());

        state.set_timestamp_ceiling(ts(11));
        let current = state
            .request_columns(&column, false, false, &meta)
            .await
            .unwrap();
        assert_eq!(value(&current).unwrap().as_ref(), b"new");

        state.set_timestamp_ceiling(ts(6));
        let prior = state
            .request_columns(&column, false, true, &meta)
            .await
            .unwrap();
        assert_eq!(value(&prior).unwrap().as_ref(), b"old");
        assert_eq!(prior.tracker.next_newer_ts(), Some(ts(10)));
    }

    #[tokio::test]
    async fn each_column_set_is_looked_up_once() {
        let lookup =
            CountingLookup::with_cells(vec![Mutation::new("r").put("f", "a", ts(1), "a")]).await;
        let update = Mutation::new("r").put("f", "a", ts(2), "b");
        let meta = TableMetaData::mutable();
        let columns = [ColumnReference::new("f", "a"), ColumnReference::new("f", "b")];

        let mut state = RowIndexState::new(&lookup, DATA.into(), update);
        state.set_timestamp_ceiling(ts(2));
        let mut trackers = Vec::new();
        for _ in 0..5 {
            let requested = state
                .request_columns(&columns, false, true, &meta)
                .await
                .unwrap();
            trackers.push(requested.tracker);
        }
        assert_eq!(lookup.gets.load(Ordering::SeqCst), 1);
        assert!(trackers.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
        assert_eq!(state.tracked_columns().len(), 1);

        // a subset is already covered, a superset only fetches the new column
        state
            .request_columns(&columns[..1], false, true, &meta)
            .await
            .unwrap();
        assert_eq!(lookup.gets.load(Ordering::SeqCst), 1);
        let wider = [
            ColumnReference::new("f", "a"),
            ColumnReference::new("f", "c"),
        ];
        state
            .request_columns(&wider, false, true, &meta)
            .await
            .unwrap();
        assert_eq!(lookup.gets.load(Ordering::SeqCst), 2);
        assert_eq!(state.covered_columns().len(), 3);
        assert_eq!(state.tracked_columns().len(), 3);
    }

    #[tokio::test]
    async fn immutable_inserts_skip_the_lookup() {
        let lookup = CountingLookup::with_cells(vec![]).await;
        let update = Mutation::new("r").put("f", "a", ts(3), "v");
        let meta = TableMetaData::immutable();
        let columns = [ColumnReference::new("f", "a")];

        let mut state = RowIndexState::new(&lookup, DATA.into(), update);
        state.set_timestamp_ceiling(ts(3));
        let prior = state
            .request_columns(&columns, false, true, &meta)
            .await
            .unwrap();

        assert_eq!(lookup.gets.load(Ordering::SeqCst), 0);
        assert!(prior.cursor.is_none());
        assert!(state.covered_columns().contains(&columns[0]));
    }

    #[tokio::test]
    async fn immutable_deletes_still_need_prior_state() {
        let lookup =
            CountingLookup::with_cells(vec![Mutation::new("r").put("f", "a", ts(1), "v")]).await;
        let update = Mutation::new("r").delete_columns("f", "a", ts(4));
        let meta = TableMetaData::immutable();

        let mut state = RowIndexState::new(&lookup, DATA.into(), update);
        state.set_timestamp_ceiling(ts(4));
        let prior = state
            .request_columns(&[ColumnReference::new("f", "a")], false, true, &meta)
            .await
            .unwrap();
        assert_eq!(lookup.gets.load(Ordering::SeqCst), 1);
        assert_eq!(value(&prior).unwrap().as_ref(), b"v");
    }

    #[tokio::test]
    async fn empty_current_state_is_an_empty_cursor() {
        let lookup = CountingLookup::with_cells(vec![]).await;
        let update = Mutation::new("r").delete_family("f", ts(4));
        let meta = TableMetaData::mutable();

        let mut state = RowIndexState::new(&lookup, DATA.into(), update);
        state.set_timestamp_ceiling(ts(5));
        let current = state
            .request_columns(&[ColumnReference::new("f", "a")], false, false, &meta)
            .await
            .unwrap();
        assert!(current.cursor.unwrap().is_empty());
    }

    #[tokio::test]
    async fn ignore_newer_bounds_the_lookup() {
        let lookup = CountingLookup::with_cells(vec![Mutation::new("r")
            .put("f", "a", ts(2), "before")
            .put("f", "a", ts(9), "after")])
        .await;
        let update = Mutation::new("r").put("f", "a", ts(5), "replayed");
        let meta = TableMetaData::mutable();
        let column = [ColumnReference::new("f", "a")];

        let mut state = RowIndexState::new(&lookup, DATA.into(), update);
        state.set_timestamp_ceiling(ts(5));
        let prior = state
            .request_columns(&column, true, true, &meta)
            .await
            .unwrap();
        assert_eq!(value(&prior).unwrap().as_ref(), b"before");
        // the newer version was never fetched, so it cannot move the watermark
        assert_eq!(prior.tracker.next_newer_ts(), None);
    }

    #[tokio::test]
    async fn lookup_failure_surfaces_and_leaves_columns_uncovered() {
        let lookup = CountingLookup::with_cells(vec![]).await;
        lookup.fail.store(true, Ordering::SeqCst);
        let update = Mutation::new("r").put("f", "a", ts(5), "v");
        let meta = TableMetaData::mutable();
        let column = [ColumnReference::new("f", "a")];

        let mut state = RowIndexState::new(&lookup, DATA.into(), update);
        state.set_timestamp_ceiling(ts(5));
        let err = state
            .request_columns(&column, false, true, &meta)
            .await
            .unwrap_err();
        assert!(matches!(err, RowStateError::Lookup { .. }));
        assert!(state.covered_columns().is_empty());

        lookup.fail.store(false, Ordering::SeqCst);
        state
            .request_columns(&column, false, true, &meta)
            .await
            .unwrap();
        assert_eq!(lookup.gets.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn rollback_removes_applied_pending_cells() {
        let lookup =
            CountingLookup::with_cells(vec![Mutation::new("r").put("f", "a", ts(5), "old")])
                .await;
        let update = Mutation::new("r").put("f", "a", ts(5), "new");
        let meta = TableMetaData::mutable();
        let column = [ColumnReference::new("f", "a")];

        let mut state = RowIndexState::new(&lookup, DATA.into(), update.clone());
        state.set_timestamp_ceiling(ts(6));
        state
            .request_columns(&column, false, true, &meta)
            .await
            .unwrap();
        state.add_pending_update(update.cells().to_vec());
        let current = state
            .request_columns(&column, false, false, &meta)
            .await
            .unwrap();
        assert_eq!(value(&current).unwrap().as_ref(), b"new");

        assert_eq!(state.rollback(update.cells()), 1);
        let current = state
            .request_columns(&column, false, false, &meta)
            .await
            .unwrap();
        assert!(current.cursor.unwrap().is_empty());
    }

    #[tokio::test]
    async fn value_getter_resolves_latest_values() {
        let lookup = CountingLookup::with_cells(vec![Mutation::new("r")
            .put("f", "a", ts(1), "a1")
            .put("f", "b", ts(1), "b1")])
        .await;
        let update = Mutation::new("r").put("f", "a", ts(3), "a3");
        let meta = TableMetaData::mutable();
        let columns = [ColumnReference::new("f", "a"), ColumnReference::new("f", "b")];

        let mut state = RowIndexState::new(&lookup, DATA.into(), update.clone());
        state.set_timestamp_ceiling(ts(4));
        state.add_pending_update(update.cells().to_vec());
        let (getter, _) = state
            .value_getter(&columns, false, false, &meta)
            .await
            .unwrap();
        let getter = getter.unwrap();
        assert_eq!(getter.latest_value(&columns[0]).unwrap().as_ref(), b"a3");
        assert_eq!(getter.latest_value(&columns[1]).unwrap().as_ref(), b"b1");
        assert_eq!(getter.row_key().as_ref(), b"r");
    }
}
