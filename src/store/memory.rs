//! In-process multi-version store.

use std::{ops::Bound, sync::Arc};

use bytes::{BufMut, Bytes, BytesMut};
use crossbeam_skiplist::SkipMap;
use futures_core::Stream;

use crate::{
    cell::{Cell, Mutation, TableName},
    column::ColumnReference,
    memstore::{CellKey, OverlayStore},
    store::{IndexWriter, Row, RowLookup, StoreError, TableAdmin, TableDescriptor, TableScanner},
    timestamp::Timestamp,
};

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct StoredKey {
    row: Bytes,
    cell: CellKey,
}

#[derive(Debug)]
struct MemTable {
    descriptor: TableDescriptor,
    cells: SkipMap<StoredKey, Cell>,
}

impl MemTable {
    fn new(descriptor: TableDescriptor) -> Self {
        Self {
            descriptor,
            cells: SkipMap::new(),
        }
    }

    fn apply(&self, mutation: Mutation) {
        let row = mutation.row().clone();
        for cell in mutation.into_cells() {
            let key = StoredKey {
                row: row.clone(),
                cell: CellKey::of(&cell),
            };
            self.cells.insert(key, cell);
        }
    }

    /// Raw cells, delete markers included, of the first row at or after
    /// `lower`.
    fn next_row(&self, lower: &Bytes) -> Option<(Bytes, Vec<Cell>)> {
        let start = StoredKey {
            row: lower.clone(),
            cell: CellKey::first(),
        };
        let first = self
            .cells
            .range((Bound::Included(&start), Bound::Unbounded))
            .next()?;
        let row = first.key().row.clone();
        let cells = self.row_cells(&row);
        Some((row, cells))
    }

    fn row_cells(&self, row: &Bytes) -> Vec<Cell> {
        let start = StoredKey {
            row: row.clone(),
            cell: CellKey::first(),
        };
        self.cells
            .range((Bound::Included(&start), Bound::Unbounded))
            .take_while(|entry| &entry.key().row == row)
            .map(|entry| entry.value().clone())
            .collect()
    }

    fn visible(
        cells: Vec<Cell>,
        columns: &[ColumnReference],
        max_ts: Option<Timestamp>,
    ) -> Vec<Cell> {
        let overlay = OverlayStore::new();
        for cell in cells {
            overlay.add(cell, true);
        }
        let ceiling = max_ts.map_or(Timestamp::LATEST, Timestamp::next);
        overlay.column_cursor(columns, ceiling, None).collect()
    }
}

/// Tables kept in memory, each an ordered multi-version cell map.
///
/// Delete markers are stored like any other cell and applied on read, so the
/// history of a row stays inspectable through [`MemoryStore::raw_cells`].
/// Table TTLs are recorded but cells never expire.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    tables: Arc<SkipMap<TableName, Arc<MemTable>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a table unless it exists, with a single default family and no
    /// TTL.
    pub fn ensure_table(&self, name: impl Into<TableName>) {
        let name = name.into();
        let descriptor = TableDescriptor {
            name: name.clone(),
            family: Bytes::from_static(b"0"),
            ttl: None,
        };
        self.tables
            .get_or_insert(name, Arc::new(MemTable::new(descriptor)));
    }

    pub fn descriptor(&self, table: &TableName) -> Option<TableDescriptor> {
        self.tables
            .get(table)
            .map(|entry| entry.value().descriptor.clone())
    }

    /// Every stored cell of `row`, delete markers included.
    pub fn raw_cells(&self, table: &TableName, row: &[u8]) -> Result<Vec<Cell>, StoreError> {
        let table = self.table(table)?;
        Ok(table.row_cells(&Bytes::copy_from_slice(row)))
    }

    /// Row keys of `table` that have at least one visible cell.
    pub fn row_keys(&self, table: &TableName) -> Result<Vec<Bytes>, StoreError> {
        let table = self.table(table)?;
        let mut keys = Vec::new();
        let mut lower = Bytes::new();
        while let Some((row, cells)) = table.next_row(&lower) {
            lower = row_successor(&row);
            let families = row_families(&cells);
            if !MemTable::visible(cells, &families, None).is_empty() {
                keys.push(row);
            }
        }
        Ok(keys)
    }

    fn table(&self, table: &TableName) -> Result<Arc<MemTable>, StoreError> {
        self.tables
            .get(table)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| StoreError::TableNotFound(table.clone()))
    }
}

fn row_families(cells: &[Cell]) -> Vec<ColumnReference> {
    let mut families = cells
        .iter()
        .map(|cell| cell.family.clone())
        .collect::<Vec<_>>();
    families.sort();
    families.dedup();
    families
        .into_iter()
        .map(ColumnReference::whole_family)
        .collect()
}

/// Smallest row key strictly greater than `row`.
fn row_successor(row: &[u8]) -> Bytes {
    let mut next = BytesMut::with_capacity(row.len() + 1);
    next.put_slice(row);
    next.put_u8(0);
    next.freeze()
}

impl RowLookup for MemoryStore {
    async fn get(
        &self,
        table: &TableName,
        row: &[u8],
        columns: &[ColumnReference],
        max_ts: Option<Timestamp>,
    ) -> Result<Vec<Cell>, StoreError> {
        let table = self.table(table)?;
        let cells = table.row_cells(&Bytes::copy_from_slice(row));
        Ok(MemTable::visible(cells, columns, max_ts))
    }
}

impl IndexWriter for MemoryStore {
    async fn batch_write(
        &self,
        table: &TableName,
        mutations: Vec<Mutation>,
    ) -> Result<(), StoreError> {
        let table = self.table(table)?;
        for mutation in mutations {
            table.apply(mutation);
        }
        Ok(())
    }
}

impl TableScanner for MemoryStore {
    fn scan(
        &self,
        table: TableName,
        start: Bytes,
        stop: Bytes,
    ) -> impl Stream<Item = Result<Row, StoreError>> + Send + '_ {
        async_stream::try_stream! {
            let table = self.table(&table)?;
            let mut lower = start;
            while let Some((key, cells)) = table.next_row(&lower) {
                if !stop.is_empty() && key >= stop {
                    break;
                }
                lower = row_successor(&key);
                let families = row_families(&cells);
                let cells = MemTable::visible(cells, &families, None);
                if !cells.is_empty() {
                    yield Row { key, cells };
                }
            }
        }
    }
}

impl TableAdmin for MemoryStore {
    async fn exists(&self, table: &TableName) -> Result<bool, StoreError> {
        Ok(self.tables.contains_key(table))
    }

    async fn create(&self, descriptor: TableDescriptor) -> Result<(), StoreError> {
        let name = descriptor.name.clone();
        let table = Arc::new(MemTable::new(descriptor));
        let entry = self.tables.get_or_insert(name.clone(), table.clone());
        if Arc::ptr_eq(entry.value(), &table) {
            Ok(())
        } else {
            Err(StoreError::TableExists(name))
        }
    }
}
