//! Row-oriented cells and mutations as exchanged with the backing store.

use std::{fmt, sync::Arc};

use bytes::Bytes;

use crate::timestamp::Timestamp;

/// Operation carried by a [`Cell`].
///
/// The declaration order is the sort order used by the overlay store: at equal
/// coordinate and timestamp, delete markers sort ahead of puts so they are
/// seen before the values they shadow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CellKind {
    /// Deletes every column of a family at or below the marker timestamp.
    DeleteFamily,
    /// Deletes every version of one column at or below the marker timestamp.
    DeleteColumns,
    /// Deletes exactly the version written at the marker timestamp.
    DeleteCell,
    /// Writes a value.
    Put,
}

impl CellKind {
    pub fn is_delete(self) -> bool {
        !matches!(self, CellKind::Put)
    }
}

/// One versioned value (or delete marker) of a row.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Cell {
    pub row: Bytes,
    pub family: Bytes,
    pub qualifier: Bytes,
    pub ts: Timestamp,
    pub kind: CellKind,
    pub value: Bytes,
}

impl Cell {
    pub fn put(
        row: impl Into<Bytes>,
        family: impl Into<Bytes>,
        qualifier: impl Into<Bytes>,
        ts: Timestamp,
        value: impl Into<Bytes>,
    ) -> Self {
        Self {
            row: row.into(),
            family: family.into(),
            qualifier: qualifier.into(),
            ts,
            kind: CellKind::Put,
            value: value.into(),
        }
    }

    pub fn delete(
        row: impl Into<Bytes>,
        family: impl Into<Bytes>,
        qualifier: impl Into<Bytes>,
        ts: Timestamp,
        kind: CellKind,
    ) -> Self {
        Self {
            row: row.into(),
            family: family.into(),
            qualifier: qualifier.into(),
            ts,
            kind,
            value: Bytes::new(),
        }
    }
}

/// A pending change to a single row: an ordered list of cells.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mutation {
    row: Bytes,
    cells: Vec<Cell>,
}

impl Mutation {
    pub fn new(row: impl Into<Bytes>) -> Self {
        Self {
            row: row.into(),
            cells: Vec::new(),
        }
    }

    pub fn put(
        mut self,
        family: impl Into<Bytes>,
        qualifier: impl Into<Bytes>,
        ts: Timestamp,
        value: impl Into<Bytes>,
    ) -> Self {
        let cell = Cell::put(self.row.clone(), family, qualifier, ts, value);
        self.cells.push(cell);
        self
    }

    pub fn delete_cell(
        self,
        family: impl Into<Bytes>,
        qualifier: impl Into<Bytes>,
        ts: Timestamp,
    ) -> Self {
        self.delete(family, qualifier, ts, CellKind::DeleteCell)
    }

    pub fn delete_columns(
        self,
        family: impl Into<Bytes>,
        qualifier: impl Into<Bytes>,
        ts: Timestamp,
    ) -> Self {
        self.delete(family, qualifier, ts, CellKind::DeleteColumns)
    }

    pub fn delete_family(self, family: impl Into<Bytes>, ts: Timestamp) -> Self {
        self.delete(family, Bytes::new(), ts, CellKind::DeleteFamily)
    }

    fn delete(
        mut self,
        family: impl Into<Bytes>,
        qualifier: impl Into<Bytes>,
        ts: Timestamp,
        kind: CellKind,
    ) -> Self {
        let cell = Cell::delete(self.row.clone(), family, qualifier, ts, kind);
        self.cells.push(cell);
        self
    }

    /// Append an already built cell. The cell is re-keyed to this row.
    pub fn push(&mut self, mut cell: Cell) {
        cell.row = self.row.clone();
        self.cells.push(cell);
    }

    pub fn row(&self) -> &Bytes {
        &self.row
    }

    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    pub fn into_cells(self) -> Vec<Cell> {
        self.cells
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// `true` when every cell is a put, i.e. the mutation only inserts data.
    pub fn is_insert_only(&self) -> bool {
        self.cells.iter().all(|cell| cell.kind == CellKind::Put)
    }

    /// `true` when every cell is a delete marker.
    pub fn is_delete(&self) -> bool {
        !self.cells.is_empty() && self.cells.iter().all(|cell| cell.kind.is_delete())
    }

    /// Newest timestamp carried by any cell, if the mutation is not empty.
    pub fn max_timestamp(&self) -> Option<Timestamp> {
        self.cells.iter().map(|cell| cell.ts).max()
    }

    /// Distinct cell timestamps in ascending order.
    pub fn timestamps(&self) -> Vec<Timestamp> {
        let mut ts = self.cells.iter().map(|cell| cell.ts).collect::<Vec<_>>();
        ts.sort_unstable();
        ts.dedup();
        ts
    }

    /// Cells written at exactly `ts`, in submission order.
    pub fn cells_at(&self, ts: Timestamp) -> Vec<Cell> {
        self.cells
            .iter()
            .filter(|cell| cell.ts == ts)
            .cloned()
            .collect()
    }
}

/// Name of a physical table in the backing store.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TableName(Arc<str>);

impl TableName {
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(Arc::from(name.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl From<&str> for TableName {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for TableName {
    fn from(name: String) -> Self {
        Self(Arc::from(name))
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TableName").field(&&*self.0).finish()
    }
}
