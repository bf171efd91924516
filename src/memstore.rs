//! Single-row overlay of prior row state and pending cells.

use std::{
    collections::{BTreeSet, HashMap, HashSet, VecDeque},
    ops::Bound,
};

use bytes::Bytes;
use crossbeam_skiplist::SkipMap;

use crate::{
    cell::{Cell, CellKind},
    column::ColumnReference,
    timestamp::{Timestamp, Timestamped},
    tracker::ColumnTracker,
};

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) struct ColumnCoordinate {
    family: Bytes,
    qualifier: Bytes,
}

/// Sort key of a cell: family, qualifier, timestamp descending, deletes first.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct CellKey {
    column: Timestamped<ColumnCoordinate>,
    kind: CellKind,
}

impl CellKey {
    pub(crate) fn of(cell: &Cell) -> Self {
        Self {
            column: Timestamped::new(
                ColumnCoordinate {
                    family: cell.family.clone(),
                    qualifier: cell.qualifier.clone(),
                },
                cell.ts,
            ),
            kind: cell.kind,
        }
    }

    /// Smallest possible key.
    pub(crate) fn first() -> Self {
        Self::first_on_family(&Bytes::new())
    }

    fn first_on_family(family: &Bytes) -> Self {
        Self {
            column: Timestamped::new(
                ColumnCoordinate {
                    family: family.clone(),
                    qualifier: Bytes::new(),
                },
                Timestamp::LATEST,
            ),
            kind: CellKind::DeleteFamily,
        }
    }
}

/// Ordered cells of one row, merged from fetched history and pending writes.
///
/// History is added with `overwrite = false` so the first write for a
/// coordinate wins; pending cells are added with `overwrite = true` so they
/// always shadow stale history at the same coordinate.
#[derive(Debug, Default)]
pub struct OverlayStore {
    cells: SkipMap<CellKey, Cell>,
}

impl OverlayStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, cell: Cell, overwrite: bool) {
        let key = CellKey::of(&cell);
        if overwrite {
            self.cells.insert(key, cell);
        } else {
            self.cells.get_or_insert(key, cell);
        }
    }

    /// Remove `cell` if exactly that cell is stored at its coordinate.
    pub fn rollback(&self, cell: &Cell) -> bool {
        let key = CellKey::of(cell);
        match self.cells.get(&key) {
            Some(entry) if entry.value() == cell => entry.remove(),
            _ => false,
        }
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Every stored cell in sort order.
    pub fn cells(&self) -> Vec<Cell> {
        self.cells
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Visible cells of `columns` strictly older than `ceiling`, with delete
    /// markers applied.
    ///
    /// Cells hidden by the ceiling lower `tracker`'s watermark.
    pub fn column_cursor(
        &self,
        columns: &[ColumnReference],
        ceiling: Timestamp,
        tracker: Option<&ColumnTracker>,
    ) -> ColumnCursor {
        let families = columns
            .iter()
            .map(ColumnReference::family)
            .collect::<BTreeSet<_>>();
        let mut visible = VecDeque::new();

        for family in families {
            let wanted = columns
                .iter()
                .filter(|column| column.matches_family(family))
                .collect::<Vec<_>>();
            let mut family_deleted_at: Option<Timestamp> = None;
            let mut columns_deleted_at: HashMap<Bytes, Timestamp> = HashMap::new();
            let mut cells_deleted: HashSet<(Bytes, Timestamp)> = HashSet::new();

            let lower = CellKey::first_on_family(family);
            let range = self
                .cells
                .range((Bound::Included(&lower), Bound::Unbounded))
                .take_while(|entry| &entry.value().family == family);

            for entry in range {
                let cell = entry.value();
                let requested = wanted
                    .iter()
                    .any(|column| column.matches_qualifier(&cell.qualifier));

                if cell.ts >= ceiling {
                    if requested {
                        if let Some(tracker) = tracker {
                            tracker.observe_newer(cell.ts);
                        }
                    }
                    continue;
                }

                match cell.kind {
                    CellKind::DeleteFamily => {
                        family_deleted_at = family_deleted_at.max(Some(cell.ts));
                    }
                    CellKind::DeleteColumns => {
                        let at = columns_deleted_at
                            .entry(cell.qualifier.clone())
                            .or_insert(cell.ts);
                        *at = (*at).max(cell.ts);
                    }
                    CellKind::DeleteCell => {
                        cells_deleted.insert((cell.qualifier.clone(), cell.ts));
                    }
                    CellKind::Put => {
                        if !requested {
                            continue;
                        }
                        if family_deleted_at.is_some_and(|at| cell.ts <= at) {
                            continue;
                        }
                        if columns_deleted_at
                            .get(&cell.qualifier)
                            .is_some_and(|at| cell.ts <= *at)
                        {
                            continue;
                        }
                        if cells_deleted.contains(&(cell.qualifier.clone(), cell.ts)) {
                            continue;
                        }
                        visible.push_back(cell.clone());
                    }
                }
            }
        }

        ColumnCursor { cells: visible }
    }
}

/// Time-bounded view over the requested columns of one row.
///
/// Yields puts ordered by family, qualifier and then newest version first.
#[derive(Debug, Default, Clone)]
pub struct ColumnCursor {
    cells: VecDeque<Cell>,
}

impl ColumnCursor {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn peek(&self) -> Option<&Cell> {
        self.cells.front()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// Skip forward to the first remaining cell of `column`.
    pub fn seek(&mut self, column: &ColumnReference) -> Option<&Cell> {
        while let Some(cell) = self.cells.front() {
            if column.matches(cell) {
                break;
            }
            self.cells.pop_front();
        }
        self.cells.front()
    }

    /// Consume the cursor into a lookup of the newest value per column.
    pub fn into_value_getter(self, row: Bytes) -> ValueGetter {
        let mut latest = HashMap::new();
        for cell in self.cells {
            latest
                .entry((cell.family.clone(), cell.qualifier.clone()))
                .or_insert(cell.value);
        }
        ValueGetter { row, latest }
    }
}

impl Iterator for ColumnCursor {
    type Item = Cell;

    fn next(&mut self) -> Option<Self::Item> {
        self.cells.pop_front()
    }
}

/// Newest visible value of each column of one row.
#[derive(Debug, Clone, Default)]
pub struct ValueGetter {
    row: Bytes,
    latest: HashMap<(Bytes, Bytes), Bytes>,
}

impl ValueGetter {
    pub fn row_key(&self) -> &Bytes {
        &self.row
    }

    /// Value of a concrete column. Wildcard references have no single value.
    pub fn latest_value(&self, column: &ColumnReference) -> Option<&Bytes> {
        let qualifier = column.qualifier()?;
        self.latest
            .get(&(column.family().clone(), qualifier.clone()))
    }

    pub fn is_empty(&self) -> bool {
        self.latest.is_empty()
    }
}
