//! Column references and the per-row set of columns already looked up.

use std::{collections::HashSet, fmt};

use bytes::Bytes;

use crate::cell::Cell;

/// A `(family, qualifier)` pair an index depends on.
///
/// A reference without a qualifier is a wildcard over the whole family.
/// Equality and hashing are over the exact bytes, so the wildcard reference of
/// a family is a distinct column from any concrete qualifier in it.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ColumnReference {
    family: Bytes,
    qualifier: Option<Bytes>,
}

impl ColumnReference {
    pub fn new(family: impl Into<Bytes>, qualifier: impl Into<Bytes>) -> Self {
        Self {
            family: family.into(),
            qualifier: Some(qualifier.into()),
        }
    }

    /// Reference to every qualifier of `family`.
    pub fn whole_family(family: impl Into<Bytes>) -> Self {
        Self {
            family: family.into(),
            qualifier: None,
        }
    }

    pub fn family(&self) -> &Bytes {
        &self.family
    }

    /// The concrete qualifier, or `None` for a family wildcard.
    pub fn qualifier(&self) -> Option<&Bytes> {
        self.qualifier.as_ref()
    }

    pub fn is_wildcard(&self) -> bool {
        self.qualifier.is_none()
    }

    pub fn matches_family(&self, family: &[u8]) -> bool {
        self.family.as_ref() == family
    }

    pub fn matches_qualifier(&self, qualifier: &[u8]) -> bool {
        match &self.qualifier {
            Some(own) => own.as_ref() == qualifier,
            None => true,
        }
    }

    pub fn matches(&self, cell: &Cell) -> bool {
        self.matches_family(&cell.family) && self.matches_qualifier(&cell.qualifier)
    }
}

impl fmt::Debug for ColumnReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.qualifier {
            Some(qualifier) => write!(
                f,
                "{}:{}",
                String::from_utf8_lossy(&self.family),
                String::from_utf8_lossy(qualifier)
            ),
            None => write!(f, "{}:*", String::from_utf8_lossy(&self.family)),
        }
    }
}

/// Columns of one row whose prior state has already been loaded.
///
/// Only grows. Once a reference is here it is never fetched again for the row.
#[derive(Debug, Default)]
pub struct CoveredColumns {
    columns: HashSet<ColumnReference>,
}

impl CoveredColumns {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requested references not yet covered, in request order, without
    /// duplicates.
    pub fn find_non_covered_columns<'a, I>(&self, requested: I) -> Vec<ColumnReference>
    where
        I: IntoIterator<Item = &'a ColumnReference>,
    {
        let mut seen = HashSet::new();
        requested
            .into_iter()
            .filter(|column| !self.columns.contains(*column) && seen.insert(*column))
            .cloned()
            .collect()
    }

    pub fn add_column(&mut self, column: ColumnReference) {
        self.columns.insert(column);
    }

    pub fn contains(&self, column: &ColumnReference) -> bool {
        self.columns.contains(column)
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}
