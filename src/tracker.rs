//! Tracking of requested column sets and the versions hidden from them.

use std::{
    collections::HashMap,
    fmt,
    hash::Hash,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
};

use crate::{column::ColumnReference, timestamp::Timestamp};

const NO_NEWER_TIMESTAMP: u64 = u64::MAX;

/// Identity of a requested column set: the sorted, duplicate-free references.
pub type ColumnSetKey = Arc<[ColumnReference]>;

/// One distinct requested column set plus a timestamp watermark.
///
/// The watermark records the oldest version of any tracked column that was
/// hidden by the ceiling, i.e. the next newer state of these columns. A codec
/// can use it to tell that the row changes again after the state it was shown.
pub struct ColumnTracker {
    columns: ColumnSetKey,
    next_newer: AtomicU64,
}

impl ColumnTracker {
    pub fn new<'a, I>(columns: I) -> Self
    where
        I: IntoIterator<Item = &'a ColumnReference>,
    {
        let mut columns = columns.into_iter().cloned().collect::<Vec<_>>();
        columns.sort();
        columns.dedup();
        Self {
            columns: columns.into(),
            next_newer: AtomicU64::new(NO_NEWER_TIMESTAMP),
        }
    }

    /// Columns tracked, sorted.
    pub fn columns(&self) -> &[ColumnReference] {
        &self.columns
    }

    /// Key used to deduplicate trackers of the same column set.
    pub fn column_set_key(&self) -> ColumnSetKey {
        self.columns.clone()
    }

    /// Lower the watermark to `ts` if it is older than the current one.
    pub fn observe_newer(&self, ts: Timestamp) {
        self.next_newer.fetch_min(ts.get(), Ordering::AcqRel);
    }

    /// Oldest hidden version newer than the ceiling, if any was seen.
    pub fn next_newer_ts(&self) -> Option<Timestamp> {
        match self.next_newer.load(Ordering::Acquire) {
            NO_NEWER_TIMESTAMP => None,
            ts => Some(Timestamp::new(ts)),
        }
    }

    pub fn has_newer_timestamps(&self) -> bool {
        self.next_newer_ts().is_some()
    }
}

impl fmt::Debug for ColumnTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ColumnTracker")
            .field("columns", &self.columns)
            .field("next_newer", &self.next_newer_ts())
            .finish()
    }
}

/// A set that deduplicates values through an explicit key extraction
/// function instead of the values' own equality.
///
/// Insertion is serialized, so two callers racing to register values with the
/// same key both get back the one entry that won.
pub struct KeyedSet<K, V> {
    key_of: fn(&V) -> K,
    entries: Mutex<HashMap<K, V>>,
}

impl<K, V> KeyedSet<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    pub fn new(key_of: fn(&V) -> K) -> Self {
        Self {
            key_of,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Insert `value` unless an entry with the same key exists; returns the
    /// entry that is in the set afterwards.
    pub fn get_or_insert(&self, value: V) -> V {
        let key = (self.key_of)(&value);
        let mut entries = self
            .entries
            .lock()
            .expect("keyed set mutex should not be poisoned");
        entries.entry(key).or_insert(value).clone()
    }

    pub fn values(&self) -> Vec<V> {
        self.entries
            .lock()
            .expect("keyed set mutex should not be poisoned")
            .values()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .expect("keyed set mutex should not be poisoned")
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries
            .lock()
            .expect("keyed set mutex should not be poisoned")
            .clear();
    }
}

/// The per-row set of trackers, keyed by column-set identity.
pub type TrackedColumns = KeyedSet<ColumnSetKey, Arc<ColumnTracker>>;

impl TrackedColumns {
    pub fn for_trackers() -> Self {
        KeyedSet::new(|tracker: &Arc<ColumnTracker>| tracker.column_set_key())
    }
}

impl fmt::Debug for TrackedColumns {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackedColumns")
            .field("len", &self.len())
            .finish()
    }
}
