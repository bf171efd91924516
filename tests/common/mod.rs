//! Common test utilities for integration tests.
#![allow(dead_code)]

use std::{
    collections::HashSet,
    io,
    sync::atomic::{AtomicUsize, Ordering},
};

use bytes::Bytes;
use tonbo_index::{
    store::IndexWriter, ColumnReference, CoveredColumnIndexCodec, IndexSpec, MemoryStore,
    Mutation, StoreError, TableName, Timestamp,
};

pub const DATA: &str = "orders";
pub const BY_STATUS: &str = "orders_by_status";
pub const BY_CUSTOMER: &str = "orders_by_customer";

pub fn ts(raw: u64) -> Timestamp {
    Timestamp::new(raw)
}

pub fn status() -> ColumnReference {
    ColumnReference::new("d", "status")
}

pub fn customer() -> ColumnReference {
    ColumnReference::new("d", "customer")
}

/// Two indexes over the `d` family: by status covering the customer, and by
/// customer alone.
pub fn order_codec() -> CoveredColumnIndexCodec {
    CoveredColumnIndexCodec::new(
        vec![
            IndexSpec::new(BY_STATUS, vec![status()]).covering(vec![customer()]),
            IndexSpec::new(BY_CUSTOMER, vec![customer()]),
        ],
        "0",
    )
}

/// Index row key of data row `row` indexed by the single value `value`.
pub fn index_key(row: &str, value: &str) -> Bytes {
    let value = Bytes::copy_from_slice(value.as_bytes());
    CoveredColumnIndexCodec::index_row_key(row.as_bytes(), &[Some(&value)]).unwrap()
}

pub fn store_with_tables() -> MemoryStore {
    let store = MemoryStore::new();
    for table in [DATA, BY_STATUS, BY_CUSTOMER] {
        store.ensure_table(table);
    }
    store
}

/// Writer over a [`MemoryStore`] that rejects every write to chosen tables.
pub struct FlakyWriter {
    pub store: MemoryStore,
    failing: HashSet<TableName>,
    pub attempts: AtomicUsize,
}

impl FlakyWriter {
    pub fn new(store: MemoryStore, failing: &[&str]) -> Self {
        Self {
            store,
            failing: failing.iter().map(|table| TableName::from(*table)).collect(),
            attempts: AtomicUsize::new(0),
        }
    }
}

impl IndexWriter for FlakyWriter {
    async fn batch_write(
        &self,
        table: &TableName,
        mutations: Vec<Mutation>,
    ) -> Result<(), StoreError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.failing.contains(table) {
            return Err(StoreError::Io(io::Error::other(format!(
                "{table} is offline"
            ))));
        }
        self.store.batch_write(table, mutations).await
    }
}
