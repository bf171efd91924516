use std::{pin::pin, sync::Arc, time::Duration};

use bytes::Bytes;
use futures_util::StreamExt;

use crate::{
    cell::{Mutation, TableName},
    observability::{log_debug, log_info, log_warn},
    option::IndexOption,
    store::{IndexWriter, Row, StoreError, TableAdmin, TableDescriptor, TableScanner},
    timestamp::Timestamp,
    verification::{
        result::is_counter,
        row_key::{
            generate_row_key, next_row_key_after_prefix, run_prefix, split_row_key,
            ROW_KEY_SEPARATOR,
        },
        RepositoryError, RowKeyError, VerificationResult, VerifyPhase,
    },
};

/// Counters of one run read back from the result table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultScan {
    /// Sum over every well-formed row of the run.
    pub result: VerificationResult,
    /// Rows that could not be parsed, in scan order.
    pub errors: Vec<RowKeyError>,
}

impl ResultScan {
    /// The summed result, or [`RepositoryError::MalformedRows`] if any row
    /// was malformed.
    pub fn into_result(self) -> Result<VerificationResult, RepositoryError> {
        if self.errors.is_empty() {
            Ok(self.result)
        } else {
            Err(RepositoryError::MalformedRows {
                result: self.result,
                errors: self.errors,
            })
        }
    }
}

/// Stores per-region verification counters and reads runs back.
///
/// A read-only repository only knows the result table and can create and read
/// it. A read/write repository also names the index table being verified,
/// which is part of every row it logs.
#[derive(Debug)]
pub struct VerificationResultRepository<S> {
    store: Arc<S>,
    result_table: TableName,
    family: Bytes,
    ttl: Duration,
    index_table: Option<TableName>,
}

impl<S> VerificationResultRepository<S> {
    pub fn read_only(store: Arc<S>, option: &IndexOption) -> Self {
        Self {
            store,
            result_table: option.result_table_name.clone(),
            family: option.result_table_family.clone(),
            ttl: option.result_ttl,
            index_table: None,
        }
    }

    pub fn read_write(
        store: Arc<S>,
        index_table: impl Into<TableName>,
        option: &IndexOption,
    ) -> Self {
        Self {
            index_table: Some(index_table.into()),
            ..Self::read_only(store, option)
        }
    }

    pub fn result_table(&self) -> &TableName {
        &self.result_table
    }

    pub fn index_table(&self) -> Option<&TableName> {
        self.index_table.as_ref()
    }

    pub fn is_read_only(&self) -> bool {
        self.index_table.is_none()
    }
}

impl<S> VerificationResultRepository<S>
where
    S: TableAdmin,
{
    /// Create the result table with its retention unless it exists. Returns
    /// whether this call created it.
    pub async fn create_result_table(&self) -> Result<bool, RepositoryError> {
        if self.store.exists(&self.result_table).await? {
            return Ok(false);
        }
        let descriptor = TableDescriptor {
            name: self.result_table.clone(),
            family: self.family.clone(),
            ttl: Some(self.ttl),
        };
        match self.store.create(descriptor).await {
            Ok(()) => {
                log_info!(
                    component = "verification",
                    event = "result_table_created",
                    table = %self.result_table,
                    ttl_secs = self.ttl.as_secs(),
                );
                Ok(true)
            }
            // lost a race with another creator
            Err(StoreError::TableExists(_)) => Ok(false),
            Err(err) => Err(err.into()),
        }
    }
}

impl<S> VerificationResultRepository<S>
where
    S: IndexWriter,
{
    /// Store the counters of one region of a run as one row, every cell
    /// versioned at the run's scan-max timestamp.
    ///
    /// `start_row`, `stop_row`, `region` and the index table name must not
    /// contain the `|` separator.
    pub async fn log_result(
        &self,
        result: &VerificationResult,
        phase: VerifyPhase,
        region: &[u8],
    ) -> Result<(), RepositoryError> {
        let Some(index_table) = &self.index_table else {
            return Err(RepositoryError::ReadOnly);
        };
        let ts = result.scan_max_ts;
        let key = generate_row_key(
            ts,
            index_table.as_bytes(),
            region,
            &result.start_row,
            &result.stop_row,
        );
        let mutation = result.counters(phase).into_iter().fold(
            Mutation::new(key.clone()),
            |mutation, (counter, value)| {
                mutation.put(self.family.clone(), counter, ts, value.to_string())
            },
        );
        self.store
            .batch_write(&self.result_table, vec![mutation])
            .await?;
        log_debug!(
            component = "verification",
            event = "result_logged",
            table = %self.result_table,
            row = ?key,
            phase = ?phase,
        );
        Ok(())
    }
}

impl<S> VerificationResultRepository<S>
where
    S: TableScanner,
{
    /// Counters of every region of run `run_ts`, summed.
    ///
    /// Malformed rows are skipped and reported in [`ResultScan::errors`]; they
    /// never count as zero.
    pub async fn read_result(&self, run_ts: Timestamp) -> Result<ResultScan, RepositoryError> {
        let prefix = run_prefix(run_ts);
        let stop = next_row_key_after_prefix(&prefix);
        let mut scan = ResultScan {
            result: VerificationResult::new(run_ts),
            errors: Vec::new(),
        };

        let mut rows = pin!(self.store.scan(self.result_table.clone(), prefix.clone(), stop));
        while let Some(row) = rows.next().await {
            let row = row?;
            // a longer timestamp sharing the decimal prefix, e.g. 100 and 1000
            if row.key.get(prefix.len()) != Some(&ROW_KEY_SEPARATOR) {
                continue;
            }
            let parsed = split_row_key(&row.key)
                .and_then(|key| Ok((key, self.region_result(&row, run_ts)?)));
            match parsed {
                Ok((key, region)) => {
                    scan.result.add(&region);
                    scan.result.start_row = key.start_row;
                    scan.result.stop_row = key.stop_row;
                }
                Err(err) => {
                    log_warn!(
                        component = "verification",
                        event = "malformed_result_row",
                        table = %self.result_table,
                        error = %err,
                    );
                    scan.errors.push(err);
                }
            }
        }
        Ok(scan)
    }

    /// Like [`VerificationResultRepository::read_result`], but fails with
    /// [`RepositoryError::MalformedRows`] when any row is malformed.
    pub async fn get_result(&self, run_ts: Timestamp) -> Result<VerificationResult, RepositoryError> {
        self.read_result(run_ts).await?.into_result()
    }

    fn region_result(&self, row: &Row, run_ts: Timestamp) -> Result<VerificationResult, RowKeyError> {
        let mut result = VerificationResult::new(run_ts);
        let mut previous: Option<&Bytes> = None;
        for cell in row.cells.iter().filter(|cell| cell.family == self.family) {
            // versions of a column come newest first
            if previous == Some(&cell.qualifier) {
                continue;
            }
            previous = Some(&cell.qualifier);
            if !is_counter(&cell.qualifier) {
                continue;
            }
            let value = std::str::from_utf8(&cell.value)
                .ok()
                .and_then(|value| value.parse::<u64>().ok())
                .ok_or_else(|| RowKeyError::Counter {
                    row: row.key.clone(),
                    counter: cell.qualifier.clone(),
                    value: cell.value.clone(),
                })?;
            result.update(&cell.qualifier, value);
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    const INDEX: &str = "IDX";

    fn ts(raw: u64) -> Timestamp {
        Timestamp::new(raw)
    }

    async fn repository() -> VerificationResultRepository<MemoryStore> {
        let repository = VerificationResultRepository::read_write(
            Arc::new(MemoryStore::new()),
            INDEX,
            &IndexOption::default(),
        );
        assert!(repository.create_result_table().await.unwrap());
        repository
    }

    fn region_result(run: u64, start: &'static str, stop: &'static str) -> VerificationResult {
        let mut result = VerificationResult::new(ts(run)).with_range(start, stop);
        result.scanned_data_row_count = 100;
        result.rebuilt_index_row_count = 100;
        result.before.valid = 95;
        result.before.missing = 5;
        result.after.valid = 100;
        result
    }

    #[tokio::test]
    async fn logged_result_reads_back() {
        let repository = repository().await;
        let logged = region_result(1000, "a", "m");
        repository
            .log_result(&logged, VerifyPhase::Both, b"region-1")
            .await
            .unwrap();

        let read = repository.get_result(ts(1000)).await.unwrap();
        assert_eq!(read, logged);
        assert_eq!(read.scanned_data_row_count, 100);
        assert_eq!(read.rebuilt_index_row_count, 100);
        assert_eq!(read.before.valid, 95);
        assert_eq!(read.before.missing, 5);
        assert_eq!(read.after.valid, 100);
        assert_eq!(read.after.missing, 0);
        assert!(!read.is_verification_failed(VerifyPhase::Both));
        assert!(read.is_verification_failed(VerifyPhase::Before));
    }

    #[tokio::test]
    async fn regions_of_a_run_are_summed() {
        let repository = repository().await;
        repository
            .log_result(&region_result(100, "a", "m"), VerifyPhase::Before, b"r1")
            .await
            .unwrap();
        repository
            .log_result(&region_result(100, "m", "z"), VerifyPhase::Before, b"r2")
            .await
            .unwrap();
        // shares the decimal prefix of run 100
        repository
            .log_result(&region_result(1000, "a", "z"), VerifyPhase::Before, b"r1")
            .await
            .unwrap();

        let read = repository.get_result(ts(100)).await.unwrap();
        assert_eq!(read.scanned_data_row_count, 200);
        assert_eq!(read.before.missing, 10);
        assert_eq!(read.after, Default::default());
        assert_eq!(read.start_row.as_ref(), b"m");
        assert_eq!(read.stop_row.as_ref(), b"z");

        // rows of another run are never parsed, even when they are malformed
        repository
            .log_result(&region_result(1000, "a", "z"), VerifyPhase::Before, b"reg|ion")
            .await
            .unwrap();
        let read = repository.get_result(ts(100)).await.unwrap();
        assert_eq!(read.scanned_data_row_count, 200);
        assert_eq!(
            repository.read_result(ts(1000)).await.unwrap().errors.len(),
            1
        );

        let empty = repository.get_result(ts(7)).await.unwrap();
        assert_eq!(empty, VerificationResult::new(ts(7)));
    }

    #[tokio::test]
    async fn read_only_repository_refuses_writes() {
        let store = Arc::new(MemoryStore::new());
        let repository = VerificationResultRepository::read_only(store, &IndexOption::default());
        assert!(repository.is_read_only());

        // the table does not exist, so reaching the store would fail differently
        let err = repository
            .log_result(&region_result(1, "a", "b"), VerifyPhase::Both, b"r1")
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::ReadOnly));
    }

    #[tokio::test]
    async fn result_table_is_created_once_with_retention() {
        let store = Arc::new(MemoryStore::new());
        let repository =
            VerificationResultRepository::read_only(store.clone(), &IndexOption::default());

        assert!(repository.create_result_table().await.unwrap());
        assert!(!repository.create_result_table().await.unwrap());
        let descriptor = store.descriptor(repository.result_table()).unwrap();
        assert_eq!(descriptor.family.as_ref(), b"0");
        assert_eq!(descriptor.ttl, Some(Duration::from_secs(7 * 24 * 60 * 60)));
    }

    #[tokio::test]
    async fn malformed_rows_are_reported_not_zeroed() {
        let repository = repository().await;
        repository
            .log_result(&region_result(5, "a", "m"), VerifyPhase::Only, b"r1")
            .await
            .unwrap();
        let garbage = vec![
            Mutation::new("5|IDX|r2").put("0", "ScannedDataRowCount", ts(5), "1"),
            Mutation::new("5|IDX|r3|m|z").put("0", "ScannedDataRowCount", ts(5), "lots"),
        ];
        repository
            .store
            .batch_write(repository.result_table(), garbage)
            .await
            .unwrap();

        let scan = repository.read_result(ts(5)).await.unwrap();
        assert_eq!(scan.result.scanned_data_row_count, 100);
        assert_eq!(scan.errors.len(), 2);
        assert!(matches!(scan.errors[0], RowKeyError::FieldCount { found: 3, .. }));
        assert!(matches!(scan.errors[1], RowKeyError::Counter { .. }));

        let err = repository.get_result(ts(5)).await.unwrap_err();
        let RepositoryError::MalformedRows { result, errors } = err else {
            unreachable!()
        };
        assert_eq!(result.scanned_data_row_count, 100);
        assert_eq!(errors.len(), 2);
    }
}
