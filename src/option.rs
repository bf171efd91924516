use std::time::Duration;

use bytes::Bytes;

use crate::{cell::TableName, committer::DEFAULT_WRITER_THREADS};

/// Default name of the table holding verification results.
pub const DEFAULT_RESULT_TABLE: &str = "INDEX_TOOL_RESULT";
/// Default column family of the verification result table.
pub const DEFAULT_RESULT_FAMILY: &str = "0";
/// Default retention of verification results: one week.
pub const DEFAULT_RESULT_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Configuration of index commits and verification bookkeeping.
#[derive(Debug, Clone)]
pub struct IndexOption {
    pub(crate) writer_threads: usize,
    pub(crate) commit_deadline: Duration,
    pub(crate) lazy_commit: bool,
    pub(crate) result_table_name: TableName,
    pub(crate) result_table_family: Bytes,
    pub(crate) result_ttl: Duration,
}

impl Default for IndexOption {
    fn default() -> Self {
        IndexOption {
            writer_threads: DEFAULT_WRITER_THREADS,
            commit_deadline: Duration::from_secs(30),
            lazy_commit: false,
            result_table_name: TableName::new(DEFAULT_RESULT_TABLE),
            result_table_family: Bytes::from_static(DEFAULT_RESULT_FAMILY.as_bytes()),
            result_ttl: DEFAULT_RESULT_TTL,
        }
    }
}

impl IndexOption {
    /// Number of index tables written concurrently by the shared writer pool.
    pub fn writer_threads(self, writer_threads: usize) -> Self {
        IndexOption {
            writer_threads,
            ..self
        }
    }

    /// How long a blocking commit waits for every table before reporting the
    /// outstanding ones as failed.
    pub fn commit_deadline(self, commit_deadline: Duration) -> Self {
        IndexOption {
            commit_deadline,
            ..self
        }
    }

    /// Return from commits once writes are submitted and report failures
    /// asynchronously.
    pub fn lazy_commit(self, lazy_commit: bool) -> Self {
        IndexOption {
            lazy_commit,
            ..self
        }
    }

    pub fn result_table_name(self, result_table_name: impl Into<TableName>) -> Self {
        IndexOption {
            result_table_name: result_table_name.into(),
            ..self
        }
    }

    pub fn result_table_family(self, result_table_family: impl Into<Bytes>) -> Self {
        IndexOption {
            result_table_family: result_table_family.into(),
            ..self
        }
    }

    pub fn result_ttl(self, result_ttl: Duration) -> Self {
        IndexOption { result_ttl, ..self }
    }
}

impl IndexOption {
    pub fn get_writer_threads(&self) -> usize {
        self.writer_threads
    }

    pub fn get_commit_deadline(&self) -> Duration {
        self.commit_deadline
    }

    pub fn is_lazy_commit(&self) -> bool {
        self.lazy_commit
    }

    pub fn get_result_table_name(&self) -> &TableName {
        &self.result_table_name
    }

    pub fn get_result_table_family(&self) -> &Bytes {
        &self.result_table_family
    }

    pub fn get_result_ttl(&self) -> Duration {
        self.result_ttl
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_and_overrides() {
        let option = IndexOption::default();
        assert_eq!(option.get_writer_threads(), 10);
        assert_eq!(option.get_commit_deadline(), Duration::from_secs(30));
        assert!(!option.is_lazy_commit());
        assert_eq!(option.get_result_table_name().as_str(), "INDEX_TOOL_RESULT");
        assert_eq!(option.get_result_table_family().as_ref(), b"0");
        assert_eq!(option.get_result_ttl(), Duration::from_secs(604_800));

        let option = option
            .writer_threads(2)
            .lazy_commit(true)
            .result_table_name("AUDIT")
            .result_ttl(Duration::from_secs(60));
        assert_eq!(option.get_writer_threads(), 2);
        assert!(option.is_lazy_commit());
        assert_eq!(option.get_result_table_name().as_str(), "AUDIT");
        assert_eq!(option.get_result_ttl(), Duration::from_secs(60));
    }
}
