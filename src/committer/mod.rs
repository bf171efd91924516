//! Parallel writes of index mutations, one task per index table.
//!
//! An [`IndexCommitter`] partitions a batch by destination table and submits
//! one batched write per table to a shared [`WriterPool`]. Tables are
//! independent: a failed table never blocks or rolls back another one, and the
//! data mutation the batch was derived from is never touched here.

mod pool;

use std::{
    fmt,
    sync::{Arc, Mutex},
    time::Duration,
};

use flume::{Receiver, SendError, Sender};
use once_cell::sync::OnceCell;
use thiserror::Error;
use tokio::{
    task::{JoinError, JoinHandle},
    time::Instant,
};
use ulid::Ulid;

pub use self::pool::{PoolClosed, WriterPool, DEFAULT_WRITER_THREADS};
use crate::{
    builder::IndexMutationBatch,
    cell::TableName,
    observability::{log_debug, log_error, log_warn},
    option::IndexOption,
    store::{IndexWriter, StoreError},
};

/// How [`IndexCommitter::commit`] waits for the table writes it submits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitPolicy {
    /// Wait for every table up to `deadline` and return an aggregate error.
    Blocking { deadline: Duration },
    /// Return once writes are submitted; failures arrive on
    /// [`IndexCommitter::failures`].
    Lazy,
}

/// Why one index table was not written.
#[derive(Debug, Error)]
pub enum FailureCause {
    #[error("write failed: {0}")]
    Write(#[source] StoreError),
    /// The write was still running at the deadline. It is not cancelled and
    /// may still land later.
    #[error("write still outstanding after {0:?}")]
    DeadlineExceeded(Duration),
    #[error("writer pool rejected the write")]
    Rejected,
    #[error("write task panicked: {0}")]
    Panicked(String),
}

impl FailureCause {
    /// `true` when the table state is unknown rather than confirmed failed.
    pub fn is_outstanding(&self) -> bool {
        matches!(self, FailureCause::DeadlineExceeded(_))
    }
}

#[derive(Debug)]
pub struct TableFailure {
    pub table: TableName,
    /// Mutations that were meant for the table.
    pub mutations: usize,
    pub cause: FailureCause,
}

impl fmt::Display for TableFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({} mutations): {}",
            self.table, self.mutations, self.cause
        )
    }
}

#[derive(Debug, Error)]
pub enum CommitError {
    #[error("index committer stopped: {0}")]
    Stopped(String),
    #[error(transparent)]
    PoolClosed(#[from] PoolClosed),
    #[error("index commit {batch} failed for {} table(s): {}", .failures.len(), display_failures(.failures))]
    Failed {
        batch: Ulid,
        failures: Vec<TableFailure>,
    },
}

impl CommitError {
    /// Tables named by a [`CommitError::Failed`].
    pub fn failed_tables(&self) -> Vec<&TableName> {
        match self {
            CommitError::Failed { failures, .. } => {
                failures.iter().map(|failure| &failure.table).collect()
            }
            _ => Vec::new(),
        }
    }
}

fn display_failures(failures: &[TableFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

struct Submitted {
    table: TableName,
    mutations: usize,
    handle: JoinHandle<Result<(), StoreError>>,
}

/// Writes index mutations to their tables through a shared [`WriterPool`].
pub struct IndexCommitter<W> {
    writer: Arc<W>,
    pool: Arc<WriterPool>,
    policy: WaitPolicy,
    stopped: OnceCell<String>,
    subscriber: Mutex<Option<Sender<CommitError>>>,
}

impl<W> IndexCommitter<W>
where
    W: IndexWriter + 'static,
{
    pub fn new(writer: Arc<W>, pool: Arc<WriterPool>, policy: WaitPolicy) -> Self {
        Self {
            writer,
            pool,
            policy,
            stopped: OnceCell::new(),
            subscriber: Mutex::new(None),
        }
    }

    pub fn blocking(writer: Arc<W>, pool: Arc<WriterPool>, deadline: Duration) -> Self {
        Self::new(writer, pool, WaitPolicy::Blocking { deadline })
    }

    pub fn lazy(writer: Arc<W>, pool: Arc<WriterPool>) -> Self {
        Self::new(writer, pool, WaitPolicy::Lazy)
    }

    /// Committer on the process-wide pool, configured by `option`.
    pub fn from_option(writer: Arc<W>, option: &IndexOption) -> Self {
        let pool = WriterPool::init_global(option.writer_threads);
        let policy = if option.lazy_commit {
            WaitPolicy::Lazy
        } else {
            WaitPolicy::Blocking {
                deadline: option.commit_deadline,
            }
        };
        Self::new(writer, pool, policy)
    }

    pub fn policy(&self) -> WaitPolicy {
        self.policy
    }

    pub fn pool(&self) -> &Arc<WriterPool> {
        &self.pool
    }

    /// Subscribe to the failures of lazy commits dispatched from now on, one
    /// [`CommitError::Failed`] per batch.
    ///
    /// A later call replaces the previous subscriber. Failures with no live
    /// subscriber are logged and dropped, never queued.
    pub fn failures(&self) -> Receiver<CommitError> {
        let (tx, rx) = flume::unbounded();
        *self
            .subscriber
            .lock()
            .expect("failure subscriber mutex should not be poisoned") = Some(tx);
        rx
    }

    fn subscriber(&self) -> Option<Sender<CommitError>> {
        self.subscriber
            .lock()
            .expect("failure subscriber mutex should not be poisoned")
            .clone()
    }

    /// Refuse every later commit. The first reason given is kept.
    pub fn stop(&self, reason: impl Into<String>) {
        let reason = reason.into();
        if self.stopped.set(reason.clone()).is_ok() {
            log_warn!(
                component = "committer",
                event = "committer_stopped",
                reason = %reason,
            );
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.get().is_some()
    }

    /// Write every table of `updates`.
    ///
    /// Tables that succeed stay written whatever happens to the others.
    pub async fn commit(&self, updates: IndexMutationBatch) -> Result<(), CommitError> {
        if let Some(reason) = self.stopped.get() {
            return Err(CommitError::Stopped(reason.clone()));
        }
        if updates.is_empty() {
            return Ok(());
        }
        if self.pool.is_closed() {
            return Err(CommitError::PoolClosed(PoolClosed));
        }

        let batch = Ulid::new();
        log_debug!(
            component = "committer",
            event = "commit_dispatched",
            batch = %batch,
            tables = updates.table_count(),
            mutations = updates.mutation_count(),
            policy = ?self.policy,
        );
        let (submitted, mut failures) = self.dispatch(updates);

        match self.policy {
            WaitPolicy::Blocking { deadline } => {
                let expires = Instant::now() + deadline;
                failures.extend(collect(batch, submitted, Some((expires, deadline))).await);
                finish(batch, failures)
            }
            WaitPolicy::Lazy => {
                let subscriber = self.subscriber();
                self.pool.track(async move {
                    failures.extend(collect(batch, submitted, None).await);
                    if let Err(err) = finish(batch, failures) {
                        report(batch, subscriber, err);
                    }
                });
                Ok(())
            }
        }
    }

    fn dispatch(&self, updates: IndexMutationBatch) -> (Vec<Submitted>, Vec<TableFailure>) {
        let mut submitted = Vec::with_capacity(updates.table_count());
        let mut rejected = Vec::new();
        for (table, mutations) in updates {
            let count = mutations.len();
            let writer = self.writer.clone();
            let target = table.clone();
            let write = async move { writer.batch_write(&target, mutations).await };
            match self.pool.spawn(write) {
                Ok(handle) => submitted.push(Submitted {
                    table,
                    mutations: count,
                    handle,
                }),
                Err(PoolClosed) => rejected.push(TableFailure {
                    table,
                    mutations: count,
                    cause: FailureCause::Rejected,
                }),
            }
        }
        (submitted, rejected)
    }
}

/// Wait for every submitted write, up to `deadline` when given.
async fn collect(
    batch: Ulid,
    submitted: Vec<Submitted>,
    deadline: Option<(Instant, Duration)>,
) -> Vec<TableFailure> {
    let mut failures = Vec::new();
    for Submitted {
        table,
        mutations,
        handle,
    } in submitted
    {
        let joined = match deadline {
            Some((expires, budget)) => match tokio::time::timeout_at(expires, handle).await {
                Ok(joined) => joined,
                Err(_) => {
                    log_warn!(
                        component = "committer",
                        event = "deadline_exceeded",
                        batch = %batch,
                        table = %table,
                        deadline_ms = budget.as_millis() as u64,
                    );
                    failures.push(TableFailure {
                        table,
                        mutations,
                        cause: FailureCause::DeadlineExceeded(budget),
                    });
                    continue;
                }
            },
            None => handle.await,
        };
        let cause = match joined {
            Ok(Ok(())) => continue,
            Ok(Err(err)) => FailureCause::Write(err),
            Err(err) => FailureCause::Panicked(join_error_message(err)),
        };
        log_error!(
            component = "committer",
            event = "table_write_failed",
            batch = %batch,
            table = %table,
            error = %cause,
        );
        failures.push(TableFailure {
            table,
            mutations,
            cause,
        });
    }
    failures
}

fn join_error_message(err: JoinError) -> String {
    if !err.is_panic() {
        return err.to_string();
    }
    let payload = err.into_panic();
    payload
        .downcast_ref::<&str>()
        .map(|msg| msg.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

/// Hand a lazy commit failure to its subscriber, or log it when there is none.
fn report(batch: Ulid, subscriber: Option<Sender<CommitError>>, err: CommitError) {
    let undelivered = match subscriber {
        Some(tx) => tx.send(err).err().map(|SendError(err)| err),
        None => Some(err),
    };
    if let Some(err) = undelivered {
        log_error!(
            component = "committer",
            event = "lazy_commit_failed_unobserved",
            batch = %batch,
            error = %err,
        );
    }
}

fn finish(batch: Ulid, failures: Vec<TableFailure>) -> Result<(), CommitError> {
    if failures.is_empty() {
        Ok(())
    } else {
        Err(CommitError::Failed { batch, failures })
    }
}
