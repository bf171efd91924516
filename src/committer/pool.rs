use std::{
    future::Future,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use once_cell::sync::OnceCell;
use thiserror::Error;
use tokio::{sync::Semaphore, task::JoinHandle};
use tokio_util::task::TaskTracker;

use crate::observability::{log_debug, log_info};

/// Default number of concurrent index table writes.
pub const DEFAULT_WRITER_THREADS: usize = 10;

static GLOBAL_POOL: OnceCell<Arc<WriterPool>> = OnceCell::new();

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("writer pool is shut down")]
pub struct PoolClosed;

/// Bounded set of concurrent index table writes.
///
/// Submissions run on the ambient tokio runtime, at most `size` at a time.
/// After [`WriterPool::shutdown`] new submissions are rejected while writes
/// already submitted run to completion.
#[derive(Debug)]
pub struct WriterPool {
    size: usize,
    permits: Arc<Semaphore>,
    tasks: TaskTracker,
    closed: AtomicBool,
}

impl WriterPool {
    pub fn new(size: usize) -> Arc<Self> {
        let size = size.max(1);
        Arc::new(Self {
            size,
            permits: Arc::new(Semaphore::new(size)),
            tasks: TaskTracker::new(),
            closed: AtomicBool::new(false),
        })
    }

    /// Install the process-wide pool with `size` writers.
    ///
    /// The first initialization wins; later calls, and [`WriterPool::global`]
    /// calls that already created the pool, return the existing one.
    pub fn init_global(size: usize) -> Arc<Self> {
        GLOBAL_POOL
            .get_or_init(|| {
                log_info!(
                    component = "writer_pool",
                    event = "global_pool_created",
                    size = size,
                );
                Self::new(size)
            })
            .clone()
    }

    /// The process-wide pool, created with [`DEFAULT_WRITER_THREADS`] writers
    /// on first use.
    pub fn global() -> Arc<Self> {
        Self::init_global(DEFAULT_WRITER_THREADS)
    }

    /// Shut down the process-wide pool if it was ever created.
    pub async fn shutdown_global() {
        if let Some(pool) = GLOBAL_POOL.get() {
            pool.shutdown().await;
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Writes submitted and not yet finished, running or queued.
    pub fn in_flight(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Run `write` once a writer slot is free.
    pub fn spawn<F>(&self, write: F) -> Result<JoinHandle<F::Output>, PoolClosed>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        if self.is_closed() {
            return Err(PoolClosed);
        }
        let permits = self.permits.clone();
        Ok(self.tasks.spawn(async move {
            // the semaphore is never closed
            let _permit = permits.acquire_owned().await.ok();
            write.await
        }))
    }

    /// Track `task` for draining without taking a writer slot.
    pub(crate) fn track<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        drop(self.tasks.spawn(task));
    }

    /// Reject new submissions and wait for every submitted write to finish.
    pub async fn shutdown(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            log_info!(
                component = "writer_pool",
                event = "pool_shutdown",
                in_flight = self.in_flight(),
            );
        }
        self.tasks.close();
        self.tasks.wait().await;
        log_debug!(component = "writer_pool", event = "pool_drained");
    }
}
