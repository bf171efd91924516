//! Crate-private logging macros.
//!
//! Every event goes to target "tonbo_index" with a `component` naming the
//! subsystem and a snake_case `event`. The crate never installs a subscriber.
//!
//! Events by component:
//!
//! - `row_state`: `prior_state_lookup` (debug)
//! - `builder`: `index_updates` (debug)
//! - `committer`: `commit_dispatched` (debug), `deadline_exceeded` (warn),
//!   `table_write_failed` and `lazy_commit_failed_unobserved` (error),
//!   `committer_stopped` (warn)
//! - `writer_pool`: `global_pool_created` and `pool_shutdown` (info),
//!   `pool_drained` (debug)
//! - `verification`: `result_table_created` (info), `result_logged` (debug),
//!   `malformed_result_row` (warn)
//!
//! Row keys are logged with `?` so binary keys stay readable.

/// Target for all log events emitted by this crate.
pub(crate) const INDEX_TARGET: &str = "tonbo_index";

/// Info-level event.
///
/// ```ignore
/// log_info!(
///     component = "verification",
///     event = "result_table_created",
///     table = %self.result_table,
///     ttl_secs = self.ttl.as_secs(),
/// );
/// ```
macro_rules! log_info {
    ($($field:tt)*) => {
        ::tracing::info!(target: $crate::observability::INDEX_TARGET, $($field)*)
    };
}

/// Debug-level event.
macro_rules! log_debug {
    ($($field:tt)*) => {
        ::tracing::debug!(target: $crate::observability::INDEX_TARGET, $($field)*)
    };
}

/// Warn-level event.
macro_rules! log_warn {
    ($($field:tt)*) => {
        ::tracing::warn!(target: $crate::observability::INDEX_TARGET, $($field)*)
    };
}

/// Error-level event.
macro_rules! log_error {
    ($($field:tt)*) => {
        ::tracing::error!(target: $crate::observability::INDEX_TARGET, $($field)*)
    };
}

pub(crate) use log_debug;
pub(crate) use log_error;
pub(crate) use log_info;
pub(crate) use log_warn;
