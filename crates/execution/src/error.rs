//! Batch-level errors.

use parflow_core::TaskId;

/// Error type for executor operations.
pub type Result<T> = std::result::Result<T, ExecutionError>;

/// Errors that abort a whole batch.
///
/// Per-task failures are never reported here; they end up in the
/// task's [`parflow_core::TaskResult`].
#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    /// No task is ready or running, and no failed dependency explains the stall
    #[error("deadlock: {} task(s) can never run: {}", pending.len(), join_ids(pending))]
    Deadlock {
        /// Tasks left pending when the stall was detected
        pending: Vec<TaskId>,
    },

    /// The same ID was submitted twice
    #[error("duplicate task id in batch: {0}")]
    DuplicateTask(TaskId),

    /// The runtime dropped a spawned task before it reported back
    #[error("task runtime error: {0}")]
    Join(String),
}

fn join_ids(ids: &[TaskId]) -> String {
    ids.iter().map(TaskId::as_str).collect::<Vec<_>>().join(", ")
}
