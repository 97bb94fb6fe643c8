//! Progress events emitted while a batch runs.
//!
//! Sinks are fire-and-forget: emitting never fails and never blocks the
//! coordinating loop.

use parflow_core::{BatchId, Priority, TaskError, TaskId};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Lifecycle events for a batch and its tasks.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionEvent {
    /// A batch was accepted.
    BatchStarted {
        /// Batch being run.
        batch_id: BatchId,
        /// Number of submitted tasks.
        total: usize,
        /// Concurrency limit for the batch.
        max_concurrent: usize,
    },
    /// A task was handed a slot.
    TaskDispatched {
        /// Batch being run.
        batch_id: BatchId,
        /// Dispatched task.
        task_id: TaskId,
        /// Priority it was dispatched with.
        priority: Priority,
    },
    /// A task finished successfully.
    TaskCompleted {
        /// Batch being run.
        batch_id: BatchId,
        /// Finished task.
        task_id: TaskId,
        /// Time spent in the action.
        elapsed: Duration,
    },
    /// A task ran and failed.
    TaskFailed {
        /// Batch being run.
        batch_id: BatchId,
        /// Failed task.
        task_id: TaskId,
        /// Failure reason.
        error: TaskError,
        /// Time spent in the action.
        elapsed: Duration,
    },
    /// A task was never run because its dependencies failed.
    DependencyFailed {
        /// Batch being run.
        batch_id: BatchId,
        /// Skipped task.
        task_id: TaskId,
        /// Direct dependencies that did not complete.
        dependencies: Vec<TaskId>,
    },
    /// Every task has a result.
    BatchCompleted {
        /// Batch being run.
        batch_id: BatchId,
        /// Tasks that succeeded.
        completed: usize,
        /// Tasks that failed, directly or through a dependency.
        failed: usize,
        /// Wall-clock time of the batch.
        elapsed: Duration,
    },
}

/// Receiver of execution events.
pub trait EventSink: Send + Sync {
    /// Deliver one event. Must not block.
    fn emit(&self, event: ExecutionEvent);
}

/// Sink that writes events to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: ExecutionEvent) {
        match event {
            ExecutionEvent::BatchStarted { batch_id, total, max_concurrent } => {
                info!(%batch_id, total, max_concurrent, "batch started");
            }
            ExecutionEvent::TaskDispatched { batch_id, task_id, priority } => {
                debug!(%batch_id, %task_id, %priority, "task dispatched");
            }
            ExecutionEvent::TaskCompleted { batch_id, task_id, elapsed } => {
                debug!(%batch_id, %task_id, ?elapsed, "task completed");
            }
            ExecutionEvent::TaskFailed { batch_id, task_id, error, elapsed } => {
                warn!(%batch_id, %task_id, %error, ?elapsed, "task failed");
            }
            ExecutionEvent::DependencyFailed { batch_id, task_id, dependencies } => {
                warn!(%batch_id, %task_id, ?dependencies, "task skipped: dependency failed");
            }
            ExecutionEvent::BatchCompleted { batch_id, completed, failed, elapsed } => {
                info!(%batch_id, completed, failed, ?elapsed, "batch completed");
            }
        }
    }
}

/// Sink forwarding events into a channel.
///
/// Uses `try_send`, so a full or closed channel drops the event.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<ExecutionEvent>,
}

impl ChannelSink {
    /// Create a sink writing into `tx`.
    pub fn new(tx: mpsc::Sender<ExecutionEvent>) -> Self {
        Self { tx }
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: ExecutionEvent) {
        if self.tx.try_send(event).is_err() {
            debug!("event channel full or closed, dropping event");
        }
    }
}

/// Sink that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: ExecutionEvent) {}
}
