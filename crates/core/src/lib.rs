//! parflow core data models.
//!
//! This crate defines the task description handed to the executor and the
//! result it hands back for every task.

#![warn(missing_docs)]

mod id;
mod result;
mod task;

pub use id::{BatchId, TaskId};
pub use result::{ErrorKind, TaskError, TaskResult};
pub use task::{ExecutionTask, Priority, TaskAction, DEFAULT_TIMEOUT};

/// Timestamp type
pub type Time = chrono::DateTime<chrono::Utc>;
