//! Task results - one per submitted task, never mutated after creation.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use crate::id::TaskId;
use crate::Time;

/// Coarse classification of a task failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The action returned an error
    Failed,
    /// The action exceeded its timeout
    Timeout,
    /// The action panicked
    Panicked,
    /// An upstream dependency did not succeed
    DependencyFailed,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::Failed => write!(f, "failed"),
            ErrorKind::Timeout => write!(f, "timeout"),
            ErrorKind::Panicked => write!(f, "panicked"),
            ErrorKind::DependencyFailed => write!(f, "dependency_failed"),
        }
    }
}

/// Why a task did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskError {
    /// The action returned an error
    #[error("task failed: {message}")]
    Failed {
        /// Error text, including context
        message: String,
    },

    /// The action did not finish within its timeout
    #[error("task timed out after {after:?}")]
    Timeout {
        /// The timeout that was exceeded
        after: Duration,
    },

    /// The action panicked
    #[error("task panicked: {message}")]
    Panicked {
        /// Panic payload, if it was a string
        message: String,
    },

    /// Synthesized for a task whose dependencies never completed
    #[error("dependency failed: {}", join_ids(dependencies))]
    DependencyFailed {
        /// Direct dependencies that never completed
        dependencies: Vec<TaskId>,
    },
}

impl TaskError {
    /// Build a `Failed` error from an action error, keeping its context chain.
    pub fn from_action(err: &anyhow::Error) -> Self {
        Self::Failed {
            message: format!("{:#}", err),
        }
    }

    /// Kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            TaskError::Failed { .. } => ErrorKind::Failed,
            TaskError::Timeout { .. } => ErrorKind::Timeout,
            TaskError::Panicked { .. } => ErrorKind::Panicked,
            TaskError::DependencyFailed { .. } => ErrorKind::DependencyFailed,
        }
    }
}

fn join_ids(ids: &[TaskId]) -> String {
    ids.iter().map(TaskId::as_str).collect::<Vec<_>>().join(", ")
}

/// Outcome of one task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    /// Task this result belongs to
    pub task_id: TaskId,

    /// Whether the action succeeded
    pub success: bool,

    /// Value returned by the action (only on success)
    pub value: Option<Value>,

    /// Failure reason (only on failure)
    pub error: Option<TaskError>,

    /// Time spent running the action, excluding the wait for a permit
    pub execution_time: Duration,

    /// When the result was produced
    pub completed_at: Time,
}

impl TaskResult {
    /// Result of a successful run.
    pub fn succeeded(task_id: TaskId, value: Value, execution_time: Duration) -> Self {
        Self {
            task_id,
            success: true,
            value: Some(value),
            error: None,
            execution_time,
            completed_at: chrono::Utc::now(),
        }
    }

    /// Result of a failed run.
    pub fn failed(task_id: TaskId, error: TaskError, execution_time: Duration) -> Self {
        Self {
            task_id,
            success: false,
            value: None,
            error: Some(error),
            execution_time,
            completed_at: chrono::Utc::now(),
        }
    }

    /// Synthetic result for a task that never ran because its dependencies failed.
    pub fn dependency_failed(task_id: TaskId, dependencies: Vec<TaskId>) -> Self {
        Self::failed(
            task_id,
            TaskError::DependencyFailed { dependencies },
            Duration::ZERO,
        )
    }

    /// Kind of failure, if any.
    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(TaskError::kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_succeeded_result() {
        let result = TaskResult::succeeded("a".into(), json!(1), Duration::from_millis(5));
        assert!(result.success);
        assert_eq!(result.value, Some(json!(1)));
        assert!(result.error.is_none());
        assert!(result.error_kind().is_none());
    }

    #[test]
    fn test_dependency_failed_result() {
        let result = TaskResult::dependency_failed("c".into(), vec!["a".into(), "b".into()]);
        assert!(!result.success);
        assert!(result.value.is_none());
        assert_eq!(result.execution_time, Duration::ZERO);
        assert_eq!(result.error_kind(), Some(ErrorKind::DependencyFailed));
        assert_eq!(
            result.error.unwrap().to_string(),
            "dependency failed: a, b"
        );
    }

    #[test]
    fn test_from_action_keeps_context() {
        let err = anyhow::anyhow!("connection refused").context("fetching issue #12");
        let task_err = TaskError::from_action(&err);
        assert_eq!(task_err.kind(), ErrorKind::Failed);
        assert_eq!(
            task_err,
            TaskError::Failed {
                message: "fetching issue #12: connection refused".to_string()
            }
        );
    }

    #[test]
    fn test_error_serializes_with_kind_tag() {
        let err = TaskError::Timeout {
            after: Duration::from_secs(2),
        };
        let value = serde_json::to_value(&err).unwrap();
        assert_eq!(value["kind"], "timeout");
        assert_eq!(ErrorKind::Timeout.to_string(), "timeout");
    }
}
