//! Task model - the immutable description of one unit of work.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::id::TaskId;

/// Timeout applied to a task unless the caller overrides it.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60 * 60);

/// The work a task performs.
///
/// Arguments are bound at construction time, so an action is invoked
/// without parameters. Closures returning a future implement this trait
/// directly; stateful actions can implement it on their own types.
#[async_trait]
pub trait TaskAction: Send + Sync {
    /// Run the action once.
    async fn run(&self) -> anyhow::Result<Value>;
}

#[async_trait]
impl<F, Fut> TaskAction for F
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    async fn run(&self) -> anyhow::Result<Value> {
        (self)().await
    }
}

/// Scheduling priority. Higher values run first among ready tasks.
///
/// The named tiers are a convention; any integer is accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Priority(pub i32);

impl Priority {
    /// Background work
    pub const LOW: Self = Self(0);
    /// Default tier
    pub const NORMAL: Self = Self(1);
    /// Should run ahead of normal work
    pub const HIGH: Self = Self(2);
    /// Runs ahead of everything else
    pub const CRITICAL: Self = Self(3);

    /// Raw integer value.
    pub fn value(self) -> i32 {
        self.0
    }

    /// Priority raised by `by`, saturating at the integer bounds.
    pub fn boosted(self, by: i32) -> Self {
        Self(self.0.saturating_add(by))
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::NORMAL
    }
}

impl From<i32> for Priority {
    fn from(value: i32) -> Self {
        Self(value)
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            Self::LOW => write!(f, "low"),
            Self::NORMAL => write!(f, "normal"),
            Self::HIGH => write!(f, "high"),
            Self::CRITICAL => write!(f, "critical"),
            Self(other) => write!(f, "{}", other),
        }
    }
}

/// A unit of work submitted to the executor.
///
/// Built with the consuming `with_*` methods and never modified once
/// handed to an executor. Cloning is cheap: the action is shared.
#[derive(Clone)]
pub struct ExecutionTask {
    id: TaskId,
    action: Arc<dyn TaskAction>,
    dependencies: BTreeSet<TaskId>,
    priority: Priority,
    timeout: Duration,
    metadata: HashMap<String, Value>,
}

impl ExecutionTask {
    /// Create a task from a closure returning a future.
    pub fn new<F, Fut>(id: impl Into<TaskId>, action: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        Self::from_action(id, Arc::new(action))
    }

    /// Create a task from a shared action object.
    pub fn from_action(id: impl Into<TaskId>, action: Arc<dyn TaskAction>) -> Self {
        Self {
            id: id.into(),
            action,
            dependencies: BTreeSet::new(),
            priority: Priority::default(),
            timeout: DEFAULT_TIMEOUT,
            metadata: HashMap::new(),
        }
    }

    /// Add a single dependency.
    pub fn depends_on(mut self, id: impl Into<TaskId>) -> Self {
        self.dependencies.insert(id.into());
        self
    }

    /// Add several dependencies.
    pub fn with_dependencies<I, T>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<TaskId>,
    {
        self.dependencies.extend(ids.into_iter().map(Into::into));
        self
    }

    /// Set the priority.
    pub fn with_priority(mut self, priority: impl Into<Priority>) -> Self {
        self.priority = priority.into();
        self
    }

    /// Set the timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Attach a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Task identifier.
    pub fn id(&self) -> &TaskId {
        &self.id
    }

    /// Shared handle to the action.
    pub fn action(&self) -> Arc<dyn TaskAction> {
        Arc::clone(&self.action)
    }

    /// Declared dependencies, in ID order.
    pub fn dependencies(&self) -> &BTreeSet<TaskId> {
        &self.dependencies
    }

    /// Scheduling priority.
    pub fn priority(&self) -> Priority {
        self.priority
    }

    /// Maximum time the action may run.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Caller bookkeeping.
    pub fn metadata(&self) -> &HashMap<String, Value> {
        &self.metadata
    }
}

impl std::fmt::Debug for ExecutionTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionTask")
            .field("id", &self.id)
            .field("dependencies", &self.dependencies)
            .field("priority", &self.priority)
            .field("timeout", &self.timeout)
            .field("metadata", &self.metadata)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_task_defaults() {
        let task = ExecutionTask::new("fetch", || async { anyhow::Ok(Value::Null) });
        assert_eq!(task.id().as_str(), "fetch");
        assert!(task.dependencies().is_empty());
        assert_eq!(task.priority(), Priority::NORMAL);
        assert_eq!(task.timeout(), DEFAULT_TIMEOUT);
        assert!(task.metadata().is_empty());
    }

    #[test]
    fn test_task_builder() {
        let task = ExecutionTask::new("review", || async { anyhow::Ok(Value::Null) })
            .depends_on("fetch")
            .with_dependencies(["lint", "fetch"])
            .with_priority(Priority::HIGH)
            .with_timeout(Duration::from_secs(30))
            .with_metadata("issue", 42);

        let deps: Vec<_> = task.dependencies().iter().map(TaskId::as_str).collect();
        assert_eq!(deps, vec!["fetch", "lint"]);
        assert_eq!(task.priority(), Priority::HIGH);
        assert_eq!(task.timeout(), Duration::from_secs(30));
        assert_eq!(task.metadata().get("issue"), Some(&json!(42)));
    }

    #[tokio::test]
    async fn test_closure_action_captures_arguments() {
        let repo = "parflow".to_string();
        let task = ExecutionTask::new("clone", move || {
            let repo = repo.clone();
            async move { anyhow::Ok(json!({ "repo": repo })) }
        });

        let value = task.action().run().await.unwrap();
        assert_eq!(value, json!({ "repo": "parflow" }));
    }

    #[test]
    fn test_priority_ordering_and_display() {
        assert!(Priority::CRITICAL > Priority::HIGH);
        assert!(Priority::HIGH > Priority::NORMAL);
        assert!(Priority::NORMAL > Priority::LOW);
        assert_eq!(Priority::LOW.boosted(2), Priority::HIGH);
        assert_eq!(Priority(i32::MAX).boosted(1), Priority(i32::MAX));
        assert_eq!(Priority::CRITICAL.to_string(), "critical");
        assert_eq!(Priority(7).to_string(), "7");
    }
}
