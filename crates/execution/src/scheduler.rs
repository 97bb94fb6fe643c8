//! Critical-path scheduling on top of the parallel executor.

use parflow_core::{ExecutionTask, TaskId, TaskResult};
use std::collections::HashMap;
use tracing::{debug, info};

use crate::dependency::{CriticalPathAnalysis, DependencyGraph};
use crate::error::Result;
use crate::executor::ParallelExecutor;

/// Priority added to tasks on the critical path: one tier.
pub const CRITICAL_PATH_BOOST: i32 = 1;

/// Configuration for the task scheduler.
#[derive(Debug, Clone, Copy)]
pub struct SchedulerConfig {
    /// Added to the priority of every critical task
    pub critical_path_boost: i32,
    /// Whether to reprioritize at all
    pub enabled: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            critical_path_boost: CRITICAL_PATH_BOOST,
            enabled: true,
        }
    }
}

impl SchedulerConfig {
    /// Create a new config.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the critical-path boost.
    pub fn with_boost(mut self, boost: i32) -> Self {
        self.critical_path_boost = boost;
        self
    }

    /// Enable or disable reprioritization.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

/// Boosts tasks on the critical path, then hands the batch to the executor.
pub struct TaskScheduler {
    executor: ParallelExecutor,
    config: SchedulerConfig,
}

impl TaskScheduler {
    /// Create a new scheduler.
    pub fn new(executor: ParallelExecutor) -> Self {
        Self {
            executor,
            config: SchedulerConfig::default(),
        }
    }

    /// Set the configuration.
    pub fn with_config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    /// Get the configuration.
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Get the underlying executor.
    pub fn executor(&self) -> &ParallelExecutor {
        &self.executor
    }

    /// Analyze the batch's dependency graph.
    pub fn analyze(&self, tasks: &[ExecutionTask]) -> CriticalPathAnalysis {
        DependencyGraph::from_tasks(tasks).critical_path()
    }

    /// Raise the priority of critical tasks.
    ///
    /// The list order is unchanged; the executor sorts by priority itself.
    /// Never fails: cycles only make the estimate less accurate.
    pub fn optimize_order(&self, tasks: Vec<ExecutionTask>) -> Vec<ExecutionTask> {
        if !self.config.enabled || tasks.is_empty() {
            return tasks;
        }

        let analysis = self.analyze(&tasks);
        info!(
            length = analysis.length,
            critical = analysis.critical.len(),
            "Critical path computed"
        );

        let boost = self.config.critical_path_boost;
        tasks
            .into_iter()
            .map(|task| {
                if analysis.is_critical(task.id()) {
                    let priority = task.priority().boosted(boost);
                    debug!(task_id = %task.id(), %priority, "Boosting critical task");
                    task.with_priority(priority)
                } else {
                    task
                }
            })
            .collect()
    }

    /// Reprioritize and execute a batch.
    pub async fn run(&self, tasks: Vec<ExecutionTask>) -> Result<HashMap<TaskId, TaskResult>> {
        let tasks = self.optimize_order(tasks);
        self.executor.execute(tasks).await
    }
}

impl Default for TaskScheduler {
    fn default() -> Self {
        Self::new(ParallelExecutor::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ExecutionError;
    use parflow_core::Priority;
    use serde_json::Value;
    use std::num::NonZeroUsize;
    use std::sync::{Arc, Mutex};

    fn task(id: &str, deps: &[&str]) -> ExecutionTask {
        ExecutionTask::new(id, || async { anyhow::Ok(Value::Null) })
            .with_dependencies(deps.iter().copied())
    }

    fn priorities(tasks: &[ExecutionTask]) -> Vec<(&str, Priority)> {
        tasks.iter().map(|t| (t.id().as_str(), t.priority())).collect()
    }

    #[test]
    fn test_scheduler_config_builder() {
        let config = SchedulerConfig::new().with_boost(5).with_enabled(false);
        assert_eq!(config.critical_path_boost, 5);
        assert!(!config.enabled);
        assert_eq!(SchedulerConfig::default().critical_path_boost, CRITICAL_PATH_BOOST);
    }

    #[test]
    fn test_optimize_boosts_critical_tasks_only() {
        let scheduler = TaskScheduler::default();
        let tasks = vec![
            task("c", &["b"]),
            task("a", &[]),
            task("b", &["a"]),
            task("side", &[]),
        ];

        let optimized = scheduler.optimize_order(tasks);

        assert_eq!(
            priorities(&optimized),
            vec![
                ("c", Priority::NORMAL),
                ("a", Priority::HIGH),
                ("b", Priority::NORMAL),
                ("side", Priority::NORMAL),
            ]
        );
    }

    #[test]
    fn test_optimize_uses_configured_boost() {
        let scheduler = TaskScheduler::default().with_config(SchedulerConfig::new().with_boost(10));
        let optimized = scheduler.optimize_order(vec![
            task("a", &[]).with_priority(Priority::LOW),
            task("b", &["a"]),
        ]);

        assert_eq!(optimized[0].priority(), Priority(10));
        assert_eq!(optimized[1].priority(), Priority::NORMAL);
    }

    #[test]
    fn test_disabled_scheduler_leaves_priorities() {
        let scheduler = TaskScheduler::default().with_config(SchedulerConfig::new().with_enabled(false));
        let optimized = scheduler.optimize_order(vec![task("a", &[]), task("b", &["a"])]);

        assert!(optimized.iter().all(|t| t.priority() == Priority::NORMAL));
    }

    #[test]
    fn test_optimize_with_cycle_does_not_fail() {
        let scheduler = TaskScheduler::default();
        let optimized = scheduler.optimize_order(vec![task("a", &["b"]), task("b", &["a"])]);
        assert_eq!(optimized.len(), 2);
    }

    #[tokio::test]
    async fn test_critical_root_runs_before_side_work() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let logged = |id: &str, deps: &[&str]| {
            let order = Arc::clone(&order);
            let name = id.to_string();
            ExecutionTask::new(id, move || {
                let order = Arc::clone(&order);
                let name = name.clone();
                async move {
                    order.lock().unwrap().push(name);
                    anyhow::Ok(Value::Null)
                }
            })
            .with_dependencies(deps.iter().copied())
        };

        // Without the boost "side" would run first by submission order.
        let tasks = vec![
            logged("side", &[]),
            logged("root", &[]),
            logged("mid", &["root"]),
            logged("leaf", &["mid"]),
        ];
        let executor = ParallelExecutor::with_concurrency(NonZeroUsize::new(1).unwrap());
        let results = TaskScheduler::new(executor).run(tasks).await.unwrap();

        assert!(results.values().all(|r| r.success));
        assert_eq!(order.lock().unwrap()[0], "root");
    }

    #[tokio::test]
    async fn test_run_surfaces_deadlock() {
        let err = TaskScheduler::default()
            .run(vec![task("a", &["b"]), task("b", &["a"])])
            .await
            .unwrap_err();

        assert!(matches!(err, ExecutionError::Deadlock { .. }));
    }
}
