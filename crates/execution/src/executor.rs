//! Parallel executor - runs a batch of tasks under a fixed concurrency budget.

use futures::FutureExt;
use parflow_core::{BatchId, ExecutionTask, TaskAction, TaskError, TaskId, TaskResult};
use std::any::Any;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::num::NonZeroUsize;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tracing::warn;

use crate::error::{ExecutionError, Result};
use crate::events::{EventSink, ExecutionEvent, TracingSink};

/// Configuration for the parallel executor.
#[derive(Debug, Clone, Copy)]
pub struct ExecutorConfig {
    /// Max tasks running at once
    pub max_concurrent: NonZeroUsize,
    /// Pause before re-checking when nothing could be dispatched
    pub idle_backoff: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_concurrent: NonZeroUsize::new(4).unwrap_or(NonZeroUsize::MIN),
            idle_backoff: Duration::from_millis(10),
        }
    }
}

impl ExecutorConfig {
    /// Create a new config.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set max concurrent tasks.
    pub fn with_max_concurrent(mut self, max: NonZeroUsize) -> Self {
        self.max_concurrent = max;
        self
    }

    /// Set the idle backoff.
    pub fn with_idle_backoff(mut self, backoff: Duration) -> Self {
        self.idle_backoff = backoff;
        self
    }
}

/// Runs batches of tasks, respecting dependencies, priorities and timeouts.
///
/// The permit pool is sized once at construction. Batches run through the
/// same executor share it.
pub struct ParallelExecutor {
    config: ExecutorConfig,
    permits: Arc<Semaphore>,
    sink: Arc<dyn EventSink>,
}

impl ParallelExecutor {
    /// Create a new executor.
    pub fn new(config: ExecutorConfig) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(config.max_concurrent.get())),
            config,
            sink: Arc::new(TracingSink),
        }
    }

    /// Create an executor with the given concurrency limit and default settings.
    pub fn with_concurrency(max_concurrent: NonZeroUsize) -> Self {
        Self::new(ExecutorConfig::default().with_max_concurrent(max_concurrent))
    }

    /// Set the event sink.
    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Get the configuration.
    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Max tasks running at once.
    pub fn concurrency_limit(&self) -> usize {
        self.config.max_concurrent.get()
    }

    /// Run a batch to completion.
    ///
    /// Returns one result per submitted task. Fails only when the batch
    /// contains duplicate IDs or deadlocks; task failures are reported in
    /// the result map.
    pub async fn execute(&self, tasks: Vec<ExecutionTask>) -> Result<HashMap<TaskId, TaskResult>> {
        let batch_id = BatchId::new();
        let started = Instant::now();

        let mut ids = HashSet::with_capacity(tasks.len());
        for task in &tasks {
            if !ids.insert(task.id().clone()) {
                return Err(ExecutionError::DuplicateTask(task.id().clone()));
            }
        }

        self.sink.emit(ExecutionEvent::BatchStarted {
            batch_id,
            total: tasks.len(),
            max_concurrent: self.concurrency_limit(),
        });

        let mut state = BatchState::new(&tasks, ids);
        let mut running: JoinSet<(usize, TaskResult)> = JoinSet::new();

        while !state.is_finished() {
            let mut ready = state.ready(&tasks);

            if ready.is_empty() && state.in_progress.is_empty() {
                if state.blocked_by_failure(&tasks) {
                    self.fail_remaining(batch_id, &tasks, &mut state);
                    break;
                }

                let pending: Vec<TaskId> = state
                    .pending
                    .iter()
                    .map(|&index| tasks[index].id().clone())
                    .collect();
                warn!(%batch_id, ?pending, "Deadlock detected");
                return Err(ExecutionError::Deadlock { pending });
            }

            // Highest priority first, submission order among equals.
            ready.sort_by(|&a, &b| {
                tasks[b]
                    .priority()
                    .cmp(&tasks[a].priority())
                    .then_with(|| a.cmp(&b))
            });

            let available = self.concurrency_limit().saturating_sub(state.in_progress.len());
            for index in ready.into_iter().take(available) {
                let task = &tasks[index];
                state.pending.remove(&index);
                state.in_progress.insert(index);

                self.sink.emit(ExecutionEvent::TaskDispatched {
                    batch_id,
                    task_id: task.id().clone(),
                    priority: task.priority(),
                });

                running.spawn(run_task(
                    index,
                    task.id().clone(),
                    task.action(),
                    task.timeout(),
                    Arc::clone(&self.permits),
                ));
            }

            if state.in_progress.is_empty() {
                tokio::time::sleep(self.config.idle_backoff).await;
                continue;
            }

            // Wait for the first completion, then drain whatever else is done.
            let Some(joined) = running.join_next().await else {
                tokio::time::sleep(self.config.idle_backoff).await;
                continue;
            };
            self.record(batch_id, joined, &mut state)?;
            while let Some(Some(joined)) = running.join_next().now_or_never() {
                self.record(batch_id, joined, &mut state)?;
            }
        }

        let completed = state.completed.len();
        let failed = state.failed.len();
        let elapsed = started.elapsed();
        self.sink.emit(ExecutionEvent::BatchCompleted {
            batch_id,
            completed,
            failed,
            elapsed,
        });

        Ok(state.results)
    }

    /// Record one finished task.
    fn record(
        &self,
        batch_id: BatchId,
        joined: std::result::Result<(usize, TaskResult), JoinError>,
        state: &mut BatchState,
    ) -> Result<()> {
        let (index, result) = joined.map_err(|e| ExecutionError::Join(e.to_string()))?;
        state.in_progress.remove(&index);

        let task_id = result.task_id.clone();
        match &result.error {
            None => {
                state.completed.insert(task_id.clone());
                self.sink.emit(ExecutionEvent::TaskCompleted {
                    batch_id,
                    task_id: task_id.clone(),
                    elapsed: result.execution_time,
                });
            }
            Some(error) => {
                state.failed.insert(task_id.clone());
                self.sink.emit(ExecutionEvent::TaskFailed {
                    batch_id,
                    task_id: task_id.clone(),
                    error: error.clone(),
                    elapsed: result.execution_time,
                });
            }
        }

        state.results.insert(task_id, result);
        Ok(())
    }

    /// Resolve every pending task as a dependency failure.
    fn fail_remaining(&self, batch_id: BatchId, tasks: &[ExecutionTask], state: &mut BatchState) {
        let pending = std::mem::take(&mut state.pending);
        warn!(%batch_id, remaining = pending.len(), "Upstream failures block remaining tasks");

        for index in pending {
            let task = &tasks[index];
            let dependencies: Vec<TaskId> = task
                .dependencies()
                .iter()
                .filter(|dep| !state.is_satisfied(dep))
                .cloned()
                .collect();

            self.sink.emit(ExecutionEvent::DependencyFailed {
                batch_id,
                task_id: task.id().clone(),
                dependencies: dependencies.clone(),
            });
            state.failed.insert(task.id().clone());
            state.results.insert(
                task.id().clone(),
                TaskResult::dependency_failed(task.id().clone(), dependencies),
            );
        }
    }
}

impl Default for ParallelExecutor {
    fn default() -> Self {
        Self::new(ExecutorConfig::default())
    }
}

/// Bookkeeping owned by one `execute` call.
struct BatchState {
    /// Submission indices not yet started
    pending: BTreeSet<usize>,
    /// Submission indices dispatched and not yet finished
    in_progress: HashSet<usize>,
    completed: HashSet<TaskId>,
    failed: HashSet<TaskId>,
    /// IDs present in the batch
    batch: HashSet<TaskId>,
    results: HashMap<TaskId, TaskResult>,
}

impl BatchState {
    fn new(tasks: &[ExecutionTask], batch: HashSet<TaskId>) -> Self {
        Self {
            pending: (0..tasks.len()).collect(),
            in_progress: HashSet::new(),
            completed: HashSet::new(),
            failed: HashSet::new(),
            batch,
            results: HashMap::with_capacity(tasks.len()),
        }
    }

    fn is_finished(&self) -> bool {
        self.pending.is_empty() && self.in_progress.is_empty()
    }

    /// Dependencies outside the batch count as satisfied.
    fn is_satisfied(&self, dep: &TaskId) -> bool {
        self.completed.contains(dep) || !self.batch.contains(dep)
    }

    /// Pending tasks whose dependencies are all satisfied, in submission order.
    fn ready(&self, tasks: &[ExecutionTask]) -> Vec<usize> {
        self.pending
            .iter()
            .copied()
            .filter(|&index| tasks[index].dependencies().iter().all(|dep| self.is_satisfied(dep)))
            .collect()
    }

    fn blocked_by_failure(&self, tasks: &[ExecutionTask]) -> bool {
        self.pending.iter().any(|&index| {
            tasks[index]
                .dependencies()
                .iter()
                .any(|dep| self.failed.contains(dep))
        })
    }
}

/// Run one action under its permit and deadline.
async fn run_task(
    index: usize,
    task_id: TaskId,
    action: Arc<dyn TaskAction>,
    timeout: Duration,
    permits: Arc<Semaphore>,
) -> (usize, TaskResult) {
    let _permit = match permits.acquire().await {
        Ok(permit) => permit,
        Err(_) => {
            let error = TaskError::Failed {
                message: "concurrency permits closed".to_string(),
            };
            return (index, TaskResult::failed(task_id, error, Duration::ZERO));
        }
    };

    let start = Instant::now();
    let outcome = tokio::time::timeout(timeout, AssertUnwindSafe(action.run()).catch_unwind()).await;
    let elapsed = start.elapsed();

    let result = match outcome {
        Err(_) => TaskResult::failed(task_id, TaskError::Timeout { after: timeout }, elapsed),
        Ok(Err(panic)) => TaskResult::failed(
            task_id,
            TaskError::Panicked {
                message: panic_message(panic.as_ref()),
            },
            elapsed,
        ),
        Ok(Ok(Err(err))) => TaskResult::failed(task_id, TaskError::from_action(&err), elapsed),
        Ok(Ok(Ok(value))) => TaskResult::succeeded(task_id, value, elapsed),
    };

    (index, result)
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
