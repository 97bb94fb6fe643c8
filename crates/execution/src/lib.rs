//! Execution layer - parallel executor, dependency analysis, and scheduling.

#![warn(missing_docs)]

pub mod dependency;
pub mod error;
pub mod events;
pub mod executor;
pub mod scheduler;

pub use dependency::{CriticalPathAnalysis, DependencyGraph};
pub use error::{ExecutionError, Result};
pub use events::{ChannelSink, EventSink, ExecutionEvent, NullSink, TracingSink};
pub use executor::{ExecutorConfig, ParallelExecutor};
pub use scheduler::{SchedulerConfig, TaskScheduler, CRITICAL_PATH_BOOST};
