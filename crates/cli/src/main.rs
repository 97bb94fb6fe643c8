//! parflow CLI - run dependency-aware task batches from plan files.

mod plan;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use parflow_core::{ErrorKind, ExecutionTask, TaskResult};
use parflow_execution::{
    ExecutorConfig, ParallelExecutor, SchedulerConfig, TaskScheduler, CRITICAL_PATH_BOOST,
};
use std::num::NonZeroUsize;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::plan::Plan;

#[derive(Parser)]
#[command(name = "parflow")]
#[command(about = "Dependency-aware parallel task runner", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a plan
    Run {
        /// Plan file (JSON)
        plan: PathBuf,
        /// Max tasks running at once
        #[arg(long, default_value = "4")]
        concurrency: NonZeroUsize,
        /// Priority added to critical-path tasks
        #[arg(long, default_value_t = CRITICAL_PATH_BOOST)]
        boost: i32,
        /// Skip critical-path reprioritization
        #[arg(long)]
        no_optimize: bool,
        /// Print results as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show the critical-path analysis without running anything
    Plan {
        /// Plan file (JSON)
        plan: PathBuf,
        /// Priority added to critical-path tasks
        #[arg(long, default_value_t = CRITICAL_PATH_BOOST)]
        boost: i32,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run { plan, concurrency, boost, no_optimize, json } => {
            let tasks = Plan::load(&plan).await?.into_tasks()?;
            let order: Vec<_> = tasks.iter().map(|t| t.id().clone()).collect();

            let executor = ParallelExecutor::new(ExecutorConfig::new().with_max_concurrent(concurrency));
            let scheduler = TaskScheduler::new(executor).with_config(
                SchedulerConfig::new()
                    .with_boost(boost)
                    .with_enabled(!no_optimize),
            );

            let results = scheduler.run(tasks).await?;
            let ordered: Vec<&TaskResult> = order.iter().filter_map(|id| results.get(id)).collect();

            if json {
                println!("{}", serde_json::to_string_pretty(&ordered)?);
            } else {
                println!("Results ({})", ordered.len());
                for result in &ordered {
                    println!("  {} | {} | {} ms | {}",
                        result.task_id,
                        format_outcome(result),
                        result.execution_time.as_millis(),
                        format_detail(result),
                    );
                }
            }

            let failed = ordered.iter().filter(|r| !r.success).count();
            info!("Completed {} of {} tasks", ordered.len() - failed, ordered.len());
            if failed > 0 {
                bail!("{} task(s) failed", failed);
            }
        }
        Commands::Plan { plan, boost } => {
            let tasks = Plan::load(&plan).await?.into_tasks()?;
            let scheduler = TaskScheduler::default()
                .with_config(SchedulerConfig::new().with_boost(boost));

            let analysis = scheduler.analyze(&tasks);
            let optimized: Vec<ExecutionTask> = scheduler.optimize_order(tasks.clone());

            println!("Critical path length: {}", analysis.length);
            println!("Leaves: {}", analysis.leaves.iter().map(|id| id.as_str()).collect::<Vec<_>>().join(", "));
            println!("Tasks ({})", tasks.len());
            for (original, boosted) in tasks.iter().zip(&optimized) {
                let depth = analysis.depths.get(original.id()).copied().unwrap_or(0);
                println!("  {} | depth {} | {} -> {}{}",
                    original.id(),
                    depth,
                    original.priority(),
                    boosted.priority(),
                    if analysis.is_critical(original.id()) { " | CRITICAL" } else { "" },
                );
            }
        }
    }

    Ok(())
}

fn format_outcome(result: &TaskResult) -> &'static str {
    match result.error_kind() {
        None => "OK",
        Some(ErrorKind::Failed) => "FAILED",
        Some(ErrorKind::Timeout) => "TIMEOUT",
        Some(ErrorKind::Panicked) => "PANICKED",
        Some(ErrorKind::DependencyFailed) => "BLOCKED",
    }
}

fn format_detail(result: &TaskResult) -> String {
    match (&result.value, &result.error) {
        (_, Some(error)) => error.to_string(),
        (Some(value), None) => value.to_string(),
        (None, None) => String::new(),
    }
}
