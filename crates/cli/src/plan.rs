//! Batch plan files.
//!
//! A plan is a JSON document listing tasks, their dependencies, and a
//! small built-in action for each one.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use parflow_core::{ExecutionTask, Priority, TaskAction};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;

/// A batch of tasks loaded from disk.
#[derive(Debug, Deserialize)]
pub struct Plan {
    /// Tasks in submission order
    pub tasks: Vec<PlanTask>,
}

/// One task entry in a plan.
#[derive(Debug, Deserialize)]
pub struct PlanTask {
    /// Task ID
    pub id: String,

    /// IDs this task waits for
    #[serde(default)]
    pub depends_on: Vec<String>,

    /// Tier name or integer
    #[serde(default)]
    pub priority: Option<PriorityValue>,

    /// Timeout in seconds
    #[serde(default)]
    pub timeout_secs: Option<u64>,

    /// Free-form bookkeeping
    #[serde(default)]
    pub metadata: HashMap<String, Value>,

    /// What the task does
    pub action: PlanAction,
}

/// Priority as written in a plan.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum PriorityValue {
    /// Raw integer
    Level(i32),
    /// low / normal / high / critical
    Tier(String),
}

impl PriorityValue {
    fn resolve(&self) -> Result<Priority> {
        match self {
            PriorityValue::Level(level) => Ok(Priority(*level)),
            PriorityValue::Tier(tier) => match tier.to_lowercase().as_str() {
                "low" => Ok(Priority::LOW),
                "normal" => Ok(Priority::NORMAL),
                "high" => Ok(Priority::HIGH),
                "critical" => Ok(Priority::CRITICAL),
                other => Err(anyhow!("unknown priority tier: {}", other)),
            },
        }
    }
}

/// Built-in actions available to plan files.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PlanAction {
    /// Wait, then return `output`
    Sleep {
        /// How long to wait
        millis: u64,
        /// Value to return
        #[serde(default)]
        output: Value,
    },
    /// Fail immediately
    Fail {
        /// Error message
        message: String,
    },
    /// Run a program; succeeds on exit code 0
    Command {
        /// Program to run
        program: String,
        /// Arguments
        #[serde(default)]
        args: Vec<String>,
    },
}

#[async_trait]
impl TaskAction for PlanAction {
    async fn run(&self) -> Result<Value> {
        match self {
            PlanAction::Sleep { millis, output } => {
                tokio::time::sleep(Duration::from_millis(*millis)).await;
                Ok(output.clone())
            }
            PlanAction::Fail { message } => Err(anyhow!("{}", message)),
            PlanAction::Command { program, args } => {
                let output = Command::new(program)
                    .args(args)
                    .kill_on_drop(true)
                    .output()
                    .await
                    .with_context(|| format!("failed to spawn {}", program))?;

                let code = output.status.code().unwrap_or(-1);
                let stdout = String::from_utf8_lossy(&output.stdout).to_string();
                if !output.status.success() {
                    let stderr = String::from_utf8_lossy(&output.stderr);
                    bail!("{} exited with {}: {}", program, code, stderr.trim());
                }

                Ok(json!({ "exit_code": code, "stdout": stdout }))
            }
        }
    }
}

impl Plan {
    /// Read a plan from a JSON file.
    pub async fn load(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read plan {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("invalid plan {}", path.display()))
    }

    /// Parse a plan from JSON text.
    pub fn parse(content: &str) -> Result<Self> {
        Ok(serde_json::from_str(content)?)
    }

    /// Convert the plan into executor tasks.
    pub fn into_tasks(self) -> Result<Vec<ExecutionTask>> {
        self.tasks
            .into_iter()
            .map(|entry| {
                let mut task = ExecutionTask::from_action(entry.id.as_str(), Arc::new(entry.action))
                    .with_dependencies(entry.depends_on);

                if let Some(priority) = &entry.priority {
                    let priority = priority
                        .resolve()
                        .with_context(|| format!("task {}", entry.id))?;
                    task = task.with_priority(priority);
                }
                if let Some(secs) = entry.timeout_secs {
                    task = task.with_timeout(Duration::from_secs(secs));
                }
                for (key, value) in entry.metadata {
                    task = task.with_metadata(key, value);
                }

                Ok(task)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parflow_core::DEFAULT_TIMEOUT;

    const PLAN: &str = r#"{
        "tasks": [
            { "id": "fetch", "action": { "type": "sleep", "millis": 1, "output": "issue" } },
            { "id": "review", "depends_on": ["fetch"], "priority": "high",
              "timeout_secs": 30, "metadata": { "issue": 12 },
              "action": { "type": "fail", "message": "model unavailable" } },
            { "id": "report", "depends_on": ["review"], "priority": 7,
              "action": { "type": "command", "program": "echo", "args": ["done"] } }
        ]
    }"#;

    #[test]
    fn test_parse_plan() {
        let tasks = Plan::parse(PLAN).unwrap().into_tasks().unwrap();

        assert_eq!(tasks.len(), 3);
        assert_eq!(tasks[0].priority(), Priority::NORMAL);
        assert_eq!(tasks[0].timeout(), DEFAULT_TIMEOUT);
        assert_eq!(tasks[1].priority(), Priority::HIGH);
        assert_eq!(tasks[1].timeout(), Duration::from_secs(30));
        assert_eq!(tasks[1].metadata().get("issue"), Some(&json!(12)));
        assert!(tasks[1].dependencies().contains("fetch"));
        assert_eq!(tasks[2].priority(), Priority(7));
    }

    #[test]
    fn test_unknown_tier_rejected() {
        let plan = Plan::parse(
            r#"{ "tasks": [ { "id": "a", "priority": "urgent", "action": { "type": "fail", "message": "x" } } ] }"#,
        )
        .unwrap();

        let err = plan.into_tasks().unwrap_err();
        assert!(format!("{:#}", err).contains("unknown priority tier: urgent"));
    }

    #[test]
    fn test_unknown_action_rejected() {
        let result = Plan::parse(r#"{ "tasks": [ { "id": "a", "action": { "type": "teleport" } } ] }"#);
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_sleep_and_fail_actions() {
        let sleep = PlanAction::Sleep { millis: 1, output: json!({ "ok": true }) };
        assert_eq!(sleep.run().await.unwrap(), json!({ "ok": true }));

        let fail = PlanAction::Fail { message: "quota exceeded".to_string() };
        assert_eq!(fail.run().await.unwrap_err().to_string(), "quota exceeded");
    }
}
