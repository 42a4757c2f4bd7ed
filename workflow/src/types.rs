//! Shared types for the workflow engine — spec §3 ("WorkflowTask") and §4.4.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub use store::model::{ExecutionStatus, TaskState};

pub type TaskId = String;

/// CRITICAL > HIGH > MEDIUM > LOW (spec §4.4 "Scheduling model"). Declared
/// low-to-high so the derived `Ord` makes `Priority::Critical` the greatest
/// value, matching the ready-queue's max-heap ordering directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Priority::Critical => "CRITICAL",
            Priority::High => "HIGH",
            Priority::Medium => "MEDIUM",
            Priority::Low => "LOW",
        };
        f.write_str(s)
    }
}

/// Arbitrary parameters threaded into every task body for one execution.
/// Generalizes the teacher's plain function-argument style (no DI
/// container) to a DAG where task bodies are registered ahead of the data
/// they'll run against.
#[derive(Debug, Clone, Default)]
pub struct ExecutionContext {
    values: HashMap<String, String>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }
}

/// A task body. Takes the execution's shared context and a cancellation
/// token threaded by the engine (Design Notes: "Coroutine/async control
/// flow" — standardize on one cancellation token passed by value).
pub type TaskFn =
    Arc<dyn Fn(ExecutionContext, CancellationToken) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

#[derive(Clone)]
pub struct WorkflowTask {
    pub id: TaskId,
    pub name: String,
    pub dependencies: HashSet<TaskId>,
    pub priority: Priority,
    pub timeout: Duration,
    pub retry_count: u32,
    /// FAILED propagates SKIPPED downstream instead of aborting (spec §4.4).
    pub skip_flag: bool,
    pub task_fn: TaskFn,
}

impl fmt::Debug for WorkflowTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkflowTask")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("dependencies", &self.dependencies)
            .field("priority", &self.priority)
            .field("timeout", &self.timeout)
            .field("retry_count", &self.retry_count)
            .field("skip_flag", &self.skip_flag)
            .finish()
    }
}

impl WorkflowTask {
    /// Builds a no-op task whose body always succeeds immediately — used by
    /// the canned `sod`/`eod` workflows where the business semantics of the
    /// task are a Non-goal but the DAG shape still needs a runnable leaf.
    pub fn noop(
        id: impl Into<String>,
        name: impl Into<String>,
        dependencies: impl IntoIterator<Item = String>,
        priority: Priority,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            dependencies: dependencies.into_iter().collect(),
            priority,
            timeout: Duration::from_secs(30),
            retry_count: 0,
            skip_flag: false,
            task_fn: Arc::new(|_ctx, _cancel| Box::pin(async { Ok(()) })),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub execution_id: Uuid,
    pub name: String,
    pub status: ExecutionStatus,
    pub total_tasks: usize,
    pub completed_tasks: usize,
    pub failed_tasks: usize,
    pub task_states: HashMap<TaskId, TaskState>,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WorkflowError {
    #[error("workflow '{0}' has no tasks")]
    EmptyWorkflow(String),
    #[error("duplicate task id '{0}'")]
    DuplicateTaskId(TaskId),
    #[error("task '{0}' depends on unknown task '{1}'")]
    UnknownDependency(TaskId, TaskId),
    #[error("dependency cycle detected involving task '{0}'")]
    CycleDetected(TaskId),
    #[error("unknown workflow '{0}'")]
    UnknownWorkflow(String),
    #[error("unknown execution '{0}'")]
    UnknownExecution(Uuid),
}
