//! The workflow engine's ready-queue scheduler — spec §4.4.
//!
//! Grounded on `scheduler::engine::SchedulerEngine`'s shape (config +
//! mutex-guarded state + store-backed registry) generalized from "fire
//! eligible trading sessions on a market tick" to "run eligible DAG tasks
//! to completion".

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use common::clock::Clock;
use store::model::{ExecutionStatus, TaskState, WorkflowExecutionRecord, WorkflowTaskRecord};
use store::traits::WorkflowStore;

use crate::dag;
use crate::types::{
    ExecutionContext, ExecutionResult, Priority, TaskId, WorkflowError, WorkflowTask,
};

#[derive(Debug, Clone)]
pub struct WorkflowEngineConfig {
    /// Bounds the number of simultaneously running tasks (spec §4.4).
    pub concurrency_limit: usize,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for WorkflowEngineConfig {
    fn default() -> Self {
        Self {
            concurrency_limit: 8,
            base_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(10),
        }
    }
}

pub struct WorkflowEngine {
    cfg: WorkflowEngineConfig,
    store: Arc<dyn WorkflowStore>,
    clock: Arc<dyn Clock>,
    registry: Mutex<HashMap<String, Vec<WorkflowTask>>>,
    executions: Mutex<HashMap<Uuid, ExecutionResult>>,
}

/// Ready-queue entry ordered by priority (CRITICAL highest) then FIFO
/// within a priority tier (spec §4.4 "Scheduling model"). `BinaryHeap` is a
/// max-heap, so equal-priority items compare by *reversed* `seq` — the
/// earliest-enqueued item sorts greatest and pops first.
struct ReadyItem {
    priority: Priority,
    seq: u64,
    task_id: TaskId,
}

impl PartialEq for ReadyItem {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}
impl Eq for ReadyItem {}

impl PartialOrd for ReadyItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ReadyItem {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

enum Event {
    TaskDone {
        task_id: TaskId,
        outcome: Result<(), String>,
        timed_out: bool,
    },
    BackoffElapsed {
        task_id: TaskId,
    },
}

fn compute_backoff(base: Duration, max: Duration, attempt: u32) -> Duration {
    let factor = 2u32.saturating_pow(attempt.min(16));
    base.saturating_mul(factor).min(max)
}

impl WorkflowEngine {
    pub fn new(cfg: WorkflowEngineConfig, store: Arc<dyn WorkflowStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            cfg,
            store,
            clock,
            registry: Mutex::new(HashMap::new()),
            executions: Mutex::new(HashMap::new()),
        }
    }

    /// Validates the DAG (no cycles, no duplicate ids, all dependencies
    /// resolved) and registers it under `name` (spec §4.4).
    pub async fn register_workflow(
        &self,
        name: &str,
        mut tasks: Vec<WorkflowTask>,
    ) -> Result<(), WorkflowError> {
        if tasks.is_empty() {
            return Err(WorkflowError::EmptyWorkflow(name.to_string()));
        }
        dag::normalize_dependencies(&mut tasks);
        dag::validate(&tasks)?;

        self.registry.lock().await.insert(name.to_string(), tasks);
        Ok(())
    }

    pub async fn status(&self, execution_id: Uuid) -> Option<ExecutionResult> {
        self.executions.lock().await.get(&execution_id).cloned()
    }

    /// Runs `name` to completion or abort (spec §4.4 `Execute`).
    pub async fn execute(
        &self,
        name: &str,
        ctx: ExecutionContext,
    ) -> Result<ExecutionResult, WorkflowError> {
        let tasks = {
            let registry = self.registry.lock().await;
            registry
                .get(name)
                .cloned()
                .ok_or_else(|| WorkflowError::UnknownWorkflow(name.to_string()))?
        };

        let execution_id = Uuid::new_v4();
        let started_at = self.clock.now_utc();
        let total_tasks = tasks.len();

        let mut record = WorkflowExecutionRecord {
            execution_id,
            name: name.to_string(),
            started_at,
            completed_at: None,
            total_tasks,
            completed_tasks: 0,
            failed_tasks: 0,
            status: ExecutionStatus::Running,
        };
        if let Err(e) = self.store.create_execution(&record).await {
            tracing::warn!(error = %e, execution_id = %execution_id, "failed to persist workflow execution start");
        }

        let result = self.run_dag(execution_id, name, &tasks, ctx).await;

        record.completed_at = Some(self.clock.now_utc());
        record.completed_tasks = result.completed_tasks;
        record.failed_tasks = result.failed_tasks;
        record.status = result.status;
        if let Err(e) = self.store.update_execution(&record).await {
            tracing::warn!(error = %e, execution_id = %execution_id, "failed to persist workflow execution completion");
        }

        self.executions
            .lock()
            .await
            .insert(execution_id, result.clone());
        Ok(result)
    }

    async fn persist_transition(
        &self,
        execution_id: Uuid,
        task_id: &str,
        state: TaskState,
        attempt: u32,
        started_at: Option<DateTime<Utc>>,
        finished_at: Option<DateTime<Utc>>,
        error: Option<String>,
    ) {
        let record = WorkflowTaskRecord {
            execution_id,
            task_id: task_id.to_string(),
            state,
            attempt,
            started_at,
            finished_at,
            error,
        };
        if let Err(e) = self.store.record_task_transition(&record).await {
            tracing::warn!(error = %e, task_id = %task_id, "failed to persist task transition");
        }
    }

    /// Marks `task_id` and every transitive dependent still `PENDING` as
    /// `SKIPPED` (spec §4.4: `skip_flag=true` FAILED propagates SKIPPED
    /// downstream instead of aborting — S4).
    #[allow(clippy::too_many_arguments)]
    async fn propagate_skip(
        &self,
        execution_id: Uuid,
        from: &TaskId,
        dependents: &HashMap<TaskId, Vec<TaskId>>,
        states: &mut HashMap<TaskId, TaskState>,
        now: DateTime<Utc>,
    ) {
        let mut queue = vec![from.clone()];
        while let Some(id) = queue.pop() {
            let Some(children) = dependents.get(&id) else {
                continue;
            };
            for child in children {
                if matches!(states.get(child), Some(TaskState::Pending)) {
                    states.insert(child.clone(), TaskState::Skipped);
                    self.persist_transition(
                        execution_id,
                        child,
                        TaskState::Skipped,
                        0,
                        None,
                        Some(now),
                        None,
                    )
                    .await;
                    queue.push(child.clone());
                }
            }
        }
    }

    async fn run_dag(
        &self,
        execution_id: Uuid,
        name: &str,
        tasks: &[WorkflowTask],
        ctx: ExecutionContext,
    ) -> ExecutionResult {
        let by_id: HashMap<TaskId, &WorkflowTask> =
            tasks.iter().map(|t| (t.id.clone(), t)).collect();
        let dependents = dag::dependents_of(tasks);

        let mut states: HashMap<TaskId, TaskState> =
            tasks.iter().map(|t| (t.id.clone(), TaskState::Pending)).collect();
        let mut retries_left: HashMap<TaskId, u32> =
            tasks.iter().map(|t| (t.id.clone(), t.retry_count)).collect();
        let mut in_degree: HashMap<TaskId, usize> =
            tasks.iter().map(|t| (t.id.clone(), t.dependencies.len())).collect();

        let mut heap: BinaryHeap<ReadyItem> = BinaryHeap::new();
        let mut seq = 0u64;
        for t in tasks {
            if t.dependencies.is_empty() {
                heap.push(ReadyItem {
                    priority: t.priority,
                    seq,
                    task_id: t.id.clone(),
                });
                seq += 1;
            }
        }

        let cancel = CancellationToken::new();
        let semaphore = Arc::new(Semaphore::new(self.cfg.concurrency_limit.max(1)));
        let mut running: JoinSet<Event> = JoinSet::new();
        let mut in_flight = 0usize;
        let mut aborted = false;

        loop {
            while !aborted {
                let Some(permit) = (if heap.is_empty() {
                    None
                } else {
                    semaphore.clone().try_acquire_owned().ok()
                }) else {
                    break;
                };
                let item = heap.pop().expect("heap non-empty checked above");
                let task = *by_id.get(&item.task_id).expect("task tracked");

                let attempt = task.retry_count - retries_left[&item.task_id];
                let now = self.clock.now_utc();
                states.insert(item.task_id.clone(), TaskState::Running);
                self.persist_transition(
                    execution_id,
                    &item.task_id,
                    TaskState::Running,
                    attempt,
                    Some(now),
                    None,
                    None,
                )
                .await;

                let task_fn = task.task_fn.clone();
                let ctx_clone = ctx.clone();
                let cancel_clone = cancel.clone();
                let timeout_dur = task.timeout;
                let task_id = item.task_id.clone();

                running.spawn(async move {
                    let _permit = permit;
                    match tokio::time::timeout(timeout_dur, task_fn(ctx_clone, cancel_clone)).await
                    {
                        Ok(Ok(())) => Event::TaskDone {
                            task_id,
                            outcome: Ok(()),
                            timed_out: false,
                        },
                        Ok(Err(e)) => Event::TaskDone {
                            task_id,
                            outcome: Err(e.to_string()),
                            timed_out: false,
                        },
                        Err(_) => Event::TaskDone {
                            task_id,
                            outcome: Err("task exceeded its timeout".to_string()),
                            timed_out: true,
                        },
                    }
                });
                in_flight += 1;
            }

            if in_flight == 0 && (heap.is_empty() || aborted) {
                break;
            }

            let Some(joined) = running.join_next().await else {
                break;
            };
            in_flight -= 1;
            let event = joined.expect("workflow task future panicked");

            if aborted {
                // Draining after a CRITICAL abort: outcomes no longer
                // influence final state, already marked CANCELLED.
                continue;
            }

            match event {
                Event::BackoffElapsed { task_id } => {
                    if matches!(states.get(&task_id), Some(TaskState::Pending)) {
                        let task = by_id[&task_id];
                        heap.push(ReadyItem {
                            priority: task.priority,
                            seq,
                            task_id,
                        });
                        seq += 1;
                    }
                }
                Event::TaskDone {
                    task_id,
                    outcome,
                    timed_out,
                } => {
                    let task = by_id[&task_id];
                    let now = self.clock.now_utc();

                    match outcome {
                        Ok(()) => {
                            states.insert(task_id.clone(), TaskState::Success);
                            self.persist_transition(
                                execution_id,
                                &task_id,
                                TaskState::Success,
                                task.retry_count - retries_left[&task_id],
                                None,
                                Some(now),
                                None,
                            )
                            .await;

                            if let Some(children) = dependents.get(&task_id) {
                                for child in children {
                                    let deg = in_degree.get_mut(child).expect("child tracked");
                                    *deg = deg.saturating_sub(1);
                                    if *deg == 0 && matches!(states.get(child), Some(TaskState::Pending)) {
                                        let child_task = by_id[child];
                                        heap.push(ReadyItem {
                                            priority: child_task.priority,
                                            seq,
                                            task_id: child.clone(),
                                        });
                                        seq += 1;
                                    }
                                }
                            }
                        }
                        Err(err_msg) => {
                            let remaining = retries_left.get_mut(&task_id).expect("tracked");
                            let terminal_state = if timed_out {
                                TaskState::Timeout
                            } else {
                                TaskState::Failed
                            };

                            if *remaining > 0 {
                                let attempt = task.retry_count - *remaining;
                                *remaining -= 1;
                                states.insert(task_id.clone(), TaskState::Pending);
                                self.persist_transition(
                                    execution_id,
                                    &task_id,
                                    terminal_state,
                                    attempt,
                                    None,
                                    Some(now),
                                    Some(err_msg),
                                )
                                .await;

                                let backoff = compute_backoff(
                                    self.cfg.base_backoff,
                                    self.cfg.max_backoff,
                                    attempt,
                                );
                                let retry_task_id = task_id.clone();
                                running.spawn(async move {
                                    tokio::time::sleep(backoff).await;
                                    Event::BackoffElapsed {
                                        task_id: retry_task_id,
                                    }
                                });
                                in_flight += 1;
                            } else {
                                states.insert(task_id.clone(), terminal_state);
                                self.persist_transition(
                                    execution_id,
                                    &task_id,
                                    terminal_state,
                                    task.retry_count,
                                    None,
                                    Some(now),
                                    Some(err_msg),
                                )
                                .await;

                                if task.skip_flag {
                                    self.propagate_skip(
                                        execution_id,
                                        &task_id,
                                        &dependents,
                                        &mut states,
                                        now,
                                    )
                                    .await;
                                } else if task.priority == Priority::Critical {
                                    aborted = true;
                                    cancel.cancel();
                                    for t in tasks {
                                        if matches!(
                                            states.get(&t.id),
                                            Some(TaskState::Pending) | Some(TaskState::Running)
                                        ) {
                                            states.insert(t.id.clone(), TaskState::Cancelled);
                                            self.persist_transition(
                                                execution_id,
                                                &t.id,
                                                TaskState::Cancelled,
                                                0,
                                                None,
                                                Some(now),
                                                None,
                                            )
                                            .await;
                                        }
                                    }
                                }
                                // skip_flag=false, non-CRITICAL: dependents
                                // simply never reach in-degree 0 and are
                                // swept to CANCELLED below.
                            }
                        }
                    }
                }
            }
        }

        // Anything still PENDING is permanently blocked (an upstream,
        // non-skip dependency failed without triggering a CRITICAL abort).
        let finished_at = self.clock.now_utc();
        let pending: Vec<TaskId> = states
            .iter()
            .filter(|(_, s)| matches!(s, TaskState::Pending))
            .map(|(id, _)| id.clone())
            .collect();
        for id in pending {
            states.insert(id.clone(), TaskState::Cancelled);
            self.persist_transition(
                execution_id,
                &id,
                TaskState::Cancelled,
                0,
                None,
                Some(finished_at),
                None,
            )
            .await;
        }

        // A FAILED/TIMEOUT task whose `skip_flag` absorbed it (propagated
        // SKIPPED downstream instead of aborting) does not count against
        // `failed_tasks` or flip the overall status — spec §8 S4 ("t2.state
        // =FAILED (skip_flag=true) ... overall execution status=SUCCESS").
        // CANCELLED tasks never count on their own either: they only occur
        // downstream of a CRITICAL abort or a blocked non-skip dependency,
        // both of which already contribute their own triggering task to
        // `failed_tasks` (spec §8 S5: "failed_tasks=1" for `a` alone, not 3
        // for `a`+`b`+`c`).
        let mut completed_tasks = 0usize;
        let mut failed_tasks = 0usize;
        for task in tasks {
            let state = states.get(&task.id).copied().expect("task tracked");
            match state {
                TaskState::Success | TaskState::Skipped => completed_tasks += 1,
                TaskState::Failed | TaskState::Timeout => {
                    if !task.skip_flag {
                        failed_tasks += 1;
                    }
                }
                TaskState::Cancelled => {}
                TaskState::Pending | TaskState::Running => {
                    unreachable!("all tasks resolve to a terminal state before run_dag returns")
                }
            }
        }

        let status = if failed_tasks == 0 {
            ExecutionStatus::Success
        } else {
            ExecutionStatus::Failed
        };

        tracing::info!(
            %execution_id,
            workflow = name,
            %status,
            completed_tasks,
            failed_tasks,
            "workflow execution finished"
        );

        ExecutionResult {
            execution_id,
            name: name.to_string(),
            status,
            total_tasks: tasks.len(),
            completed_tasks,
            failed_tasks,
            task_states: states,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ExecutionContext;
    use common::clock::SystemClock;
    use store::memory::InMemoryStore;

    fn failing_task(id: &str, deps: &[&str], priority: Priority, skip_flag: bool) -> WorkflowTask {
        WorkflowTask {
            id: id.to_string(),
            name: id.to_string(),
            dependencies: deps.iter().map(|s| s.to_string()).collect(),
            priority,
            timeout: Duration::from_millis(200),
            retry_count: 0,
            skip_flag,
            task_fn: Arc::new(|_ctx, _cancel| Box::pin(async { Err(anyhow::anyhow!("boom")) })),
        }
    }

    #[tokio::test]
    async fn s4_skip_propagates_without_aborting() {
        let store = InMemoryStore::new();
        let clock = Arc::new(SystemClock);
        let engine = WorkflowEngine::new(WorkflowEngineConfig::default(), store, clock);

        let tasks = vec![
            WorkflowTask::noop("t1", "t1", Vec::<String>::new(), Priority::Medium),
            failing_task("t2", &["t1"], Priority::Medium, true),
            WorkflowTask::noop("t3", "t3", vec!["t2".to_string()], Priority::Medium),
        ];
        engine.register_workflow("s4", tasks).await.unwrap();
        let result = engine.execute("s4", ExecutionContext::new()).await.unwrap();

        assert_eq!(result.status, ExecutionStatus::Success);
        assert_eq!(result.task_states["t1"], TaskState::Success);
        assert_eq!(result.task_states["t2"], TaskState::Failed);
        assert_eq!(result.task_states["t3"], TaskState::Skipped);
    }

    #[tokio::test]
    async fn s5_critical_failure_aborts() {
        let store = InMemoryStore::new();
        let clock = Arc::new(SystemClock);
        let engine = WorkflowEngine::new(WorkflowEngineConfig::default(), store, clock);

        let tasks = vec![
            failing_task("a", &[], Priority::Critical, false),
            WorkflowTask::noop("b", "b", vec!["a".to_string()], Priority::Medium),
            WorkflowTask::noop("c", "c", vec!["a".to_string()], Priority::Medium),
        ];
        engine.register_workflow("s5", tasks).await.unwrap();
        let result = engine.execute("s5", ExecutionContext::new()).await.unwrap();

        assert_eq!(result.status, ExecutionStatus::Failed);
        assert_eq!(result.task_states["a"], TaskState::Failed);
        assert_eq!(result.task_states["b"], TaskState::Cancelled);
        assert_eq!(result.task_states["c"], TaskState::Cancelled);
    }

    #[tokio::test]
    async fn successful_chain_reports_success() {
        let store = InMemoryStore::new();
        let clock = Arc::new(SystemClock);
        let engine = WorkflowEngine::new(WorkflowEngineConfig::default(), store, clock);

        let tasks = vec![
            WorkflowTask::noop("t1", "t1", Vec::<String>::new(), Priority::Low),
            WorkflowTask::noop("t2", "t2", vec!["t1".to_string()], Priority::High),
        ];
        engine.register_workflow("chain", tasks).await.unwrap();
        let result = engine.execute("chain", ExecutionContext::new()).await.unwrap();

        assert_eq!(result.status, ExecutionStatus::Success);
        assert_eq!(result.completed_tasks, 2);
        assert_eq!(result.failed_tasks, 0);
    }

    #[tokio::test]
    async fn unknown_workflow_execute_errors() {
        let store = InMemoryStore::new();
        let clock = Arc::new(SystemClock);
        let engine = WorkflowEngine::new(WorkflowEngineConfig::default(), store, clock);

        let err = engine
            .execute("does-not-exist", ExecutionContext::new())
            .await
            .unwrap_err();
        assert_eq!(err, WorkflowError::UnknownWorkflow("does-not-exist".to_string()));
    }
}
