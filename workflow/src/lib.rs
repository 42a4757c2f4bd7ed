//! Workflow Engine — spec §4.4 (C4).
//!
//! Shape is grounded on the teacher's `scheduler::engine::SchedulerEngine` +
//! `scheduler::state::SchedulerState`: a config struct, a mutex-guarded
//! scheduling state, a `Store`-backed registry, and a tick/event-driven
//! core loop, generalized here from "fire eligible trading sessions" to
//! "run eligible DAG tasks".

pub mod dag;
pub mod dependency_check;
pub mod engine;
pub mod types;
pub mod workflows;

pub use dependency_check::{run_dependency_checks, DependencyCheck};
pub use engine::{WorkflowEngine, WorkflowEngineConfig};
pub use types::{
    ExecutionContext, ExecutionResult, Priority, TaskFn, TaskId, WorkflowError, WorkflowTask,
};
