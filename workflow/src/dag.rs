//! DAG validation for `RegisterWorkflow` — spec §4.4.
//!
//! Deliberately pure: no async, no IO, mirroring the teacher's
//! `scheduler::eligibility` style of keeping decision logic synchronous and
//! separately testable from the engine that drives it.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::types::{TaskId, WorkflowError, WorkflowTask};

/// Empty-string dependency ids mean "no dependency" (spec §9 Open
/// Questions) — filtered here, before `validate` ever sees them, not
/// merely skipped at scheduling time.
pub fn normalize_dependencies(tasks: &mut [WorkflowTask]) {
    for task in tasks.iter_mut() {
        task.dependencies.retain(|dep| !dep.is_empty());
    }
}

/// Validates that `tasks` form a DAG with no duplicate ids and every
/// dependency resolved, and returns one valid topological order (Kahn's
/// algorithm) — used only to prove acyclicity; the engine schedules
/// dynamically off live task state, not off this fixed order.
pub fn validate(tasks: &[WorkflowTask]) -> Result<Vec<TaskId>, WorkflowError> {
    let mut seen = HashSet::with_capacity(tasks.len());
    for task in tasks {
        if !seen.insert(task.id.clone()) {
            return Err(WorkflowError::DuplicateTaskId(task.id.clone()));
        }
    }

    for task in tasks {
        for dep in &task.dependencies {
            if !seen.contains(dep) {
                return Err(WorkflowError::UnknownDependency(
                    task.id.clone(),
                    dep.clone(),
                ));
            }
        }
    }

    let mut in_degree: HashMap<&TaskId, usize> =
        tasks.iter().map(|t| (&t.id, t.dependencies.len())).collect();
    let mut dependents: HashMap<&TaskId, Vec<&TaskId>> = HashMap::new();
    for task in tasks {
        for dep in &task.dependencies {
            dependents.entry(dep).or_default().push(&task.id);
        }
    }

    let mut queue: VecDeque<&TaskId> = in_degree
        .iter()
        .filter(|(_, deg)| **deg == 0)
        .map(|(id, _)| *id)
        .collect();

    let mut order = Vec::with_capacity(tasks.len());
    while let Some(id) = queue.pop_front() {
        order.push(id.clone());
        if let Some(children) = dependents.get(id) {
            for child in children {
                let deg = in_degree.get_mut(child).expect("child tracked");
                *deg -= 1;
                if *deg == 0 {
                    queue.push_back(child);
                }
            }
        }
    }

    if order.len() != tasks.len() {
        let stuck = tasks
            .iter()
            .find(|t| !order.contains(&t.id))
            .expect("at least one task remains unresolved");
        return Err(WorkflowError::CycleDetected(stuck.id.clone()));
    }

    Ok(order)
}

/// Reverse-edge lookup (`task_id -> tasks that depend on it`), built once
/// per execution and reused by the scheduler to re-scan eligibility after
/// each completion.
pub fn dependents_of(tasks: &[WorkflowTask]) -> HashMap<TaskId, Vec<TaskId>> {
    let mut dependents: HashMap<TaskId, Vec<TaskId>> = HashMap::new();
    for task in tasks {
        for dep in &task.dependencies {
            dependents.entry(dep.clone()).or_default().push(task.id.clone());
        }
    }
    dependents
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Priority;

    fn task(id: &str, deps: &[&str]) -> WorkflowTask {
        WorkflowTask::noop(id, id, deps.iter().map(|s| s.to_string()), Priority::Medium)
    }

    #[test]
    fn linear_chain_validates() {
        let tasks = vec![task("t1", &[]), task("t2", &["t1"]), task("t3", &["t2"])];
        let order = validate(&tasks).unwrap();
        assert_eq!(order, vec!["t1", "t2", "t3"]);
    }

    #[test]
    fn duplicate_id_rejected() {
        let tasks = vec![task("t1", &[]), task("t1", &[])];
        assert_eq!(
            validate(&tasks).unwrap_err(),
            WorkflowError::DuplicateTaskId("t1".into())
        );
    }

    #[test]
    fn unknown_dependency_rejected() {
        let tasks = vec![task("t1", &["ghost"])];
        assert_eq!(
            validate(&tasks).unwrap_err(),
            WorkflowError::UnknownDependency("t1".into(), "ghost".into())
        );
    }

    #[test]
    fn cycle_rejected() {
        let tasks = vec![task("a", &["b"]), task("b", &["a"])];
        assert!(matches!(
            validate(&tasks).unwrap_err(),
            WorkflowError::CycleDetected(_)
        ));
    }

    #[test]
    fn empty_string_dependency_normalizes_to_none() {
        let mut tasks = vec![WorkflowTask::noop(
            "t1",
            "t1",
            vec!["".to_string()],
            Priority::Medium,
        )];
        normalize_dependencies(&mut tasks);
        assert!(tasks[0].dependencies.is_empty());
        validate(&tasks).unwrap();
    }
}
