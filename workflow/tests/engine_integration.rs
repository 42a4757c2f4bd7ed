//! End-to-end exercise of the workflow engine against a `Store`, the way
//! `session::tests::session_manager_integration` drives `SessionManager`
//! against a real store instead of a mock.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use common::clock::SystemClock;
use store::model::ExecutionStatus;
use store::InMemoryStore;
use workflow::engine::{WorkflowEngine, WorkflowEngineConfig};
use workflow::types::{ExecutionContext, Priority, WorkflowTask};

fn engine() -> WorkflowEngine {
    WorkflowEngine::new(WorkflowEngineConfig::default(), InMemoryStore::new(), Arc::new(SystemClock))
}

#[tokio::test]
async fn three_task_chain_runs_to_success() {
    let engine = engine();
    let order = Arc::new(std::sync::Mutex::new(Vec::new()));

    let make_task = |id: &str, deps: Vec<String>, order: Arc<std::sync::Mutex<Vec<String>>>| {
        let id_owned = id.to_string();
        WorkflowTask {
            id: id.to_string(),
            name: id.to_string(),
            dependencies: deps.into_iter().collect(),
            priority: Priority::Medium,
            timeout: Duration::from_secs(5),
            retry_count: 0,
            skip_flag: false,
            task_fn: Arc::new(move |_ctx, _cancel| {
                let order = order.clone();
                let id_owned = id_owned.clone();
                Box::pin(async move {
                    order.lock().unwrap().push(id_owned);
                    Ok(())
                })
            }),
        }
    };

    let tasks = vec![
        make_task("a", vec![], order.clone()),
        make_task("b", vec!["a".into()], order.clone()),
        make_task("c", vec!["b".into()], order.clone()),
    ];
    engine.register_workflow("chain", tasks).await.unwrap();

    let result = engine.execute("chain", ExecutionContext::new()).await.unwrap();
    assert_eq!(result.status, ExecutionStatus::Success);
    assert_eq!(result.completed_tasks, 3);
    assert_eq!(result.failed_tasks, 0);

    let ran = order.lock().unwrap().clone();
    assert_eq!(ran, vec!["a", "b", "c"]);

    let status = engine.status(result.execution_id).await.unwrap();
    assert_eq!(status.status, ExecutionStatus::Success);
}

#[tokio::test]
async fn non_critical_failure_skips_dependents_without_aborting_siblings() {
    let engine = engine();
    let sibling_ran = Arc::new(AtomicUsize::new(0));

    let failing = WorkflowTask {
        id: "fails".into(),
        name: "fails".into(),
        dependencies: Default::default(),
        priority: Priority::Medium,
        timeout: Duration::from_secs(5),
        retry_count: 0,
        skip_flag: true,
        task_fn: Arc::new(|_ctx, _cancel| Box::pin(async { Err(anyhow::anyhow!("boom")) })),
    };
    let downstream = WorkflowTask::noop("downstream", "downstream", vec!["fails".into()], Priority::Medium);

    let sibling_counter = sibling_ran.clone();
    let sibling = WorkflowTask {
        id: "sibling".into(),
        name: "sibling".into(),
        dependencies: Default::default(),
        priority: Priority::Medium,
        timeout: Duration::from_secs(5),
        retry_count: 0,
        skip_flag: false,
        task_fn: Arc::new(move |_ctx, _cancel| {
            let sibling_counter = sibling_counter.clone();
            Box::pin(async move {
                sibling_counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        }),
    };

    engine
        .register_workflow("partial_failure", vec![failing, downstream, sibling])
        .await
        .unwrap();

    let result = engine.execute("partial_failure", ExecutionContext::new()).await.unwrap();
    // skip_flag=true absorbs the failure instead of aborting the execution
    // (spec §8 S4: overall status is SUCCESS even though `fails` itself
    // ends FAILED).
    assert_eq!(result.status, ExecutionStatus::Success);
    assert_eq!(sibling_ran.load(Ordering::SeqCst), 1, "unrelated sibling must still run");
    assert_eq!(
        result.task_states.get("downstream"),
        Some(&store::model::TaskState::Skipped)
    );
}

#[tokio::test]
async fn executing_unregistered_workflow_errors() {
    let engine = engine();
    let err = engine.execute("missing", ExecutionContext::new()).await.unwrap_err();
    assert!(matches!(err, workflow::types::WorkflowError::UnknownWorkflow(name) if name == "missing"));
}
