//! Canned `sod`/`eod` workflow definitions — spec §4.4 closing paragraph.
//!
//! The business semantics of start-of-day/end-of-day processing are a
//! Non-goal (spec.md §1); these exist to give the engine realistic DAGs to
//! run in tests and demonstrate the priority/skip/critical rules
//! end-to-end. Callers (the lifecycle and session binaries) supply the
//! actual check closures at wiring time.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use crate::dependency_check::{run_dependency_checks, CheckFn, DependencyCheck};
use crate::types::{Priority, WorkflowTask};

/// Checks wired into the `sod` ("start of day") workflow.
pub struct SodChecks {
    /// Warms up the market-data subsystem before the session opens.
    pub market_data_warmup: CheckFn,
    /// Confirms the configured `Store` backend is reachable.
    pub store_connectivity: CheckFn,
    /// One check per exchange worker the session expects to fan out to.
    pub exchange_readiness: Vec<DependencyCheck>,
}

/// Checks wired into the `eod` ("end of day") workflow.
pub struct EodChecks {
    /// Flushes any buffered bars still held by the multiplexer.
    pub final_bar_flush: CheckFn,
    /// Confirms every session has transitioned out of ACTIVE.
    pub session_drain_confirmation: CheckFn,
    /// Confirms the day's bars were handed off for archival.
    pub archival_dependency: DependencyCheck,
}

fn single_check_task(
    id: &str,
    name: &str,
    dependencies: &[&str],
    priority: Priority,
    timeout: Duration,
    retry_count: u32,
    skip_flag: bool,
    check_fn: CheckFn,
) -> WorkflowTask {
    WorkflowTask {
        id: id.to_string(),
        name: name.to_string(),
        dependencies: dependencies.iter().map(|s| s.to_string()).collect(),
        priority,
        timeout,
        retry_count,
        skip_flag,
        task_fn: Arc::new(move |_ctx, _cancel| {
            let check_fn = check_fn.clone();
            Box::pin(async move { check_fn().await })
        }),
    }
}

fn fan_in_task(
    id: &str,
    name: &str,
    dependencies: &[&str],
    priority: Priority,
    skip_flag: bool,
    checks: Vec<DependencyCheck>,
) -> WorkflowTask {
    let checks = Arc::new(checks);
    let timeout = checks
        .iter()
        .map(|c| c.timeout)
        .max()
        .unwrap_or(Duration::from_secs(30));

    WorkflowTask {
        id: id.to_string(),
        name: name.to_string(),
        dependencies: dependencies.iter().map(|s| s.to_string()).collect(),
        priority,
        timeout,
        retry_count: 1,
        skip_flag,
        task_fn: Arc::new(move |_ctx, _cancel| {
            let checks = checks.clone();
            Box::pin(async move {
                let (ready, results) = run_dependency_checks(&checks).await;
                if ready {
                    Ok(())
                } else {
                    let failed: Vec<String> = results
                        .into_iter()
                        .filter(|r| !r.ok)
                        .map(|r| r.name)
                        .collect();
                    Err(anyhow::anyhow!(
                        "dependency fan-in failed: {}",
                        failed.join(", ")
                    ))
                }
            })
        }),
    }
}

/// `market_data_warmup` and `store_connectivity` run in parallel (no
/// dependencies between them, both HIGH/CRITICAL so they're scheduled
/// ahead of anything else); `exchange_worker_readiness` fans in on both and
/// is allowed to SKIP the rest of the day's warm-up if an exchange worker
/// never reports ready, rather than aborting the whole session.
pub fn sod_workflow(checks: SodChecks) -> Vec<WorkflowTask> {
    vec![
        single_check_task(
            "market_data_warmup",
            "market data warm-up",
            &[],
            Priority::High,
            Duration::from_secs(30),
            2,
            false,
            checks.market_data_warmup,
        ),
        single_check_task(
            "store_connectivity",
            "store connectivity check",
            &[],
            Priority::Critical,
            Duration::from_secs(10),
            1,
            false,
            checks.store_connectivity,
        ),
        fan_in_task(
            "exchange_worker_readiness",
            "exchange worker readiness fan-in",
            &["market_data_warmup", "store_connectivity"],
            Priority::Medium,
            true,
            checks.exchange_readiness,
        ),
    ]
}

/// `final_bar_flush` and `session_drain_confirmation` both gate
/// `archival_dependency_check`; archival is CRITICAL because an
/// unarchived trading day cannot be silently skipped.
pub fn eod_workflow(checks: EodChecks) -> Vec<WorkflowTask> {
    vec![
        single_check_task(
            "final_bar_flush",
            "final bar flush",
            &[],
            Priority::High,
            Duration::from_secs(30),
            1,
            false,
            checks.final_bar_flush,
        ),
        single_check_task(
            "session_drain_confirmation",
            "session drain confirmation",
            &[],
            Priority::High,
            Duration::from_secs(60),
            2,
            false,
            checks.session_drain_confirmation,
        ),
        fan_in_task(
            "archival_dependency_check",
            "archival dependency check",
            &["final_bar_flush", "session_drain_confirmation"],
            Priority::Critical,
            false,
            vec![checks.archival_dependency],
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok() -> CheckFn {
        Arc::new(|| Box::pin(async { Ok(()) }))
    }

    fn failing() -> CheckFn {
        Arc::new(|| Box::pin(async { Err(anyhow::anyhow!("unreachable")) }))
    }

    fn check(name: &str, ok: bool, critical: bool) -> DependencyCheck {
        DependencyCheck {
            name: name.to_string(),
            timeout: Duration::from_millis(50),
            retry_count: 0,
            critical,
            check_fn: if ok { ok() } else { failing() },
        }
    }

    #[test]
    fn sod_workflow_shape() {
        let tasks = sod_workflow(SodChecks {
            market_data_warmup: ok(),
            store_connectivity: ok(),
            exchange_readiness: vec![check("worker-1", true, true)],
        });
        assert_eq!(tasks.len(), 3);
        let fan_in = tasks
            .iter()
            .find(|t| t.id == "exchange_worker_readiness")
            .unwrap();
        assert!(fan_in.skip_flag);
        assert!(fan_in.dependencies.contains("market_data_warmup"));
        assert!(fan_in.dependencies.contains("store_connectivity"));
    }

    #[test]
    fn eod_archival_is_not_skippable() {
        let tasks = eod_workflow(EodChecks {
            final_bar_flush: ok(),
            session_drain_confirmation: ok(),
            archival_dependency: check("archive", true, true),
        });
        let archival = tasks
            .iter()
            .find(|t| t.id == "archival_dependency_check")
            .unwrap();
        assert!(!archival.skip_flag);
        assert_eq!(archival.priority, Priority::Critical);
    }
}
