//! Composable dependency checks — spec §4.4 last paragraph: "used by
//! SOD/EOD workflows and by the Lifecycle Controller's readiness gating".
//! Kept in this crate (not duplicated in `lifecycle`) so both callers share
//! one implementation.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;

pub type CheckFn = Arc<dyn Fn() -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

#[derive(Clone)]
pub struct DependencyCheck {
    pub name: String,
    pub timeout: Duration,
    pub retry_count: u32,
    pub critical: bool,
    pub check_fn: CheckFn,
}

#[derive(Debug, Clone)]
pub struct DependencyCheckResult {
    pub name: String,
    pub critical: bool,
    pub ok: bool,
    pub error: Option<String>,
}

async fn run_one(check: &DependencyCheck) -> DependencyCheckResult {
    let mut attempts_left = check.retry_count + 1;
    let mut last_error = None;

    while attempts_left > 0 {
        attempts_left -= 1;
        match tokio::time::timeout(check.timeout, (check.check_fn)()).await {
            Ok(Ok(())) => {
                return DependencyCheckResult {
                    name: check.name.clone(),
                    critical: check.critical,
                    ok: true,
                    error: None,
                };
            }
            Ok(Err(e)) => last_error = Some(e.to_string()),
            Err(_) => last_error = Some("dependency check timed out".to_string()),
        }
    }

    DependencyCheckResult {
        name: check.name.clone(),
        critical: check.critical,
        ok: false,
        error: last_error,
    }
}

/// Runs every check in parallel; overall readiness is false if any
/// `critical` check fails.
pub async fn run_dependency_checks(checks: &[DependencyCheck]) -> (bool, Vec<DependencyCheckResult>) {
    let results = futures::future::join_all(checks.iter().map(run_one)).await;
    let ready = results.iter().all(|r| r.ok || !r.critical);
    (ready, results)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok_check(name: &str, critical: bool) -> DependencyCheck {
        DependencyCheck {
            name: name.to_string(),
            timeout: Duration::from_millis(100),
            retry_count: 0,
            critical,
            check_fn: Arc::new(|| Box::pin(async { Ok(()) })),
        }
    }

    fn failing_check(name: &str, critical: bool) -> DependencyCheck {
        DependencyCheck {
            name: name.to_string(),
            timeout: Duration::from_millis(100),
            retry_count: 1,
            critical,
            check_fn: Arc::new(|| Box::pin(async { Err(anyhow::anyhow!("down")) })),
        }
    }

    #[tokio::test]
    async fn non_critical_failure_keeps_readiness() {
        let checks = vec![ok_check("store", true), failing_check("metrics", false)];
        let (ready, results) = run_dependency_checks(&checks).await;
        assert!(ready);
        assert_eq!(results.len(), 2);
    }

    #[tokio::test]
    async fn critical_failure_marks_not_ready() {
        let checks = vec![ok_check("store", true), failing_check("exchange", true)];
        let (ready, _) = run_dependency_checks(&checks).await;
        assert!(!ready);
    }
}
