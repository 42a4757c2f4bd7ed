//! The reconciliation control loop — spec §4.1 (C1).
//!
//! Grounded on `scheduler::engine::SchedulerEngine::on_market_tick`'s shape
//! (fetch candidates -> classify -> act) and the teacher's own
//! tick-loop-in-main pattern, generalized here from "sessions per pair" to
//! "exchanges cluster-wide".

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use store::model::{ExchangeWorker, MarketHoursWindow};
use store::traits::ExchangeStore;
use tokio_util::sync::CancellationToken;
use workflow::{run_dependency_checks, DependencyCheck};

use common::clock::Clock;

#[derive(Debug, Clone)]
pub struct LifecycleControllerConfig {
    pub check_interval: Duration,
    /// Per-worker readiness probe deadline (spec §4.4 "composable... with a
    /// timeout and a retry_count").
    pub health_check_timeout: Duration,
    pub health_check_retry_count: u32,
}

impl Default for LifecycleControllerConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(60),
            health_check_timeout: Duration::from_secs(5),
            health_check_retry_count: 1,
        }
    }
}

pub struct LifecycleController {
    cfg: LifecycleControllerConfig,
    store: Arc<dyn ExchangeStore>,
    cluster: Arc<dyn crate::cluster::ClusterOps>,
    clock: Arc<dyn Clock>,
}

/// One `Reconcile()` pass's outcome, useful for tests and for logging a
/// tick summary without re-deriving it from the controller's logs.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    pub started: Vec<String>,
    pub stopped: Vec<String>,
    pub unhealthy: Vec<String>,
}

impl LifecycleController {
    pub fn new(
        cfg: LifecycleControllerConfig,
        store: Arc<dyn ExchangeStore>,
        cluster: Arc<dyn crate::cluster::ClusterOps>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            cfg,
            store,
            cluster,
            clock,
        }
    }

    /// Pure function of exchange metadata and a UTC instant (spec §4.1,
    /// testable property #1). Weekends in the exchange's local timezone
    /// yield `false` regardless of `now_utc`.
    pub fn should_be_running(exchange: &ExchangeWorker, now_utc: DateTime<Utc>) -> bool {
        let local_date = now_utc.with_timezone(&exchange.timezone).date_naive();
        match MarketHoursWindow::compute(exchange, local_date) {
            Some(window) => window.contains(now_utc),
            None => false,
        }
    }

    /// One reconciliation pass (spec §4.1 "Algorithm (one tick)").
    pub async fn reconcile(&self) -> anyhow::Result<ReconcileReport> {
        // Store read failure aborts the tick; the next tick retries from
        // scratch (spec §4.1 "Failure semantics") — the `?` below is
        // exactly that: no partial state is cached across ticks.
        let exchanges = self.store.list_exchanges().await?;
        let now = self.clock.now_utc();

        let desired: HashSet<String> = exchanges
            .iter()
            .filter(|e| Self::should_be_running(e, now))
            .map(|e| e.exch_id.clone())
            .collect();
        let observed = self.cluster.list().await?;

        let mut report = ReconcileReport::default();

        for exchange in exchanges.iter().filter(|e| desired.contains(&e.exch_id)) {
            if observed.contains(&exchange.exch_id) {
                continue;
            }
            let spec = crate::worker_spec::WorkerSpec::from_exchange(exchange);
            match self.cluster.start(spec).await {
                Ok(()) => {
                    tracing::info!(exch_id = %exchange.exch_id, "started exchange worker");
                    report.started.push(exchange.exch_id.clone());
                }
                Err(e) => {
                    tracing::error!(exch_id = %exchange.exch_id, error = %e, "failed to start exchange worker");
                }
            }
        }

        for exch_id in observed.difference(&desired) {
            match self.cluster.stop(exch_id).await {
                Ok(()) => {
                    tracing::info!(%exch_id, "stopped exchange worker");
                    report.stopped.push(exch_id.clone());
                }
                Err(e) => {
                    tracing::error!(%exch_id, error = %e, "failed to stop exchange worker");
                }
            }
        }

        // Health-check each observed worker still desired, composed as a
        // `DependencyCheck` per worker (spec §4.4's composable checks,
        // reused here rather than duplicated) and run in parallel. A worker
        // that fails readiness is logged and left for the next tick — no
        // forced restart here, to avoid flapping (spec §4.1 step 6).
        let checks: Vec<DependencyCheck> = observed
            .intersection(&desired)
            .map(|exch_id| {
                let cluster = self.cluster.clone();
                let exch_id = exch_id.clone();
                DependencyCheck {
                    name: exch_id.clone(),
                    timeout: self.cfg.health_check_timeout,
                    retry_count: self.cfg.health_check_retry_count,
                    critical: false,
                    check_fn: Arc::new(move || {
                        let cluster = cluster.clone();
                        let exch_id = exch_id.clone();
                        Box::pin(async move {
                            if cluster.healthy(&exch_id).await? {
                                Ok(())
                            } else {
                                Err(anyhow::anyhow!("worker failed readiness probe"))
                            }
                        })
                    }),
                }
            })
            .collect();

        let (_, results) = run_dependency_checks(&checks).await;
        for result in results.into_iter().filter(|r| !r.ok) {
            tracing::warn!(exch_id = %result.name, error = ?result.error, "exchange worker failed readiness probe");
            report.unhealthy.push(result.name);
        }

        Ok(report)
    }

    /// Blocks until `cancel` fires, ticking every `check_interval`. A
    /// panicking reconcile pass is caught and logged rather than taking the
    /// process down (Design Notes: "never allow a background task's panic
    /// to terminate the process").
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.cfg.check_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("lifecycle controller shutting down");
                    return;
                }
                _ = interval.tick() => {
                    let this = self.clone();
                    let outcome = tokio::spawn(async move { this.reconcile().await }).await;
                    match outcome {
                        Ok(Ok(report)) => {
                            if !report.started.is_empty() || !report.stopped.is_empty() {
                                tracing::info!(
                                    started = report.started.len(),
                                    stopped = report.stopped.len(),
                                    unhealthy = report.unhealthy.len(),
                                    "reconcile tick complete"
                                );
                            }
                        }
                        Ok(Err(e)) => {
                            tracing::error!(error = %e, "reconcile tick aborted");
                        }
                        Err(join_err) => {
                            tracing::error!(error = %join_err, "reconcile tick panicked");
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::InMemoryClusterOps;
    use chrono::NaiveTime;
    use common::clock::FixedClock;
    use store::memory::InMemoryStore;

    fn ny_exchange(id: &str) -> ExchangeWorker {
        ExchangeWorker {
            exch_id: id.to_string(),
            exchange_type: "equities".to_string(),
            timezone: chrono_tz::America::New_York,
            pre_open_time: NaiveTime::from_hms_opt(4, 0, 0).unwrap(),
            post_close_time: NaiveTime::from_hms_opt(16, 0, 0).unwrap(),
        }
    }

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn s1_market_hours_boundary() {
        let e = ny_exchange("e1");
        assert!(!LifecycleController::should_be_running(&e, at("2025-11-03T08:54:59Z")));
        assert!(LifecycleController::should_be_running(&e, at("2025-11-03T08:55:00Z")));
        assert!(!LifecycleController::should_be_running(&e, at("2025-11-03T21:05:01Z")));
    }

    #[test]
    fn weekend_never_runs() {
        let e = ny_exchange("e1");
        // 2025-11-01 is a Saturday; local noon is well inside pre_open..post_close hours.
        assert!(!LifecycleController::should_be_running(&e, at("2025-11-01T16:00:00Z")));
    }

    #[tokio::test]
    async fn reconcile_starts_desired_and_stops_undesired() {
        let store = InMemoryStore::new();
        store.put_exchange(ny_exchange("open")).await.unwrap();
        store.put_exchange(ny_exchange("closed")).await.unwrap();

        let cluster = InMemoryClusterOps::new();
        // "closed" is already (incorrectly) observed as running.
        cluster
            .start(crate::worker_spec::WorkerSpec::from_exchange(&ny_exchange("closed")))
            .await
            .unwrap();

        let clock = Arc::new(FixedClock::new(at("2025-11-03T12:00:00Z")));
        let controller = LifecycleController::new(
            LifecycleControllerConfig::default(),
            store,
            cluster.clone(),
            clock,
        );

        let report = controller.reconcile().await.unwrap();
        assert_eq!(report.started, vec!["open".to_string()]);
        assert_eq!(report.stopped, vec!["closed".to_string()]);

        let running = cluster.list().await.unwrap();
        assert!(running.contains("open"));
        assert!(!running.contains("closed"));
    }

    #[tokio::test]
    async fn idempotent_starts_and_stops() {
        let store = InMemoryStore::new();
        store.put_exchange(ny_exchange("e1")).await.unwrap();
        let cluster = InMemoryClusterOps::new();
        let clock = Arc::new(FixedClock::new(at("2025-11-03T12:00:00Z")));
        let controller = LifecycleController::new(
            LifecycleControllerConfig::default(),
            store,
            cluster.clone(),
            clock,
        );

        controller.reconcile().await.unwrap();
        controller.reconcile().await.unwrap();
        assert_eq!(cluster.list().await.unwrap().len(), 1);
    }
}
