//! Process entrypoint for the Lifecycle Controller (spec §4.1, C1).

use std::sync::Arc;

use common::clock::SystemClock;
use common::config_env::Environment;
use common::logger::init_tracing;
use common::metrics::MetricsServer;
use lifecycle::config::AppConfig;
use lifecycle::{LifecycleController, LifecycleControllerConfig, ProcessClusterOps};
use store::traits::ExchangeStore;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = AppConfig::from_env();
    init_tracing("lifecycle-controller", cfg.common.environment.is_production());

    let store: Arc<dyn ExchangeStore> = match cfg.common.environment {
        Environment::Production => Arc::new(
            store::SqlxStore::connect(
                &cfg.common.db.postgres_url(),
                cfg.common.db.min_connections,
                cfg.common.db.max_connections,
            )
            .await?,
        ),
        Environment::Development => store::InMemoryStore::new(),
    };

    let cluster = ProcessClusterOps::new(cfg.exchange_worker_binary.clone());
    let clock = Arc::new(SystemClock);

    let controller = Arc::new(LifecycleController::new(
        LifecycleControllerConfig {
            check_interval: cfg.check_interval,
            health_check_timeout: cfg.health_check_timeout,
            health_check_retry_count: cfg.health_check_retry_count,
        },
        store,
        cluster,
        clock,
    ));

    let cancel = CancellationToken::new();
    let metrics = MetricsServer::new();
    let metrics_task = tokio::spawn(metrics.serve(cfg.common.metrics_port));

    let run_cancel = cancel.clone();
    let controller_task = tokio::spawn(controller.run(run_cancel));

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received shutdown signal");
        }
    }
    cancel.cancel();
    let _ = controller_task.await;
    metrics_task.abort();

    Ok(())
}
