//! Process entrypoint for the Session Singleton (spec §4.2, C2).

use std::sync::Arc;
use std::time::Duration;

use common::clock::SystemClock;
use common::config_env::Environment;
use common::logger::init_tracing;
use common::metrics::MetricsServer;
use session::config::AppConfig;
use session::instance::ReadinessFiles;
use session::{SessionSingleton, SessionSingletonConfig};
use store::traits::SessionStore;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = AppConfig::from_env();
    init_tracing("session-singleton", cfg.common.environment.is_production());

    let store: Arc<dyn SessionStore> = match cfg.common.environment {
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

    let auth = Arc::new(session::auth::InMemoryAuthVerifier::new(cfg.auth_secret.clone()));
    let clock = Arc::new(SystemClock);
    let readiness = ReadinessFiles::new(cfg.ready_file_path.clone(), cfg.active_lock_file_path.clone());

    if cfg.reset_on_startup() {
        if let Some(path) = &cfg.active_lock_file_path {
            let _ = std::fs::remove_file(path);
        }
    }

    let singleton = SessionSingleton::new(
        SessionSingletonConfig {
            session_timeout: cfg.session_timeout,
            session_extension_threshold: cfg.session_extension_threshold,
            drain_timeout: cfg.drain_timeout,
            exch_id: cfg.exch_id.clone(),
            reconnect_base_backoff: cfg.reconnect_base_backoff,
            reconnect_max_backoff: cfg.reconnect_max_backoff,
        },
        store,
        auth,
        clock,
        readiness,
    );

    let cancel = CancellationToken::new();

    let metrics_server = MetricsServer::new();
    let metrics_task = tokio::spawn(metrics_server.serve(cfg.common.metrics_port));

    // Watchdog: closes sessions whose lease lapsed without a heartbeat
    // (spec §8 "A heartbeat arriving after SESSION_TIMEOUT_SECONDS yields
    // EXPIRED and closes the WS").
    let watchdog_singleton = singleton.clone();
    let watchdog_cancel = cancel.clone();
    let heartbeat_interval = cfg.ws_heartbeat_interval;
    let watchdog_task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(heartbeat_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => watchdog_singleton.check_expiry().await,
                _ = watchdog_cancel.cancelled() => return,
            }
        }
    });

    let app = session::ws::router(singleton.clone());
    let addr: std::net::SocketAddr = ([0, 0, 0, 0], cfg.ws_port).into();
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "session singleton WS server listening");

    let server_cancel = cancel.clone();
    let server = axum::serve(listener, app).with_graceful_shutdown(async move {
        server_cancel.cancelled().await;
    });

    tokio::select! {
        result = server => {
            if let Err(e) = result {
                tracing::error!(error = %e, "WS server exited with error");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received shutdown signal");
        }
    }

    cancel.cancel();
    singleton.shutdown().await;
    let _ = tokio::time::timeout(Duration::from_secs(5), watchdog_task).await;
    metrics_task.abort();

    Ok(())
}
