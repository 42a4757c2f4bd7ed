//! Process entrypoint for an exchange worker (spec §4.3, C3).

use std::sync::Arc;

use common::clock::SystemClock;
use common::config_env::Environment;
use common::logger::init_tracing;
use common::metrics::MetricsServer;
use market::config::AppConfig;
use market::{BarMultiplexer, ExchangeWorkerService, MultiplexerConfig, MultiplexerMetrics, SimulatedBarFeed};
use simproto::exchange_worker_server::ExchangeWorkerServer;
use store::traits::BarStore;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = AppConfig::from_env();
    init_tracing("exchange-worker", cfg.common.environment.is_production());

    let store: Arc<dyn BarStore> = match cfg.common.environment {
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

    let metrics_server = MetricsServer::new();
    let registry = metrics_server.registry();
    let mux_metrics = MultiplexerMetrics::register(&registry)?;

    let multiplexer = BarMultiplexer::new(
        cfg.exch_id.clone(),
        MultiplexerConfig {
            send_deadline: cfg.send_deadline,
            ..MultiplexerConfig::default()
        },
        store,
        mux_metrics,
    );

    let clock = Arc::new(SystemClock);
    let cancel = CancellationToken::new();

    let feed: Arc<dyn market::BarFeed> = match &cfg.replay_file_path {
        Some(path) => Arc::new(market::ReplayBarFeed::new(path.into(), cfg.tick_interval)),
        None => Arc::new(SimulatedBarFeed::new(cfg.symbols.clone(), cfg.tick_interval, clock.clone())),
    };

    let upstream_task = tokio::spawn(multiplexer.clone().run_upstream(feed, cancel.clone()));
    let metrics_task = tokio::spawn(metrics_server.serve(cfg.common.metrics_port));

    let service = ExchangeWorkerService::new(cfg.exch_id.clone(), multiplexer, clock);
    let addr = ([0, 0, 0, 0], cfg.grpc_port).into();
    tracing::info!(%addr, exch_id = %cfg.exch_id, "exchange worker gRPC listening");

    let grpc_cancel = cancel.clone();
    let server = tonic::transport::Server::builder()
        .add_service(ExchangeWorkerServer::new(service))
        .serve_with_shutdown(addr, async move { grpc_cancel.cancelled().await });

    tokio::select! {
        result = server => {
            if let Err(e) = result {
                tracing::error!(error = %e, "gRPC server exited with error");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received shutdown signal");
        }
    }

    cancel.cancel();
    let _ = upstream_task.await;
    metrics_task.abort();

    Ok(())
}
