//! Minimal Prometheus exporter shared by every binary.
//!
//! Each component registers its own counters/gauges against the
//! `Registry` returned by `MetricsServer::registry()` and this module
//! only owns the HTTP exposition endpoint on `METRICS_PORT`.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{Router, extract::State, routing::get};
use prometheus::{Encoder, Registry, TextEncoder};

#[derive(Clone)]
pub struct MetricsServer {
    registry: Arc<Registry>,
}

impl MetricsServer {
    pub fn new() -> Self {
        Self {
            registry: Arc::new(Registry::new()),
        }
    }

    pub fn registry(&self) -> Arc<Registry> {
        self.registry.clone()
    }

    /// Serve `/metrics` in the text exposition format until the process
    /// shuts down. Intended to be spawned as a background task.
    pub async fn serve(self, port: u16) -> anyhow::Result<()> {
        let app = Router::new()
            .route("/metrics", get(metrics_handler))
            .with_state(self.registry.clone());

        let addr: SocketAddr = ([0, 0, 0, 0], port).into();
        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!(%addr, "metrics server listening");
        axum::serve(listener, app).await?;
        Ok(())
    }
}

impl Default for MetricsServer {
    fn default() -> Self {
        Self::new()
    }
}

async fn metrics_handler(State(registry): State<Arc<Registry>>) -> String {
    let metric_families = registry.gather();
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "failed to encode metrics");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
