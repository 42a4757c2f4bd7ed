//! The session's client side of the Session <-> Exchange Worker contract
//! (spec §6). A supervisory task owns one `SubscribeMarketData` stream per
//! ACTIVE session; on failure it reconnects with exponential backoff,
//! reusing `WsManager::run`'s backoff-loop shape from the pack but driving
//! a tonic stream instead of a raw WS.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use simproto::exchange_worker_client::ExchangeWorkerClient;
use simproto::{MarketDataUpdate, SubscribeRequest};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::messages::{ServerMessage, SimulatorStatus, SymbolDataView};

pub struct ExchangeClient {
    endpoint: String,
}

impl ExchangeClient {
    pub fn new(endpoint: String) -> Self {
        Self { endpoint }
    }

    /// Runs until `cancel` fires. Never returns `Err` — every connect/stream
    /// failure is logged and retried, matching spec §4.2 "a bounded-retry
    /// reconnect loop engages with exponential backoff".
    pub async fn run(
        self,
        exch_id: String,
        symbols: Vec<String>,
        status: Arc<Mutex<SimulatorStatus>>,
        on_update: mpsc::Sender<MarketDataUpdate>,
        cancel: CancellationToken,
        base_backoff: Duration,
        max_backoff: Duration,
    ) {
        let mut backoff = base_backoff;

        loop {
            if cancel.is_cancelled() {
                return;
            }

            *status.lock().await = SimulatorStatus::Connecting;
            match self.connect_and_stream(&exch_id, &symbols, &status, &on_update, &cancel).await {
                Ok(()) => {
                    backoff = base_backoff;
                    if cancel.is_cancelled() {
                        *status.lock().await = SimulatorStatus::Disconnected;
                        return;
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, %exch_id, "exchange stream failed, backing off");
                    *status.lock().await = SimulatorStatus::Error;
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(backoff) => {}
                _ = cancel.cancelled() => {
                    *status.lock().await = SimulatorStatus::Disconnected;
                    return;
                }
            }
            backoff = (backoff * 2).min(max_backoff);
        }
    }

    async fn connect_and_stream(
        &self,
        exch_id: &str,
        symbols: &[String],
        status: &Mutex<SimulatorStatus>,
        on_update: &mpsc::Sender<MarketDataUpdate>,
        cancel: &CancellationToken,
    ) -> anyhow::Result<()> {
        let channel = tonic::transport::Channel::from_shared(self.endpoint.clone())?
            .connect()
            .await?;
        let mut client = ExchangeWorkerClient::new(channel);

        let request = SubscribeRequest {
            exch_id: exch_id.to_string(),
            symbols: symbols.to_vec(),
        };
        let mut stream = client.subscribe_market_data(request).await?.into_inner();
        *status.lock().await = SimulatorStatus::Connected;

        loop {
            tokio::select! {
                msg = stream.message() => {
                    match msg? {
                        Some(update) => {
                            if on_update.send(update).await.is_err() {
                                return Ok(());
                            }
                        }
                        None => return Ok(()),
                    }
                }
                _ = cancel.cancelled() => return Ok(()),
            }
        }
    }
}

/// Converts a wire `MarketDataUpdate` into the WS outbound envelope
/// (spec §6 `exchange_data {timestamp, data}`).
pub fn to_exchange_data(update: MarketDataUpdate) -> ServerMessage {
    let timestamp = DateTime::<Utc>::from_timestamp_millis(update.timestamp_unix_ms).unwrap_or_else(Utc::now);
    let data = update
        .bars
        .into_iter()
        .map(|bar| SymbolDataView {
            symbol: bar.symbol,
            open: bar.open,
            high: bar.high,
            low: bar.low,
            close: bar.close,
            vwap: bar.vwap,
            vwas: bar.vwas,
            vwav: bar.vwav,
            volume: bar.volume,
            trade_count: bar.trade_count,
            currency: bar.currency,
        })
        .collect();

    ServerMessage::ExchangeData { timestamp, data }
}
