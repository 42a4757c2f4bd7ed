//! The upstream bar feed — the single external collaborator C3 subscribes
//! to (spec §4.3 "owns a single upstream subscription to the bar feed").
//! The real feed's wire protocol is out of scope (spec §1); this module
//! ships the trait plus two runnable implementations: a synthetic
//! generator for local development and tests, and a line-delimited JSON
//! file replay for deterministic demos.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use store::model::MarketDataBar;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use common::clock::Clock;

#[async_trait]
pub trait BarFeed: Send + Sync {
    /// Runs until `cancel` fires or the feed itself fails. Returning `Err`
    /// triggers the multiplexer's exponential-backoff reconnect (spec §4.3
    /// "Failure semantics"); returning `Ok(())` is a clean shutdown.
    async fn run(&self, tx: mpsc::Sender<Vec<MarketDataBar>>, cancel: CancellationToken) -> anyhow::Result<()>;
}

/// Synthetic bar generator used for local development and integration
/// tests: one bar per configured symbol every `tick_interval`, with a
/// monotonically drifting price so successive bars are distinguishable.
pub struct SimulatedBarFeed {
    symbols: Vec<String>,
    tick_interval: Duration,
    clock: Arc<dyn Clock>,
    currency: String,
}

impl SimulatedBarFeed {
    pub fn new(symbols: Vec<String>, tick_interval: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            symbols,
            tick_interval,
            clock,
            currency: "USD".to_string(),
        }
    }
}

#[async_trait]
impl BarFeed for SimulatedBarFeed {
    async fn run(&self, tx: mpsc::Sender<Vec<MarketDataBar>>, cancel: CancellationToken) -> anyhow::Result<()> {
        let mut interval = tokio::time::interval(self.tick_interval);
        let mut tick: i64 = 0;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = interval.tick() => {
                    tick += 1;
                    let ts = store::model::floor_to_minute(self.clock.now_utc());
                    let drift = Decimal::new(tick % 1000, 2);

                    let bars: Vec<MarketDataBar> = self
                        .symbols
                        .iter()
                        .map(|symbol| MarketDataBar {
                            timestamp: ts,
                            symbol: symbol.clone(),
                            open: Decimal::ONE_HUNDRED + drift,
                            high: Decimal::ONE_HUNDRED + drift + Decimal::ONE,
                            low: Decimal::ONE_HUNDRED + drift - Decimal::ONE,
                            close: Decimal::ONE_HUNDRED + drift,
                            vwap: Decimal::ONE_HUNDRED + drift,
                            vwas: Decimal::new(5, 1),
                            vwav: Decimal::new(1000, 0),
                            volume: 1_000 + tick,
                            trade_count: 10 + (tick % 50),
                            currency: self.currency.clone(),
                        })
                        .collect();

                    if tx.send(bars).await.is_err() {
                        return Ok(());
                    }
                }
            }
        }
    }
}

/// Replays bars from a line-delimited JSON file (`MarketDataBar` fields),
/// one line per bar, grouped into batches by identical timestamp. Useful
/// for deterministic demos against a recorded trading day.
pub struct ReplayBarFeed {
    path: PathBuf,
    pace: Duration,
}

#[derive(serde::Deserialize)]
struct ReplayRecord {
    timestamp: chrono::DateTime<Utc>,
    symbol: String,
    open: Decimal,
    high: Decimal,
    low: Decimal,
    close: Decimal,
    vwap: Decimal,
    vwas: Decimal,
    vwav: Decimal,
    volume: i64,
    trade_count: i64,
    currency: String,
}

impl From<ReplayRecord> for MarketDataBar {
    fn from(r: ReplayRecord) -> Self {
        MarketDataBar {
            timestamp: r.timestamp,
            symbol: r.symbol,
            open: r.open,
            high: r.high,
            low: r.low,
            close: r.close,
            vwap: r.vwap,
            vwas: r.vwas,
            vwav: r.vwav,
            volume: r.volume,
            trade_count: r.trade_count,
            currency: r.currency,
        }
    }
}

impl ReplayBarFeed {
    pub fn new(path: PathBuf, pace: Duration) -> Self {
        Self { path, pace }
    }
}

#[async_trait]
impl BarFeed for ReplayBarFeed {
    async fn run(&self, tx: mpsc::Sender<Vec<MarketDataBar>>, cancel: CancellationToken) -> anyhow::Result<()> {
        let file = tokio::fs::File::open(&self.path).await?;
        let mut lines = BufReader::new(file).lines();

        let mut pending: Vec<MarketDataBar> = Vec::new();
        while let Some(line) = lines.next_line().await? {
            if cancel.is_cancelled() {
                return Ok(());
            }
            if line.trim().is_empty() {
                continue;
            }
            let record: ReplayRecord = serde_json::from_str(&line)?;
            let bar: MarketDataBar = record.into();

            if let Some(first) = pending.first() {
                if first.timestamp != bar.timestamp {
                    tokio::select! {
                        _ = cancel.cancelled() => return Ok(()),
                        _ = tokio::time::sleep(self.pace) => {}
                    }
                    if tx.send(std::mem::take(&mut pending)).await.is_err() {
                        return Ok(());
                    }
                }
            }
            pending.push(bar);
        }

        if !pending.is_empty() && tx.send(pending).await.is_err() {
            return Ok(());
        }
        Ok(())
    }
}
