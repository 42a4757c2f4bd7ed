//! `BarMultiplexer` — spec §4.3 (C3). Owns the single upstream bar-feed
//! subscription, persists every batch, and fans it out to N downstream
//! subscribers with per-subscriber backpressure and dead-subscriber
//! eviction.
//!
//! Retains the teacher's `MarketManager`'s `Arc<Mutex<HashMap<...>>>`
//! subscriber-table shape (`market::manager::MarketManager::subscribers`),
//! generalized from RFQ-quote fan-out to bar fan-out, and adds what the
//! teacher's fire-and-forget `ch.send(...).await` lacks: a bounded
//! per-send deadline and eviction of subscribers that fail it.

use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use prometheus::{IntCounter, IntGauge, Registry};
use store::model::{floor_to_minute, ExchangeId, MarketDataBar};
use store::traits::BarStore;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::feed::BarFeed;
use crate::types::{BarEnvelope, SubscriberId, Subscription};

#[derive(Debug, Clone)]
pub struct MultiplexerConfig {
    /// Per-subscriber send deadline (spec §4.3 "Backpressure & liveness").
    pub send_deadline: Duration,
    pub subscriber_channel_capacity: usize,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for MultiplexerConfig {
    fn default() -> Self {
        Self {
            send_deadline: Duration::from_millis(200),
            subscriber_channel_capacity: 64,
            base_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
        }
    }
}

pub struct MultiplexerMetrics {
    pub updates_sent: IntCounter,
    pub batch_count: IntCounter,
    pub subscribers_count: IntGauge,
    pub persistence_errors: IntCounter,
    pub evictions: IntCounter,
}

impl MultiplexerMetrics {
    pub fn register(registry: &Registry) -> anyhow::Result<Self> {
        let updates_sent = IntCounter::new("market_updates_sent_total", "bar updates sent to subscribers")?;
        let batch_count = IntCounter::new("market_batch_count_total", "upstream batches processed")?;
        let subscribers_count = IntGauge::new("market_subscribers_count", "currently registered subscribers")?;
        let persistence_errors = IntCounter::new("market_persistence_errors_total", "bar upsert failures")?;
        let evictions = IntCounter::new("market_subscriber_evictions_total", "subscribers evicted for slow/dead sends")?;

        registry.register(Box::new(updates_sent.clone()))?;
        registry.register(Box::new(batch_count.clone()))?;
        registry.register(Box::new(subscribers_count.clone()))?;
        registry.register(Box::new(persistence_errors.clone()))?;
        registry.register(Box::new(evictions.clone()))?;

        Ok(Self {
            updates_sent,
            batch_count,
            subscribers_count,
            persistence_errors,
            evictions,
        })
    }
}

pub struct BarMultiplexer {
    exch_id: ExchangeId,
    cfg: MultiplexerConfig,
    store: Arc<dyn BarStore>,
    metrics: MultiplexerMetrics,
    subscribers: Mutex<HashMap<SubscriberId, Subscription>>,
    last_bar: Mutex<HashMap<String, MarketDataBar>>,
}

impl BarMultiplexer {
    pub fn new(
        exch_id: ExchangeId,
        cfg: MultiplexerConfig,
        store: Arc<dyn BarStore>,
        metrics: MultiplexerMetrics,
    ) -> Arc<Self> {
        Arc::new(Self {
            exch_id,
            cfg,
            store,
            metrics,
            subscribers: Mutex::new(HashMap::new()),
            last_bar: Mutex::new(HashMap::new()),
        })
    }

    /// Registers a subscriber and immediately sends a current snapshot
    /// filtered by `symbols` (spec §4.3 "Snapshot on subscribe", invariant
    /// #4). `symbols = None` means all symbols.
    pub async fn subscribe(
        self: &Arc<Self>,
        subscriber_id: SubscriberId,
        symbols: Option<HashSet<String>>,
    ) -> mpsc::Receiver<BarEnvelope> {
        let (tx, rx) = mpsc::channel(self.cfg.subscriber_channel_capacity);

        let snapshot = {
            let last_bar = self.last_bar.lock().await;
            let data: Vec<MarketDataBar> = match &symbols {
                Some(wanted) => last_bar
                    .values()
                    .filter(|bar| wanted.contains(&bar.symbol))
                    .cloned()
                    .collect(),
                None => last_bar.values().cloned().collect(),
            };
            data
        };

        if !snapshot.is_empty() {
            let envelope = BarEnvelope {
                timestamp: snapshot.iter().map(|b| b.timestamp).max().expect("non-empty"),
                data: snapshot,
            };
            // Best-effort: a fresh channel with spare capacity; if this
            // somehow fails the subscriber simply waits for the next broadcast.
            let _ = tx.try_send(envelope);
        }

        self.subscribers.lock().await.insert(
            subscriber_id.clone(),
            Subscription {
                subscriber_id,
                symbols,
                tx,
                last_successful_send: None,
            },
        );
        self.metrics.subscribers_count.set(self.subscribers.lock().await.len() as i64);

        rx
    }

    /// Idempotent (spec §4.3 "Public contract").
    pub async fn unsubscribe(&self, subscriber_id: &str) {
        self.subscribers.lock().await.remove(subscriber_id);
        self.metrics.subscribers_count.set(self.subscribers.lock().await.len() as i64);
    }

    /// Upstream callback: persist and fan out one batch (spec §4.3
    /// "Broadcast algorithm").
    pub async fn on_upstream_bar(&self, batch: Vec<MarketDataBar>) {
        if batch.is_empty() {
            return;
        }

        let bars: Vec<MarketDataBar> = batch.into_iter().map(|b| b.floor_to_minute()).collect();
        self.metrics.batch_count.inc();

        if let Err(e) = self.store.upsert_bars(&self.exch_id, &bars).await {
            // Persistence failure must not abort broadcast (spec §4.3
            // "Failure semantics").
            self.metrics.persistence_errors.inc();
            tracing::error!(exch_id = %self.exch_id, error = %e, "failed to persist bar batch");
        }

        {
            let mut last_bar = self.last_bar.lock().await;
            for bar in &bars {
                last_bar.insert(bar.symbol.clone(), bar.clone());
            }
        }

        let timestamp = bars[0].timestamp;
        let envelope = BarEnvelope { timestamp, data: bars };

        let mut dead: Vec<SubscriberId> = Vec::new();
        {
            let subscribers = self.subscribers.lock().await;
            for sub in subscribers.values() {
                let filtered = envelope.filtered(sub.symbols.as_ref());
                if filtered.data.is_empty() {
                    continue;
                }
                match tokio::time::timeout(self.cfg.send_deadline, sub.tx.send(filtered)).await {
                    Ok(Ok(())) => {
                        self.metrics.updates_sent.inc();
                    }
                    Ok(Err(_)) | Err(_) => {
                        // Drop-newest on a full/slow/dead channel rather than
                        // blocking the broadcaster (spec §4.3 "Backpressure").
                        dead.push(sub.subscriber_id.clone());
                    }
                }
            }
        }

        if !dead.is_empty() {
            let mut subscribers = self.subscribers.lock().await;
            for id in &dead {
                subscribers.remove(id);
                self.metrics.evictions.inc();
                tracing::info!(subscriber_id = %id, "evicted dead/slow subscriber");
            }
            self.metrics.subscribers_count.set(subscribers.len() as i64);
        }
    }

    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.lock().await.len()
    }

    /// Drives the upstream feed with exponential-backoff reconnect (spec
    /// §4.3 "Failure semantics"). Broadcast is quiescent but subscribers
    /// remain registered while disconnected.
    pub async fn run_upstream(
        self: Arc<Self>,
        feed: Arc<dyn BarFeed>,
        cancel: CancellationToken,
    ) {
        let mut backoff = self.cfg.base_backoff;

        loop {
            if cancel.is_cancelled() {
                return;
            }

            let (tx, mut rx) = mpsc::channel::<Vec<MarketDataBar>>(256);
            let feed_clone = feed.clone();
            let cancel_clone = cancel.clone();
            let feed_task = tokio::spawn(async move { feed_clone.run(tx, cancel_clone).await });

            while let Some(batch) = rx.recv().await {
                self.on_upstream_bar(batch).await;
            }

            match feed_task.await {
                Ok(Ok(())) => {
                    if cancel.is_cancelled() {
                        return;
                    }
                    backoff = self.cfg.base_backoff;
                }
                Ok(Err(e)) => {
                    tracing::warn!(exch_id = %self.exch_id, error = %e, "upstream bar feed failed, reconnecting");
                }
                Err(join_err) => {
                    tracing::error!(exch_id = %self.exch_id, error = %join_err, "upstream bar feed task panicked");
                }
            }

            if cancel.is_cancelled() {
                return;
            }
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(backoff) => {}
            }
            backoff = (backoff * 2).min(self.cfg.max_backoff);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use prometheus::Registry;
    use rust_decimal::Decimal;
    use store::memory::InMemoryStore;

    fn bar(symbol: &str, ts: chrono::DateTime<Utc>) -> MarketDataBar {
        MarketDataBar {
            timestamp: ts,
            symbol: symbol.to_string(),
            open: Decimal::ONE,
            high: Decimal::ONE,
            low: Decimal::ONE,
            close: Decimal::ONE,
            vwap: Decimal::ONE,
            vwas: Decimal::ONE,
            vwav: Decimal::ONE,
            volume: 1,
            trade_count: 1,
            currency: "USD".to_string(),
        }
    }

    fn multiplexer() -> Arc<BarMultiplexer> {
        let registry = Registry::new();
        BarMultiplexer::new(
            "e1".to_string(),
            MultiplexerConfig::default(),
            InMemoryStore::new(),
            MultiplexerMetrics::register(&registry).unwrap(),
        )
    }

    #[tokio::test]
    async fn bar_timestamps_are_floored_before_broadcast() {
        let mux = multiplexer();
        let mut rx = mux.subscribe("s1".to_string(), None).await;

        let ts = chrono::DateTime::parse_from_rfc3339("2025-11-03T09:00:45.500Z")
            .unwrap()
            .with_timezone(&Utc);
        mux.on_upstream_bar(vec![bar("AAPL", ts)]).await;

        let received = rx.recv().await.unwrap();
        assert_eq!(received.data[0].timestamp.timestamp_subsec_nanos(), 0);
        use chrono::Timelike;
        assert_eq!(received.data[0].timestamp.second(), 0);
    }

    #[tokio::test]
    async fn s4_subscribe_snapshot_is_filtered_by_symbols() {
        let mux = multiplexer();
        let ts = Utc::now();
        mux.on_upstream_bar(vec![bar("AAPL", ts), bar("MSFT", ts)]).await;

        let mut wanted = HashSet::new();
        wanted.insert("AAPL".to_string());
        let mut rx = mux.subscribe("s1".to_string(), Some(wanted)).await;

        let snapshot = rx.recv().await.unwrap();
        assert_eq!(snapshot.data.len(), 1);
        assert_eq!(snapshot.data[0].symbol, "AAPL");
    }

    #[tokio::test]
    async fn s3_dead_subscriber_is_evicted_within_one_broadcast_cycle() {
        let mux = multiplexer();
        let mut rx_a = mux.subscribe("a".to_string(), None).await;
        let rx_b = mux.subscribe("b".to_string(), None).await;
        let mut rx_c = mux.subscribe("c".to_string(), None).await;

        drop(rx_b); // B's stream is closed externally.

        mux.on_upstream_bar(vec![bar("AAPL", Utc::now())]).await;

        assert!(rx_a.recv().await.is_some());
        assert!(rx_c.recv().await.is_some());
        assert_eq!(mux.subscriber_count().await, 2);
    }

    #[tokio::test]
    async fn broadcast_proceeds_with_zero_subscribers() {
        let mux = multiplexer();
        mux.on_upstream_bar(vec![bar("AAPL", Utc::now())]).await;
        assert_eq!(mux.subscriber_count().await, 0);
    }

    #[tokio::test]
    async fn unsubscribe_is_idempotent() {
        let mux = multiplexer();
        let _rx = mux.subscribe("a".to_string(), None).await;
        mux.unsubscribe("a").await;
        mux.unsubscribe("a").await;
        assert_eq!(mux.subscriber_count().await, 0);
    }
}
