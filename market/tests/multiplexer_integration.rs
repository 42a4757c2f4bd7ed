//! Drives `BarMultiplexer` end-to-end with a real `SimulatedBarFeed` and a
//! real `InMemoryStore`, the way `market::tests::market_manager_tests`
//! drives `MarketManager` against a (mocked) upstream client and asserts on
//! what subscribers actually observe.

use std::sync::Arc;
use std::time::Duration;

use common::clock::SystemClock;
use market::{BarMultiplexer, MultiplexerConfig, MultiplexerMetrics, SimulatedBarFeed};
use store::traits::BarStore;
use store::InMemoryStore;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn subscriber_receives_broadcasts_and_bars_persist() {
    let store = InMemoryStore::new();
    let metrics = MultiplexerMetrics::register(&prometheus::Registry::new()).unwrap();
    let mux = BarMultiplexer::new(
        "nyse".to_string(),
        MultiplexerConfig {
            send_deadline: Duration::from_millis(200),
            subscriber_channel_capacity: 16,
            base_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(50),
        },
        store.clone(),
        metrics,
    );

    let mut rx = mux.subscribe("sub-1".to_string(), None).await;

    let feed = Arc::new(SimulatedBarFeed::new(
        vec!["AAPL".to_string(), "MSFT".to_string()],
        Duration::from_millis(20),
        Arc::new(SystemClock),
    ));
    let cancel = CancellationToken::new();
    let run_cancel = cancel.clone();
    let run_mux = mux.clone();
    let runner = tokio::spawn(async move { run_mux.run_upstream(feed, run_cancel).await });

    let envelope = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("broadcast within deadline")
        .expect("channel still open");
    assert_eq!(envelope.data.len(), 2);

    cancel.cancel();
    let _ = tokio::time::timeout(Duration::from_secs(1), runner).await;

    let latest = store.latest_bar(&"nyse".to_string(), "AAPL").await.unwrap();
    assert!(latest.is_some(), "broadcast batch must have been persisted");
}

#[tokio::test]
async fn subscribe_after_broadcast_gets_snapshot_immediately() {
    let store = InMemoryStore::new();
    let metrics = MultiplexerMetrics::register(&prometheus::Registry::new()).unwrap();
    let mux = BarMultiplexer::new(
        "nyse".to_string(),
        MultiplexerConfig {
            send_deadline: Duration::from_millis(200),
            subscriber_channel_capacity: 16,
            base_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(50),
        },
        store,
        metrics,
    );

    let bar = crate_test_bar("AAPL");
    mux.on_upstream_bar(vec![bar]).await;

    let mut rx = mux.subscribe("late-sub".to_string(), None).await;
    let envelope = rx.try_recv().expect("snapshot sent synchronously on subscribe");
    assert_eq!(envelope.data[0].symbol, "AAPL");
}

fn crate_test_bar(symbol: &str) -> store::model::MarketDataBar {
    use chrono::Utc;
    use rust_decimal::Decimal;

    store::model::MarketDataBar {
        timestamp: Utc::now(),
        symbol: symbol.to_string(),
        open: Decimal::ONE_HUNDRED,
        high: Decimal::ONE_HUNDRED,
        low: Decimal::ONE_HUNDRED,
        close: Decimal::ONE_HUNDRED,
        vwap: Decimal::ONE_HUNDRED,
        vwas: Decimal::new(5, 1),
        vwav: Decimal::new(1000, 0),
        volume: 100,
        trade_count: 1,
        currency: "USD".into(),
    }
}
