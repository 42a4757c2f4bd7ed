//! Integration tests against a real (in-memory) SQLite database, exercising
//! the `sqlx::AnyPool` code path instead of the in-memory `HashMap` store.

use chrono::{Duration, NaiveTime, Utc};
use rust_decimal::Decimal;
use store::model::{
    ConnectionQuality, ExchangeWorker, ExecutionStatus, MarketDataBar, Session, SessionStatus,
    TaskState, WorkflowExecutionRecord, WorkflowTaskRecord, WsConnectionRecord,
};
use store::{BarStore, ExchangeStore, SessionStore, SqlxStore, WorkflowStore};
use uuid::Uuid;

/// A unique `sqlite:file:...?mode=memory&cache=shared` URL per test keeps
/// parallel `cargo test` runs from colliding on the same in-memory database.
async fn connect() -> SqlxStore {
    let db_name = Uuid::new_v4().to_string();
    let url = format!("sqlite:file:{db_name}?mode=memory&cache=shared");
    SqlxStore::connect(&url, 1, 1).await.unwrap()
}

fn sample_exchange(exch_id: &str) -> ExchangeWorker {
    ExchangeWorker {
        exch_id: exch_id.to_string(),
        exchange_type: "equities".into(),
        timezone: chrono_tz::America::New_York,
        pre_open_time: NaiveTime::from_hms_opt(4, 0, 0).unwrap(),
        post_close_time: NaiveTime::from_hms_opt(16, 0, 0).unwrap(),
    }
}

fn sample_session() -> Session {
    let now = Utc::now();
    Session {
        session_id: Uuid::new_v4(),
        user_id: "u1".into(),
        device_id: "d1".into(),
        created_at: now,
        last_active: now,
        expires_at: now + Duration::hours(1),
        status: SessionStatus::Active,
        connection_quality: ConnectionQuality::Good,
        reconnect_count: 0,
        heartbeat_latency_ms: Some(42),
        missed_heartbeats: 0,
        simulator_id: None,
        simulator_endpoint: None,
    }
}

#[tokio::test]
async fn exchange_round_trips_through_sqlite() {
    let store = connect().await;
    store.put_exchange(sample_exchange("nyse")).await.unwrap();

    let loaded = store.get_exchange("nyse").await.unwrap().unwrap();
    assert_eq!(loaded.exchange_type, "equities");

    let all = store.list_exchanges().await.unwrap();
    assert_eq!(all.len(), 1);

    store.delete_exchange("nyse").await.unwrap();
    assert!(store.get_exchange("nyse").await.unwrap().is_none());
}

#[tokio::test]
async fn put_exchange_upserts_on_conflict() {
    let store = connect().await;
    store.put_exchange(sample_exchange("nyse")).await.unwrap();

    let mut updated = sample_exchange("nyse");
    updated.exchange_type = "futures".into();
    store.put_exchange(updated).await.unwrap();

    let all = store.list_exchanges().await.unwrap();
    assert_eq!(all.len(), 1, "upsert must not duplicate the row");
    assert_eq!(all[0].exchange_type, "futures");
}

#[tokio::test]
async fn session_and_ws_connection_round_trip() {
    let store = connect().await;
    let session = sample_session();
    store.save_session(&session).await.unwrap();

    let loaded = store.load_all_sessions().await.unwrap();
    assert_eq!(loaded.len(), 1);
    assert_eq!(loaded[0].session_id, session.session_id);
    assert_eq!(loaded[0].status, SessionStatus::Active);

    let conn = WsConnectionRecord {
        session_id: session.session_id,
        device_id: session.device_id.clone(),
        client_id: "c1".into(),
        connected_at: session.created_at,
        last_activity: session.created_at,
    };
    store.save_ws_connection(&conn).await.unwrap();
    store
        .delete_ws_connection(session.session_id, &session.device_id)
        .await
        .unwrap();

    store.delete_session(session.session_id).await.unwrap();
    assert!(store.load_all_sessions().await.unwrap().is_empty());
}

#[tokio::test]
async fn bar_upsert_overwrites_same_symbol() {
    let store = connect().await;
    let exch_id = "nyse".to_string();
    let ts = Utc::now();

    let bar = MarketDataBar {
        timestamp: ts,
        symbol: "AAPL".into(),
        open: Decimal::new(100, 0),
        high: Decimal::new(101, 0),
        low: Decimal::new(99, 0),
        close: Decimal::new(100, 0),
        vwap: Decimal::new(100, 0),
        vwas: Decimal::new(100, 0),
        vwav: Decimal::new(100, 0),
        volume: 1_000,
        trade_count: 10,
        currency: "USD".into(),
    };
    store.upsert_bars(&exch_id, std::slice::from_ref(&bar)).await.unwrap();

    let mut next = bar.clone();
    next.close = Decimal::new(105, 0);
    next.volume = 2_000;
    store.upsert_bars(&exch_id, std::slice::from_ref(&next)).await.unwrap();

    let latest = store.latest_bar(&exch_id, "AAPL").await.unwrap().unwrap();
    assert_eq!(latest.close, Decimal::new(105, 0));
    assert_eq!(latest.volume, 2_000);
}

#[tokio::test]
async fn latest_bar_is_none_when_absent() {
    let store = connect().await;
    assert!(store.latest_bar(&"nyse".to_string(), "AAPL").await.unwrap().is_none());
}

#[tokio::test]
async fn workflow_execution_and_task_transitions_persist() {
    let store = connect().await;
    let execution_id = Uuid::new_v4();
    let started = Utc::now();

    let mut record = WorkflowExecutionRecord {
        execution_id,
        name: "sod".into(),
        started_at: started,
        completed_at: None,
        total_tasks: 2,
        completed_tasks: 0,
        failed_tasks: 0,
        status: ExecutionStatus::Running,
    };
    store.create_execution(&record).await.unwrap();

    store
        .record_task_transition(&WorkflowTaskRecord {
            execution_id,
            task_id: "check_market_data".into(),
            state: TaskState::Running,
            attempt: 1,
            started_at: Some(started),
            finished_at: None,
            error: None,
        })
        .await
        .unwrap();

    store
        .record_task_transition(&WorkflowTaskRecord {
            execution_id,
            task_id: "check_market_data".into(),
            state: TaskState::Success,
            attempt: 1,
            started_at: Some(started),
            finished_at: Some(started + Duration::seconds(1)),
            error: None,
        })
        .await
        .unwrap();

    record.completed_tasks = 2;
    record.status = ExecutionStatus::Success;
    record.completed_at = Some(started + Duration::seconds(2));
    store.update_execution(&record).await.unwrap();
}
