//! Drives `SessionSingleton` against a real (in-memory) SQLite-backed
//! `SqlxStore` instead of the in-memory `HashMap` store, the way
//! `session::tests::session_manager_integration` exercises the teacher's
//! `SessionManager` against a real SQLite file and asserts on what
//! actually lands in the database.

use std::sync::Arc;
use std::time::Duration;

use common::clock::SystemClock;
use session::auth::InMemoryAuthVerifier;
use session::instance::ReadinessFiles;
use session::messages::ServerMessage;
use session::{SessionSingleton, SessionSingletonConfig};
use store::traits::SessionStore;
use store::SqlxStore;
use uuid::Uuid;

async fn connect_store() -> Arc<SqlxStore> {
    let db_name = Uuid::new_v4().to_string();
    let url = format!("sqlite:file:{db_name}?mode=memory&cache=shared");
    Arc::new(SqlxStore::connect(&url, 1, 1).await.unwrap())
}

fn singleton(store: Arc<SqlxStore>) -> Arc<SessionSingleton> {
    SessionSingleton::new(
        SessionSingletonConfig {
            session_timeout: Duration::from_secs(3600),
            session_extension_threshold: Duration::from_secs(1800),
            drain_timeout: Duration::from_millis(50),
            exch_id: "nyse".into(),
            reconnect_base_backoff: Duration::from_millis(10),
            reconnect_max_backoff: Duration::from_millis(50),
        },
        store,
        Arc::new(InMemoryAuthVerifier::new("test-secret")),
        Arc::new(SystemClock),
        ReadinessFiles::new(None, None),
    )
}

#[tokio::test]
async fn connect_persists_session_row_in_sqlite() {
    let store = connect_store().await;
    let auth = InMemoryAuthVerifier::new("test-secret");
    let singleton = singleton(store.clone());

    let token = auth.sign("alice", i64::MAX);
    let (tx, _rx) = tokio::sync::mpsc::channel::<ServerMessage>(8);
    let outcome = singleton
        .connect(&token, "device-1".into(), "client-1".into(), tx)
        .await
        .unwrap();
    assert!(outcome.is_new_session);

    let rows = store.load_all_sessions().await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].session_id, outcome.session.session_id);
    assert_eq!(rows[0].user_id, "alice");
}

#[tokio::test]
async fn drain_deletes_persisted_session_row() {
    let store = connect_store().await;
    let auth = InMemoryAuthVerifier::new("test-secret");
    let singleton = singleton(store.clone());

    let token = auth.sign("alice", i64::MAX);
    let (tx, _rx) = tokio::sync::mpsc::channel::<ServerMessage>(8);
    singleton
        .connect(&token, "device-1".into(), "client-1".into(), tx)
        .await
        .unwrap();
    assert_eq!(store.load_all_sessions().await.unwrap().len(), 1);

    singleton.drain("test shutdown".into()).await;

    assert!(store.load_all_sessions().await.unwrap().is_empty());
}
