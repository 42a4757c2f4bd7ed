//! The `Store` abstraction — spec §3/§6. Core code only ever depends on
//! these traits; the backing implementation (in-memory or sqlx) is
//! swappable per `ENVIRONMENT` (spec §6 env vars).

use async_trait::async_trait;

use crate::model::{
    ExchangeId, ExchangeWorker, MarketDataBar, Session, SessionId, WorkflowExecutionRecord,
    WorkflowTaskRecord, WsConnectionRecord,
};

#[async_trait]
pub trait ExchangeStore: Send + Sync {
    async fn list_exchanges(&self) -> anyhow::Result<Vec<ExchangeWorker>>;
    async fn get_exchange(&self, exch_id: &str) -> anyhow::Result<Option<ExchangeWorker>>;
    async fn put_exchange(&self, exchange: ExchangeWorker) -> anyhow::Result<()>;
    async fn delete_exchange(&self, exch_id: &str) -> anyhow::Result<()>;
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn load_all_sessions(&self) -> anyhow::Result<Vec<Session>>;
    async fn save_session(&self, session: &Session) -> anyhow::Result<()>;
    async fn delete_session(&self, session_id: SessionId) -> anyhow::Result<()>;
    async fn save_ws_connection(&self, conn: &WsConnectionRecord) -> anyhow::Result<()>;
    async fn delete_ws_connection(&self, session_id: SessionId, device_id: &str)
    -> anyhow::Result<()>;
}

#[async_trait]
pub trait BarStore: Send + Sync {
    /// Upsert on `(timestamp, symbol)` — idempotent (spec §3 invariant).
    async fn upsert_bars(&self, exch_id: &ExchangeId, bars: &[MarketDataBar]) -> anyhow::Result<()>;
    async fn latest_bar(
        &self,
        exch_id: &ExchangeId,
        symbol: &str,
    ) -> anyhow::Result<Option<MarketDataBar>>;
}

#[async_trait]
pub trait WorkflowStore: Send + Sync {
    async fn create_execution(&self, record: &WorkflowExecutionRecord) -> anyhow::Result<()>;
    async fn update_execution(&self, record: &WorkflowExecutionRecord) -> anyhow::Result<()>;
    async fn record_task_transition(&self, record: &WorkflowTaskRecord) -> anyhow::Result<()>;
}

/// Composed supertrait used by every component constructor — generalizes
/// the teacher's single-purpose `session::store::SessionStore` trait to the
/// whole data model in spec §3.
pub trait Store: ExchangeStore + SessionStore + BarStore + WorkflowStore {}

impl<T: ExchangeStore + SessionStore + BarStore + WorkflowStore> Store for T {}
