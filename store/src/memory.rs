//! In-memory `Store` backend — used for `ENVIRONMENT=development` and by
//! every unit/integration test in the workspace. Shape grounded on the
//! teacher's `SessionManager`'s own `Arc<Mutex<HashMap<...>>>` indices.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::model::{
    ExchangeId, ExchangeWorker, MarketDataBar, Session, SessionId, WorkflowExecutionRecord,
    WorkflowTaskRecord, WsConnectionRecord,
};
use crate::traits::{BarStore, ExchangeStore, SessionStore, WorkflowStore};

#[derive(Default)]
pub struct InMemoryStore {
    exchanges: Mutex<HashMap<ExchangeId, ExchangeWorker>>,
    sessions: Mutex<HashMap<SessionId, Session>>,
    ws_connections: Mutex<HashMap<(SessionId, String), WsConnectionRecord>>,
    bars: Mutex<HashMap<(ExchangeId, String), MarketDataBar>>,
    executions: Mutex<HashMap<uuid::Uuid, WorkflowExecutionRecord>>,
    task_transitions: Mutex<Vec<WorkflowTaskRecord>>,
}

impl InMemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl ExchangeStore for InMemoryStore {
    async fn list_exchanges(&self) -> anyhow::Result<Vec<ExchangeWorker>> {
        Ok(self.exchanges.lock().await.values().cloned().collect())
    }

    async fn get_exchange(&self, exch_id: &str) -> anyhow::Result<Option<ExchangeWorker>> {
        Ok(self.exchanges.lock().await.get(exch_id).cloned())
    }

    async fn put_exchange(&self, exchange: ExchangeWorker) -> anyhow::Result<()> {
        self.exchanges
            .lock()
            .await
            .insert(exchange.exch_id.clone(), exchange);
        Ok(())
    }

    async fn delete_exchange(&self, exch_id: &str) -> anyhow::Result<()> {
        self.exchanges.lock().await.remove(exch_id);
        Ok(())
    }
}

#[async_trait]
impl SessionStore for InMemoryStore {
    async fn load_all_sessions(&self) -> anyhow::Result<Vec<Session>> {
        Ok(self.sessions.lock().await.values().cloned().collect())
    }

    async fn save_session(&self, session: &Session) -> anyhow::Result<()> {
        self.sessions
            .lock()
            .await
            .insert(session.session_id, session.clone());
        Ok(())
    }

    async fn delete_session(&self, session_id: SessionId) -> anyhow::Result<()> {
        self.sessions.lock().await.remove(&session_id);
        Ok(())
    }

    async fn save_ws_connection(&self, conn: &WsConnectionRecord) -> anyhow::Result<()> {
        self.ws_connections
            .lock()
            .await
            .insert((conn.session_id, conn.device_id.clone()), conn.clone());
        Ok(())
    }

    async fn delete_ws_connection(
        &self,
        session_id: SessionId,
        device_id: &str,
    ) -> anyhow::Result<()> {
        self.ws_connections
            .lock()
            .await
            .remove(&(session_id, device_id.to_string()));
        Ok(())
    }
}

#[async_trait]
impl BarStore for InMemoryStore {
    async fn upsert_bars(&self, exch_id: &ExchangeId, bars: &[MarketDataBar]) -> anyhow::Result<()> {
        let mut guard = self.bars.lock().await;
        for bar in bars {
            guard.insert((exch_id.clone(), bar.symbol.clone()), bar.clone());
        }
        Ok(())
    }

    async fn latest_bar(
        &self,
        exch_id: &ExchangeId,
        symbol: &str,
    ) -> anyhow::Result<Option<MarketDataBar>> {
        Ok(self
            .bars
            .lock()
            .await
            .get(&(exch_id.clone(), symbol.to_string()))
            .cloned())
    }
}

#[async_trait]
impl WorkflowStore for InMemoryStore {
    async fn create_execution(&self, record: &WorkflowExecutionRecord) -> anyhow::Result<()> {
        self.executions
            .lock()
            .await
            .insert(record.execution_id, record.clone());
        Ok(())
    }

    async fn update_execution(&self, record: &WorkflowExecutionRecord) -> anyhow::Result<()> {
        self.executions
            .lock()
            .await
            .insert(record.execution_id, record.clone());
        Ok(())
    }

    async fn record_task_transition(&self, record: &WorkflowTaskRecord) -> anyhow::Result<()> {
        self.task_transitions.lock().await.push(record.clone());
        Ok(())
    }
}
