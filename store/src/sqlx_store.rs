//! `sqlx`-backed `Store` — generalizes the teacher's
//! `session::store::sqlite_store::SQLiteSessionStore` upsert pattern across
//! the whole data model in spec §3, over `sqlx::AnyPool` so the same code
//! runs against `sqlite://` (local/dev) or `postgres://` (production) URLs,
//! matching the teacher's own `sqlx::any::install_default_drivers()` call
//! in `backend::main`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::any::AnyPoolOptions;
use sqlx::{AnyPool, Row};
use std::str::FromStr;

use crate::model::{
    ConnectionQuality, ExchangeId, ExchangeWorker, MarketDataBar, Session, SessionId,
    SessionStatus, WorkflowExecutionRecord, WorkflowTaskRecord, WsConnectionRecord,
};
use crate::traits::{BarStore, ExchangeStore, SessionStore, WorkflowStore};

pub struct SqlxStore {
    pool: AnyPool,
}

impl SqlxStore {
    /// Connect and create schema if missing. `min`/`max` map to
    /// `DB_MIN_CONNECTIONS`/`DB_MAX_CONNECTIONS` (spec §6), bounded-wait
    /// acquisition per spec §5 "Shared-resource policy".
    pub async fn connect(database_url: &str, min: u32, max: u32) -> anyhow::Result<Self> {
        sqlx::any::install_default_drivers();

        let pool = AnyPoolOptions::new()
            .min_connections(min)
            .max_connections(max)
            .acquire_timeout(std::time::Duration::from_secs(5))
            .connect(database_url)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS exchanges (
                exch_id TEXT PRIMARY KEY,
                exchange_type TEXT NOT NULL,
                timezone TEXT NOT NULL,
                pre_open_time TEXT NOT NULL,
                post_close_time TEXT NOT NULL
            );
        "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sessions (
                session_id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                device_id TEXT NOT NULL,
                created_at TEXT NOT NULL,
                last_active TEXT NOT NULL,
                expires_at TEXT NOT NULL,
                status TEXT NOT NULL,
                connection_quality TEXT NOT NULL,
                reconnect_count INTEGER NOT NULL,
                heartbeat_latency_ms INTEGER,
                missed_heartbeats INTEGER NOT NULL,
                simulator_id TEXT,
                simulator_endpoint TEXT
            );
        "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS ws_connections (
                session_id TEXT NOT NULL,
                device_id TEXT NOT NULL,
                client_id TEXT NOT NULL,
                connected_at TEXT NOT NULL,
                last_activity TEXT NOT NULL,
                PRIMARY KEY (session_id, device_id)
            );
        "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS market_data_bars (
                exch_id TEXT NOT NULL,
                symbol TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                open TEXT NOT NULL,
                high TEXT NOT NULL,
                low TEXT NOT NULL,
                close TEXT NOT NULL,
                vwap TEXT NOT NULL,
                vwas TEXT NOT NULL,
                vwav TEXT NOT NULL,
                volume INTEGER NOT NULL,
                trade_count INTEGER NOT NULL,
                currency TEXT NOT NULL,
                PRIMARY KEY (exch_id, symbol)
            );
        "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS workflow_executions (
                execution_id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                started_at TEXT NOT NULL,
                completed_at TEXT,
                total_tasks INTEGER NOT NULL,
                completed_tasks INTEGER NOT NULL,
                failed_tasks INTEGER NOT NULL,
                status TEXT NOT NULL
            );
        "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS workflow_tasks (
                execution_id TEXT NOT NULL,
                task_id TEXT NOT NULL,
                state TEXT NOT NULL,
                attempt INTEGER NOT NULL,
                started_at TEXT,
                finished_at TEXT,
                error TEXT
            );
        "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn parse_ts(s: &str) -> anyhow::Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(s)?.with_timezone(&Utc))
}

#[async_trait]
impl ExchangeStore for SqlxStore {
    async fn list_exchanges(&self) -> anyhow::Result<Vec<ExchangeWorker>> {
        let rows = sqlx::query("SELECT * FROM exchanges")
            .fetch_all(&self.pool)
            .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let tz_str: String = row.get("timezone");
            out.push(ExchangeWorker {
                exch_id: row.get("exch_id"),
                exchange_type: row.get("exchange_type"),
                timezone: tz_str.parse().map_err(|_| anyhow::anyhow!("bad tz"))?,
                pre_open_time: chrono::NaiveTime::parse_from_str(
                    row.get::<String, _>("pre_open_time").as_str(),
                    "%H:%M:%S",
                )?,
                post_close_time: chrono::NaiveTime::parse_from_str(
                    row.get::<String, _>("post_close_time").as_str(),
                    "%H:%M:%S",
                )?,
            });
        }
        Ok(out)
    }

    async fn get_exchange(&self, exch_id: &str) -> anyhow::Result<Option<ExchangeWorker>> {
        Ok(self
            .list_exchanges()
            .await?
            .into_iter()
            .find(|e| e.exch_id == exch_id))
    }

    async fn put_exchange(&self, exchange: ExchangeWorker) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO exchanges (exch_id, exchange_type, timezone, pre_open_time, post_close_time)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(exch_id) DO UPDATE SET
                exchange_type = excluded.exchange_type,
                timezone = excluded.timezone,
                pre_open_time = excluded.pre_open_time,
                post_close_time = excluded.post_close_time;
        "#,
        )
        .bind(exchange.exch_id)
        .bind(exchange.exchange_type)
        .bind(exchange.timezone.name().to_string())
        .bind(exchange.pre_open_time.format("%H:%M:%S").to_string())
        .bind(exchange.post_close_time.format("%H:%M:%S").to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_exchange(&self, exch_id: &str) -> anyhow::Result<()> {
        sqlx::query("DELETE FROM exchanges WHERE exch_id = ?")
            .bind(exch_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl SessionStore for SqlxStore {
    async fn load_all_sessions(&self) -> anyhow::Result<Vec<Session>> {
        let rows = sqlx::query("SELECT * FROM sessions")
            .fetch_all(&self.pool)
            .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let session_id: String = row.get("session_id");
            let status: String = row.get("status");
            let quality: String = row.get("connection_quality");

            out.push(Session {
                session_id: SessionId::parse_str(&session_id)?,
                user_id: row.get("user_id"),
                device_id: row.get("device_id"),
                created_at: parse_ts(&row.get::<String, _>("created_at"))?,
                last_active: parse_ts(&row.get::<String, _>("last_active"))?,
                expires_at: parse_ts(&row.get::<String, _>("expires_at"))?,
                status: SessionStatus::from_str(&status)?,
                connection_quality: ConnectionQuality::from_str(&quality)?,
                reconnect_count: row.get::<i64, _>("reconnect_count") as u32,
                heartbeat_latency_ms: row
                    .get::<Option<i64>, _>("heartbeat_latency_ms")
                    .map(|v| v as u64),
                missed_heartbeats: row.get::<i64, _>("missed_heartbeats") as u32,
                simulator_id: row.get("simulator_id"),
                simulator_endpoint: row.get("simulator_endpoint"),
            });
        }
        Ok(out)
    }

    async fn save_session(&self, session: &Session) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sessions (
                session_id, user_id, device_id, created_at, last_active, expires_at,
                status, connection_quality, reconnect_count, heartbeat_latency_ms,
                missed_heartbeats, simulator_id, simulator_endpoint
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(session_id) DO UPDATE SET
                user_id = excluded.user_id,
                device_id = excluded.device_id,
                last_active = excluded.last_active,
                expires_at = excluded.expires_at,
                status = excluded.status,
                connection_quality = excluded.connection_quality,
                reconnect_count = excluded.reconnect_count,
                heartbeat_latency_ms = excluded.heartbeat_latency_ms,
                missed_heartbeats = excluded.missed_heartbeats,
                simulator_id = excluded.simulator_id,
                simulator_endpoint = excluded.simulator_endpoint;
        "#,
        )
        .bind(session.session_id.to_string())
        .bind(&session.user_id)
        .bind(&session.device_id)
        .bind(session.created_at.to_rfc3339())
        .bind(session.last_active.to_rfc3339())
        .bind(session.expires_at.to_rfc3339())
        .bind(session.status.to_string())
        .bind(session.connection_quality.to_string())
        .bind(session.reconnect_count as i64)
        .bind(session.heartbeat_latency_ms.map(|v| v as i64))
        .bind(session.missed_heartbeats as i64)
        .bind(&session.simulator_id)
        .bind(&session.simulator_endpoint)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_session(&self, session_id: SessionId) -> anyhow::Result<()> {
        sqlx::query("DELETE FROM sessions WHERE session_id = ?")
            .bind(session_id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn save_ws_connection(&self, conn: &WsConnectionRecord) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO ws_connections (session_id, device_id, client_id, connected_at, last_activity)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(session_id, device_id) DO UPDATE SET
                client_id = excluded.client_id,
                last_activity = excluded.last_activity;
        "#,
        )
        .bind(conn.session_id.to_string())
        .bind(&conn.device_id)
        .bind(&conn.client_id)
        .bind(conn.connected_at.to_rfc3339())
        .bind(conn.last_activity.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_ws_connection(
        &self,
        session_id: SessionId,
        device_id: &str,
    ) -> anyhow::Result<()> {
        sqlx::query("DELETE FROM ws_connections WHERE session_id = ? AND device_id = ?")
            .bind(session_id.to_string())
            .bind(device_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl BarStore for SqlxStore {
    async fn upsert_bars(&self, exch_id: &ExchangeId, bars: &[MarketDataBar]) -> anyhow::Result<()> {
        for bar in bars {
            sqlx::query(
                r#"
                INSERT INTO market_data_bars (
                    exch_id, symbol, timestamp, open, high, low, close, vwap, vwas, vwav,
                    volume, trade_count, currency
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(exch_id, symbol) DO UPDATE SET
                    timestamp = excluded.timestamp,
                    open = excluded.open,
                    high = excluded.high,
                    low = excluded.low,
                    close = excluded.close,
                    vwap = excluded.vwap,
                    vwas = excluded.vwas,
                    vwav = excluded.vwav,
                    volume = excluded.volume,
                    trade_count = excluded.trade_count,
                    currency = excluded.currency;
            "#,
            )
            .bind(exch_id.as_str())
            .bind(&bar.symbol)
            .bind(bar.timestamp.to_rfc3339())
            .bind(bar.open.to_string())
            .bind(bar.high.to_string())
            .bind(bar.low.to_string())
            .bind(bar.close.to_string())
            .bind(bar.vwap.to_string())
            .bind(bar.vwas.to_string())
            .bind(bar.vwav.to_string())
            .bind(bar.volume)
            .bind(bar.trade_count)
            .bind(&bar.currency)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    async fn latest_bar(
        &self,
        exch_id: &ExchangeId,
        symbol: &str,
    ) -> anyhow::Result<Option<MarketDataBar>> {
        let row = sqlx::query(
            "SELECT * FROM market_data_bars WHERE exch_id = ? AND symbol = ?",
        )
        .bind(exch_id.as_str())
        .bind(symbol)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else { return Ok(None) };

        Ok(Some(MarketDataBar {
            timestamp: parse_ts(&row.get::<String, _>("timestamp"))?,
            symbol: row.get("symbol"),
            open: Decimal::from_str(&row.get::<String, _>("open"))?,
            high: Decimal::from_str(&row.get::<String, _>("high"))?,
            low: Decimal::from_str(&row.get::<String, _>("low"))?,
            close: Decimal::from_str(&row.get::<String, _>("close"))?,
            vwap: Decimal::from_str(&row.get::<String, _>("vwap"))?,
            vwas: Decimal::from_str(&row.get::<String, _>("vwas"))?,
            vwav: Decimal::from_str(&row.get::<String, _>("vwav"))?,
            volume: row.get("volume"),
            trade_count: row.get("trade_count"),
            currency: row.get("currency"),
        }))
    }
}

#[async_trait]
impl WorkflowStore for SqlxStore {
    async fn create_execution(&self, record: &WorkflowExecutionRecord) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO workflow_executions (
                execution_id, name, started_at, completed_at, total_tasks,
                completed_tasks, failed_tasks, status
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?);
        "#,
        )
        .bind(record.execution_id.to_string())
        .bind(&record.name)
        .bind(record.started_at.to_rfc3339())
        .bind(record.completed_at.map(|v| v.to_rfc3339()))
        .bind(record.total_tasks as i64)
        .bind(record.completed_tasks as i64)
        .bind(record.failed_tasks as i64)
        .bind(record.status.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_execution(&self, record: &WorkflowExecutionRecord) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            UPDATE workflow_executions SET
                completed_at = ?, total_tasks = ?, completed_tasks = ?, failed_tasks = ?, status = ?
            WHERE execution_id = ?;
        "#,
        )
        .bind(record.completed_at.map(|v| v.to_rfc3339()))
        .bind(record.total_tasks as i64)
        .bind(record.completed_tasks as i64)
        .bind(record.failed_tasks as i64)
        .bind(record.status.to_string())
        .bind(record.execution_id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn record_task_transition(&self, record: &WorkflowTaskRecord) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO workflow_tasks (execution_id, task_id, state, attempt, started_at, finished_at, error)
            VALUES (?, ?, ?, ?, ?, ?, ?);
        "#,
        )
        .bind(record.execution_id.to_string())
        .bind(&record.task_id)
        .bind(record.state.to_string())
        .bind(record.attempt as i64)
        .bind(record.started_at.map(|v| v.to_rfc3339()))
        .bind(record.finished_at.map(|v| v.to_rfc3339()))
        .bind(&record.error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
