//! Tagged WS message types — spec §6 "Client <-> Session Singleton" and
//! Design Notes #2 ("Replace with a tagged-variant message type"). One
//! `match` on `ClientMessage` dispatches inbound frames instead of a
//! dict-of-callables; `ServerMessage` is the single outbound envelope type.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use store::model::SessionId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SimulatorStatus {
    Connected,
    Connecting,
    Disconnected,
    Error,
    Checking,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Heartbeat {
        timestamp: i64,
    },
    ConnectionQuality {
        #[serde(rename = "latencyMs")]
        latency_ms: u64,
        #[serde(rename = "missedHeartbeats")]
        missed_heartbeats: u32,
        #[serde(rename = "connectionType")]
        connection_type: String,
    },
    Subscribe {
        #[serde(rename = "dataType")]
        data_type: String,
        symbols: Vec<String>,
    },
    Unsubscribe {
        #[serde(rename = "dataType")]
        data_type: String,
    },
    Reconnect {
        #[serde(rename = "sessionId")]
        session_id: SessionId,
        token: String,
        #[serde(rename = "deviceId")]
        device_id: String,
        attempt: u32,
    },
    SessionInfo {
        #[serde(rename = "requestId")]
        request_id: Option<String>,
    },
    StopSession {
        #[serde(rename = "requestId")]
        request_id: Option<String>,
    },
}

/// One bar's worth of symbol data, as handed to the WS client (spec §6
/// `exchange_data {timestamp, data}`). Mirrors `simproto::SymbolData` but
/// keeps decimals as strings on the wire, matching the gRPC contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolDataView {
    pub symbol: String,
    pub open: String,
    pub high: String,
    pub low: String,
    pub close: String,
    pub vwap: String,
    pub vwas: String,
    pub vwav: String,
    pub volume: i64,
    pub trade_count: i64,
    pub currency: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Connected {
        #[serde(rename = "clientId")]
        client_id: String,
        #[serde(rename = "deviceId")]
        device_id: String,
        #[serde(rename = "sessionId")]
        session_id: SessionId,
    },
    SessionInfo {
        #[serde(rename = "requestId")]
        request_id: Option<String>,
        #[serde(rename = "deviceId")]
        device_id: String,
        #[serde(rename = "expiresAt")]
        expires_at: DateTime<Utc>,
        #[serde(rename = "simulatorStatus")]
        simulator_status: SimulatorStatus,
    },
    HeartbeatAck {
        timestamp: i64,
        #[serde(rename = "clientTimestamp")]
        client_timestamp: i64,
        latency: i64,
    },
    ConnectionQualityUpdate {
        /// Rendered via `ConnectionQuality::to_string()` ("good" /
        /// "degraded" / "poor") rather than the derived enum
        /// serialization, to match the wire contract's lowercase values.
        quality: String,
        #[serde(rename = "reconnectRecommended")]
        reconnect_recommended: bool,
    },
    ExchangeData {
        timestamp: DateTime<Utc>,
        data: Vec<SymbolDataView>,
    },
    Error {
        code: String,
        message: String,
        #[serde(rename = "requestId")]
        request_id: Option<String>,
    },
    SessionReplaced,
    ServerShutdown {
        reason: String,
    },
}
