//! Device/connection registry — spec §4.2 "Device policy" and §5
//! concurrency model ("each WS is owned by a single writer task"). The
//! live socket never leaves the writer task; this registry only holds a
//! channel handle to it, mirroring how `BarMultiplexer::subscribers` holds
//! `mpsc::Sender`s rather than raw sockets.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, Mutex};

use store::model::DeviceId;

use crate::messages::ServerMessage;

pub struct WsConnection {
    pub device_id: DeviceId,
    pub client_id: String,
    pub tx: mpsc::Sender<ServerMessage>,
    pub connected_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

/// Bounded deadline for a fan-out send to one connection, same shape as
/// `MultiplexerConfig::send_deadline` in the `market` crate — a stalled
/// client is evicted rather than allowed to stall the broadcaster.
const SEND_DEADLINE: Duration = Duration::from_millis(200);

#[derive(Default)]
pub struct ConnectionRegistry {
    connections: Mutex<HashMap<DeviceId, WsConnection>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `conn`, replacing any existing connection for the same
    /// device (spec §4.2 "a new one replaces and closes the old"). Returns
    /// the replaced connection so the caller can notify and close it.
    pub async fn register(&self, conn: WsConnection) -> Option<WsConnection> {
        self.connections.lock().await.insert(conn.device_id.clone(), conn)
    }

    /// Idempotent: removing an already-absent device is a no-op.
    pub async fn unregister(&self, device_id: &str) -> Option<WsConnection> {
        self.connections.lock().await.remove(device_id)
    }

    pub async fn touch_activity(&self, device_id: &str, at: DateTime<Utc>) {
        if let Some(conn) = self.connections.lock().await.get_mut(device_id) {
            conn.last_activity = at;
        }
    }

    pub async fn is_empty(&self) -> bool {
        self.connections.lock().await.is_empty()
    }

    pub async fn device_ids(&self) -> Vec<DeviceId> {
        self.connections.lock().await.keys().cloned().collect()
    }

    /// Send one message to a single device, used for replies to inbound
    /// frames (heartbeat_ack, session_info, error, ...).
    pub async fn send_to(&self, device_id: &str, msg: ServerMessage) -> bool {
        let tx = {
            let guard = self.connections.lock().await;
            match guard.get(device_id) {
                Some(conn) => conn.tx.clone(),
                None => return false,
            }
        };
        tokio::time::timeout(SEND_DEADLINE, tx.send(msg)).await.is_ok()
    }

    /// Parallel fan-out to every registered connection (spec §4.2
    /// "converts to the WS envelope and fans out to all registered WS
    /// connections in parallel"), grounded on the teacher's
    /// `MarketManager::process_event_stream` broadcast-to-all-subscribers
    /// loop. Dead devices are unregistered after the sweep, never mid-loop.
    pub async fn broadcast(&self, msg: ServerMessage) -> Vec<DeviceId> {
        let senders: Vec<(DeviceId, mpsc::Sender<ServerMessage>)> = {
            let guard = self.connections.lock().await;
            guard.iter().map(|(id, conn)| (id.clone(), conn.tx.clone())).collect()
        };

        let sends = senders.into_iter().map(|(device_id, tx)| {
            let msg = msg.clone();
            async move {
                let ok = tokio::time::timeout(SEND_DEADLINE, tx.send(msg)).await.is_ok();
                (device_id, ok)
            }
        });

        let results = futures::future::join_all(sends).await;
        let dead: Vec<DeviceId> = results.into_iter().filter(|(_, ok)| !ok).map(|(id, _)| id).collect();

        for device_id in &dead {
            self.unregister(device_id).await;
            tracing::warn!(%device_id, "evicted unresponsive WS connection");
        }

        dead
    }

    /// Closes every connection with a final frame (drain on shutdown/stop;
    /// spec §4.2 "Cleanup on drain"). The actual socket close happens in
    /// the writer task once its channel is dropped or yields this message.
    pub async fn drain(&self, reason: ServerMessage) {
        let senders: Vec<mpsc::Sender<ServerMessage>> = {
            let guard = self.connections.lock().await;
            guard.values().map(|c| c.tx.clone()).collect()
        };
        for tx in senders {
            let _ = tx.send(reason.clone()).await;
        }
        self.connections.lock().await.clear();
    }
}
