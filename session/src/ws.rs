//! WS/HTTP server — spec §4.2 "WS server", §6 "Client <-> Session
//! Singleton". Route shape and the `ws_handler`/`handle_ws`
//! split-sink-and-stream pattern is grounded on the pack's
//! `omnichain-demo-relayer::server::{ws_handler, handle_ws}`, adapted from
//! broadcast-channel fan-out to the per-device `ConnectionRegistry` this
//! crate already owns.

use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use uuid::Uuid;

use crate::instance::InstanceState;
use crate::manager::SessionSingleton;
use crate::messages::{ClientMessage, ServerMessage};

#[derive(Debug, Deserialize)]
pub struct ConnectQuery {
    pub token: String,
    #[serde(rename = "deviceId")]
    pub device_id: String,
}

pub fn router(singleton: Arc<SessionSingleton>) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .with_state(singleton)
}

async fn healthz() -> impl IntoResponse {
    Json(serde_json::json!({"status": "ok"}))
}

/// Mirrors the file-based readiness signal over HTTP (spec §4.2 "advertises
/// availability (e.g., a ready file / readiness probe returns 200)").
async fn readyz(State(singleton): State<Arc<SessionSingleton>>) -> impl IntoResponse {
    match singleton.instance_state().await {
        InstanceState::Ready => (axum::http::StatusCode::OK, Json(serde_json::json!({"ready": true}))),
        other => (
            axum::http::StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({"ready": false, "state": format!("{other:?}")})),
        ),
    }
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<ConnectQuery>,
    State(singleton): State<Arc<SessionSingleton>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws(socket, query, singleton))
}

async fn handle_ws(socket: WebSocket, query: ConnectQuery, singleton: Arc<SessionSingleton>) {
    let (mut sender, mut receiver) = socket.split();
    let client_id = Uuid::new_v4().to_string();
    let device_id = query.device_id.clone();

    let (tx, mut rx) = tokio::sync::mpsc::channel::<ServerMessage>(64);
    let connected_tx = tx.clone();

    let outcome = match singleton.connect(&query.token, device_id.clone(), client_id.clone(), tx).await {
        Ok(outcome) => outcome,
        Err(e) => {
            let frame = ServerMessage::Error {
                code: e.code().to_string(),
                message: e.to_string(),
                request_id: None,
            };
            if let Ok(json) = serde_json::to_string(&frame) {
                let _ = sender.send(Message::Text(json)).await;
            }
            let close_code = if e.code() == "AUTH_FAILED" { 1008 } else { 1000 };
            let _ = sender
                .send(Message::Close(Some(CloseFrame {
                    code: close_code,
                    reason: e.to_string().into(),
                })))
                .await;
            return;
        }
    };

    if let Some(replaced) = outcome.replaced_device {
        let _ = replaced.tx.send(ServerMessage::SessionReplaced).await;
    }

    let _ = connected_tx
        .send(ServerMessage::Connected {
            client_id: client_id.clone(),
            device_id: device_id.clone(),
            session_id: outcome.session.session_id,
        })
        .await;

    // Writer task: this device's dedicated, single-writer socket sink
    // (§5 "each WS is owned by a single writer task"). Closes the socket
    // the moment a `SessionReplaced`/`ServerShutdown` frame is forwarded.
    let writer_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let is_terminal = matches!(msg, ServerMessage::SessionReplaced | ServerMessage::ServerShutdown { .. });
            let Ok(json) = serde_json::to_string(&msg) else { continue };
            if sender.send(Message::Text(json)).await.is_err() {
                break;
            }
            if is_terminal {
                let _ = sender.send(Message::Close(None)).await;
                break;
            }
        }
    });

    let reader_singleton = singleton.clone();
    let reader_device_id = device_id.clone();
    let reader_task = tokio::spawn(async move {
        while let Some(msg) = receiver.next().await {
            match msg {
                Ok(Message::Text(text)) => {
                    dispatch(&reader_singleton, &reader_device_id, &text).await;
                }
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(_) => break,
            }
        }
    });

    tokio::select! {
        _ = writer_task => {}
        _ = reader_task => {}
    }

    singleton.on_device_disconnect(&device_id).await;
}

/// Dispatch table for inbound frames (spec §4.2 "Inbound message dispatch",
/// Design Notes #2): one `match` over the tagged `ClientMessage` instead of
/// a dict-of-callables. Unknown `type`s fail at `serde_json::from_str` and
/// are reported as `INVALID_REQUEST` before reaching this match.
async fn dispatch(singleton: &Arc<SessionSingleton>, device_id: &str, raw: &str) {
    // Every inbound message touches activity (spec §4.2 "Inbound message
    // dispatch": "Every inbound message updates the WS last_activity"), even
    // when the specific handler below doesn't also touch it itself.
    singleton.registry().touch_activity(device_id, singleton.now()).await;

    let parsed: Result<ClientMessage, _> = serde_json::from_str(raw);
    let reply = match parsed {
        Ok(ClientMessage::Heartbeat { timestamp }) => Some(singleton.heartbeat(device_id, timestamp).await),
        Ok(ClientMessage::ConnectionQuality { latency_ms, missed_heartbeats, .. }) => {
            Some(singleton.connection_quality(device_id, latency_ms, missed_heartbeats).await)
        }
        Ok(ClientMessage::SessionInfo { request_id }) => match singleton.current_session().await {
            Some(s) => {
                let simulator_status = singleton.simulator_status().await;
                Some(ServerMessage::SessionInfo {
                    request_id,
                    device_id: s.device_id,
                    expires_at: s.expires_at,
                    simulator_status,
                })
            }
            None => None,
        },
        Ok(ClientMessage::Reconnect { session_id, token, device_id: dev, attempt }) => {
            match singleton.reconnect(session_id, &token, &dev, attempt).await {
                Ok(s) => {
                    let simulator_status = singleton.simulator_status().await;
                    Some(ServerMessage::SessionInfo {
                        request_id: None,
                        device_id: s.device_id,
                        expires_at: s.expires_at,
                        simulator_status,
                    })
                }
                Err(e) => Some(ServerMessage::Error {
                    code: e.code().to_string(),
                    message: e.to_string(),
                    request_id: None,
                }),
            }
        }
        Ok(ClientMessage::StopSession { .. }) => {
            singleton.stop_session().await;
            None
        }
        Ok(ClientMessage::Subscribe { .. }) | Ok(ClientMessage::Unsubscribe { .. }) => {
            // Symbol-level subscription narrowing happens inside the
            // exchange worker's multiplexer (market crate); the session
            // singleton fans out every update it receives to every device.
            None
        }
        Err(e) => Some(ServerMessage::Error {
            code: "INVALID_REQUEST".to_string(),
            message: e.to_string(),
            request_id: None,
        }),
    };

    if let Some(reply) = reply {
        singleton.registry().send_to(device_id, reply).await;
    }
}
