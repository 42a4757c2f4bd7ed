//! `SessionSingleton` — spec §4.2 (C2). Generalizes the teacher's
//! `SessionManager<S>` (`Arc<Mutex<HashMap<SessionId, Session>>>` plus a
//! secondary index) from trading-session bookkeeping to one-user-per-instance
//! WS bookkeeping: this instance ever holds at most one `Session`, so the
//! map collapses to a single `Option<Session>` behind the same mutex that
//! also guards the `READY/ACTIVE/DRAINING` state machine, giving total
//! ordering of transitions (§5 "Session state transitions are totally
//! ordered by the session mutex").

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use common::clock::Clock;
use common::error::AppError;
use store::model::{ConnectionQuality, Session, SessionId, SessionStatus};
use store::traits::SessionStore;
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::auth::AuthVerifier;
use crate::grpc_client::{to_exchange_data, ExchangeClient};
use crate::instance::{InstanceState, ReadinessFiles};
use crate::messages::{ServerMessage, SimulatorStatus};
use crate::quality::derive_quality;
use crate::registry::{ConnectionRegistry, WsConnection};

#[derive(Debug, Clone)]
pub struct SessionSingletonConfig {
    pub session_timeout: Duration,
    pub session_extension_threshold: Duration,
    pub drain_timeout: Duration,
    pub exch_id: String,
    pub reconnect_base_backoff: Duration,
    pub reconnect_max_backoff: Duration,
}

struct Inner {
    instance: InstanceState,
    session: Option<Session>,
}

/// The supervisory gRPC stream plus its fan-out task for the currently
/// ACTIVE session, tracked so `drain` can cancel and then actually await
/// them (bounded by `drain_timeout`) instead of guessing at a sleep.
struct StreamHandle {
    cancel: CancellationToken,
    run_task: tokio::task::JoinHandle<()>,
    fanout_task: tokio::task::JoinHandle<()>,
}

/// Outcome of a successful `/ws` connect (spec §4.2 "Session creation /
/// info flow").
pub struct ConnectOutcome {
    pub session: Session,
    /// `true` only when this connect created a brand-new session id; `false`
    /// when it attached a device to the session already ACTIVE on this
    /// instance (S2 "this is a device replacement, not a session reconnect").
    pub is_new_session: bool,
    /// The WS connection this device previously held, if any — the caller
    /// must send it `SessionReplaced` and close it.
    pub replaced_device: Option<WsConnection>,
}

pub struct SessionSingleton {
    cfg: SessionSingletonConfig,
    store: Arc<dyn SessionStore>,
    auth: Arc<dyn AuthVerifier>,
    clock: Arc<dyn Clock>,
    inner: AsyncMutex<Inner>,
    registry: ConnectionRegistry,
    readiness: ReadinessFiles,
    simulator_status: Arc<AsyncMutex<SimulatorStatus>>,
    stream: AsyncMutex<Option<StreamHandle>>,
}

impl SessionSingleton {
    pub fn new(
        cfg: SessionSingletonConfig,
        store: Arc<dyn SessionStore>,
        auth: Arc<dyn AuthVerifier>,
        clock: Arc<dyn Clock>,
        readiness: ReadinessFiles,
    ) -> Arc<Self> {
        readiness.advertise_ready();
        Arc::new(Self {
            cfg,
            store,
            auth,
            clock,
            inner: AsyncMutex::new(Inner {
                instance: InstanceState::Ready,
                session: None,
            }),
            registry: ConnectionRegistry::new(),
            readiness,
            simulator_status: Arc::new(AsyncMutex::new(SimulatorStatus::Checking)),
            stream: AsyncMutex::new(None),
        })
    }

    pub async fn instance_state(&self) -> InstanceState {
        self.inner.lock().await.instance
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now_utc()
    }

    pub async fn current_session(&self) -> Option<Session> {
        self.inner.lock().await.session.clone()
    }

    pub async fn simulator_status(&self) -> SimulatorStatus {
        *self.simulator_status.lock().await
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Verifies `token`, then binds this instance to the resulting user and
    /// registers `device_id`/`client_id` with the given send handle (spec
    /// §4.2 steps 1-4, and the device-policy/S2 rule described on
    /// `ConnectOutcome`).
    pub async fn connect(
        self: &Arc<Self>,
        token: &str,
        device_id: String,
        client_id: String,
        tx: tokio::sync::mpsc::Sender<ServerMessage>,
    ) -> Result<ConnectOutcome, AppError> {
        let now = self.clock.now_utc();
        let user_id = self
            .auth
            .verify(token, now.timestamp())
            .await
            .map_err(|e| AppError::AuthFailed(e.to_string()))?;

        let (session, is_new_session) = {
            let mut guard = self.inner.lock().await;

            if guard.instance == InstanceState::Draining {
                return Err(AppError::NotReady("instance draining".to_string()));
            }

            let busy_with_other_user = matches!(
                &guard.session,
                Some(s) if s.user_id != user_id && s.status == SessionStatus::Active
            );
            if busy_with_other_user {
                return Err(AppError::NotReady("instance bound to another session".to_string()));
            }

            let reuse_existing = matches!(
                &guard.session,
                Some(s) if s.user_id == user_id && s.status == SessionStatus::Active
            );

            if reuse_existing {
                (guard.session.clone().expect("checked above"), false)
            } else {
                // READY, or an ACTIVE instance whose bound session is no
                // longer live (INACTIVE/EXPIRED/ERROR): start a fresh session,
                // demoting any incumbent first (§3 "creating a new session
                // while one is ACTIVE first transitions the incumbent to
                // INACTIVE").
                if let Some(mut incumbent) = guard.session.take() {
                    incumbent.status = SessionStatus::Inactive;
                    if let Err(e) = self.store.save_session(&incumbent).await {
                        tracing::warn!(error = %e, session_id = %incumbent.session_id, "failed to persist demoted session");
                    }
                }

                let session = Session {
                    session_id: Uuid::new_v4(),
                    user_id,
                    device_id: device_id.clone(),
                    created_at: now,
                    last_active: now,
                    expires_at: now + chrono::Duration::from_std(self.cfg.session_timeout).unwrap_or_default(),
                    status: SessionStatus::Active,
                    connection_quality: ConnectionQuality::Good,
                    reconnect_count: 0,
                    heartbeat_latency_ms: None,
                    missed_heartbeats: 0,
                    simulator_id: None,
                    simulator_endpoint: Some(exchange_endpoint(&self.cfg.exch_id)),
                };

                guard.instance = InstanceState::Active;
                guard.session = Some(session.clone());
                (session, true)
            }
        };

        if let Err(e) = self.store.save_session(&session).await {
            tracing::error!(error = %e, session_id = %session.session_id, "failed to persist session");
        }

        self.readiness.advertise_active();

        let replaced_device = self
            .registry
            .register(WsConnection {
                device_id: device_id.clone(),
                client_id,
                tx,
                connected_at: now,
                last_activity: now,
            })
            .await;

        if is_new_session {
            self.spawn_exchange_stream().await;
        }

        Ok(ConnectOutcome {
            session,
            is_new_session,
            replaced_device,
        })
    }

    /// Spawns the supervisory gRPC task for the currently-bound session
    /// (spec §4.2 "Outbound exchange stream"), cancelling and abandoning any
    /// prior pair of tasks.
    async fn spawn_exchange_stream(self: &Arc<Self>) {
        let cancel = CancellationToken::new();
        let exch_id = self.cfg.exch_id.clone();
        let endpoint = exchange_endpoint(&exch_id);
        let client = ExchangeClient::new(endpoint);
        let (update_tx, mut update_rx) = tokio::sync::mpsc::channel(256);

        let status_for_client = self.simulator_status.clone();
        let run_cancel = cancel.clone();
        let base_backoff = self.cfg.reconnect_base_backoff;
        let max_backoff = self.cfg.reconnect_max_backoff;
        let run_task = tokio::spawn(async move {
            client
                .run(exch_id, vec![], status_for_client, update_tx, run_cancel, base_backoff, max_backoff)
                .await;
        });

        let fanout_this = self.clone();
        let fanout_task = tokio::spawn(async move {
            while let Some(update) = update_rx.recv().await {
                fanout_this.registry.broadcast(to_exchange_data(update)).await;
            }
        });

        let handle = StreamHandle { cancel, run_task, fanout_task };
        if let Some(old) = self.stream.lock().await.replace(handle) {
            old.cancel.cancel();
            old.run_task.abort();
            old.fanout_task.abort();
        }
    }

    /// Handles an inbound `heartbeat` frame: replies `heartbeat_ack` and
    /// touches activity, sliding the session's expiry when it is within
    /// `session_extension_threshold` of lapsing (spec §6 env var
    /// `SESSION_EXTENSION_THRESHOLD`).
    pub async fn heartbeat(&self, device_id: &str, client_timestamp: i64) -> ServerMessage {
        let now = self.clock.now_utc();
        self.registry.touch_activity(device_id, now).await;

        let latency = (now.timestamp_millis() - client_timestamp).max(0);

        let mut guard = self.inner.lock().await;
        if let Some(session) = guard.session.as_mut() {
            session.last_active = now;
            let remaining = session.expires_at - now;
            if remaining < chrono::Duration::from_std(self.cfg.session_extension_threshold).unwrap_or_default() {
                session.expires_at = now + chrono::Duration::from_std(self.cfg.session_timeout).unwrap_or_default();
            }
            let session = session.clone();
            drop(guard);
            if let Err(e) = self.store.save_session(&session).await {
                tracing::warn!(error = %e, "failed to persist heartbeat activity");
            }
        }

        ServerMessage::HeartbeatAck {
            timestamp: now.timestamp_millis(),
            client_timestamp,
            latency,
        }
    }

    /// Handles an inbound `connection_quality` frame (spec §4.2 "Heartbeat
    /// and connection quality", S6).
    pub async fn connection_quality(
        &self,
        device_id: &str,
        latency_ms: u64,
        missed_heartbeats: u32,
    ) -> ServerMessage {
        self.registry.touch_activity(device_id, self.clock.now_utc()).await;
        let report = derive_quality(latency_ms, missed_heartbeats);

        let mut guard = self.inner.lock().await;
        if let Some(session) = guard.session.as_mut() {
            session.connection_quality = report.quality;
            session.heartbeat_latency_ms = Some(latency_ms);
            session.missed_heartbeats = missed_heartbeats;
            let session = session.clone();
            drop(guard);
            if let Err(e) = self.store.save_session(&session).await {
                tracing::warn!(error = %e, "failed to persist connection quality");
            }
        }

        ServerMessage::ConnectionQualityUpdate {
            quality: report.quality.to_string(),
            reconnect_recommended: report.reconnect_recommended,
        }
    }

    /// Handles an inbound `reconnect` frame (spec §4.2 "Reconnect").
    pub async fn reconnect(
        &self,
        session_id: SessionId,
        token: &str,
        device_id: &str,
        _attempt: u32,
    ) -> Result<Session, AppError> {
        let now = self.clock.now_utc();
        let user_id = self
            .auth
            .verify(token, now.timestamp())
            .await
            .map_err(|e| AppError::AuthFailed(e.to_string()))?;

        let mut guard = self.inner.lock().await;
        let session = guard
            .session
            .as_mut()
            .filter(|s| s.session_id == session_id && s.user_id == user_id)
            .ok_or_else(|| AppError::InvalidRequest("INVALID_DEVICE".to_string()))?;

        if session.device_id != device_id {
            return Err(AppError::InvalidRequest("INVALID_DEVICE".to_string()));
        }

        session.reconnect_count += 1;
        session.last_active = now;
        let snapshot = session.clone();
        drop(guard);

        if let Err(e) = self.store.save_session(&snapshot).await {
            tracing::warn!(error = %e, "failed to persist reconnect");
        }
        Ok(snapshot)
    }

    /// Unregisters a device's WS and, if it was the last one, begins
    /// draining (spec §4.2 transitions: "last device disconnects").
    pub async fn on_device_disconnect(self: &Arc<Self>, device_id: &str) {
        self.registry.unregister(device_id).await;
        if self.registry.is_empty().await {
            self.drain("Session stopped".to_string()).await;
        }
    }

    /// Handles an inbound `stop_session` frame — explicit drain request.
    pub async fn stop_session(self: &Arc<Self>) {
        self.drain("Session stopped".to_string()).await;
    }

    /// Periodic watchdog check (spec §8 "A heartbeat arriving after
    /// SESSION_TIMEOUT_SECONDS yields EXPIRED and closes the WS").
    pub async fn check_expiry(self: &Arc<Self>) {
        let now = self.clock.now_utc();
        let expired = {
            let guard = self.inner.lock().await;
            matches!(&guard.session, Some(s) if s.is_expired(now))
        };
        if expired {
            {
                let mut guard = self.inner.lock().await;
                if let Some(session) = guard.session.as_mut() {
                    session.status = SessionStatus::Expired;
                }
            }
            self.drain("Session expired".to_string()).await;
        }
    }

    /// ACTIVE -> DRAINING -> READY (spec §4.2 "Cleanup on drain"). Closes
    /// every WS, awaits the upstream stream's cancellation, releases the
    /// readiness lock, and returns to READY.
    pub async fn drain(self: &Arc<Self>, reason: String) {
        {
            let mut guard = self.inner.lock().await;
            if guard.instance != InstanceState::Active {
                return;
            }
            guard.instance = InstanceState::Draining;
        }

        self.registry.drain(ServerMessage::ServerShutdown { reason }).await;

        // Cancel the upstream stream, then actually wait (bounded by
        // `drain_timeout`) for it to unwind rather than guessing at a sleep;
        // past the deadline the tasks are abandoned (§5 "tasks are expected
        // to return within a bounded drain timeout ... after which they are
        // abandoned").
        if let Some(handle) = self.stream.lock().await.take() {
            handle.cancel.cancel();
            let _ = tokio::time::timeout(self.cfg.drain_timeout, async {
                let _ = handle.run_task.await;
                let _ = handle.fanout_task.await;
            })
            .await;
        }

        {
            let mut guard = self.inner.lock().await;
            if let Some(session) = guard.session.take() {
                if let Err(e) = self.store.delete_session(session.session_id).await {
                    tracing::warn!(error = %e, "failed to delete drained session");
                }
            }
            guard.instance = InstanceState::Ready;
        }
        self.readiness.advertise_ready();
    }

    /// Forced shutdown path (process signal): drains if ACTIVE, a no-op if
    /// already READY.
    pub async fn shutdown(self: &Arc<Self>) {
        if self.instance_state().await == InstanceState::Active {
            self.drain("Server shutting down".to_string()).await;
        }
    }
}

/// Cluster DNS convention for an exchange worker's gRPC endpoint, matching
/// `lifecycle::worker_spec::WorkerSpec::resource_name`
/// (`exchange-service-<lowercase-id>`).
pub fn exchange_endpoint(exch_id: &str) -> String {
    format!("http://exchange-service-{}:50051", exch_id.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::InMemoryAuthVerifier;
    use common::clock::FixedClock;
    use store::memory::InMemoryStore;

    fn singleton(now: DateTime<Utc>) -> (Arc<SessionSingleton>, Arc<InMemoryAuthVerifier>) {
        let store = InMemoryStore::new();
        let auth = Arc::new(InMemoryAuthVerifier::new("secret"));
        let clock = Arc::new(FixedClock::new(now));
        let readiness = ReadinessFiles::new(None, None);
        let singleton = SessionSingleton::new(
            SessionSingletonConfig {
                session_timeout: Duration::from_secs(3600),
                session_extension_threshold: Duration::from_secs(1800),
                drain_timeout: Duration::from_secs(1),
                exch_id: "NYSE".to_string(),
                reconnect_base_backoff: Duration::from_millis(10),
                reconnect_max_backoff: Duration::from_millis(100),
            },
            store,
            auth.clone(),
            clock,
            readiness,
        );
        (singleton, auth)
    }

    #[tokio::test]
    async fn connect_transitions_ready_to_active() {
        let now = Utc::now();
        let (singleton, auth) = singleton(now);
        let token = auth.sign("alice", now.timestamp() + 3600);
        let (tx, _rx) = tokio::sync::mpsc::channel(8);

        assert_eq!(singleton.instance_state().await, InstanceState::Ready);
        let outcome = singleton.connect(&token, "d1".to_string(), "c1".to_string(), tx).await.unwrap();
        assert!(outcome.is_new_session);
        assert!(outcome.replaced_device.is_none());
        assert_eq!(singleton.instance_state().await, InstanceState::Active);
    }

    #[tokio::test]
    async fn s2_second_connect_same_device_replaces_without_new_session() {
        let now = Utc::now();
        let (singleton, auth) = singleton(now);
        let token = auth.sign("alice", now.timestamp() + 3600);

        let (tx1, _rx1) = tokio::sync::mpsc::channel(8);
        let first = singleton.connect(&token, "d1".to_string(), "c1".to_string(), tx1).await.unwrap();

        let (tx2, _rx2) = tokio::sync::mpsc::channel(8);
        let second = singleton.connect(&token, "d1".to_string(), "c2".to_string(), tx2).await.unwrap();

        assert!(!second.is_new_session);
        assert_eq!(first.session.session_id, second.session.session_id);
        assert!(second.replaced_device.is_some());
        assert_eq!(second.session.reconnect_count, 0);
    }

    #[tokio::test]
    async fn different_user_rejected_while_active() {
        let now = Utc::now();
        let (singleton, auth) = singleton(now);
        let token_a = auth.sign("alice", now.timestamp() + 3600);
        let token_b = auth.sign("bob", now.timestamp() + 3600);

        let (tx1, _rx1) = tokio::sync::mpsc::channel(8);
        singleton.connect(&token_a, "d1".to_string(), "c1".to_string(), tx1).await.unwrap();

        let (tx2, _rx2) = tokio::sync::mpsc::channel(8);
        let err = singleton.connect(&token_b, "d2".to_string(), "c2".to_string(), tx2).await.unwrap_err();
        assert_eq!(err.code(), "NOT_READY");
    }

    #[tokio::test]
    async fn drain_returns_instance_to_ready() {
        let now = Utc::now();
        let (singleton, auth) = singleton(now);
        let token = auth.sign("alice", now.timestamp() + 3600);
        let (tx, _rx) = tokio::sync::mpsc::channel(8);
        singleton.connect(&token, "d1".to_string(), "c1".to_string(), tx).await.unwrap();

        singleton.on_device_disconnect("d1").await;
        assert_eq!(singleton.instance_state().await, InstanceState::Ready);
        assert!(singleton.current_session().await.is_none());
    }

    #[tokio::test]
    async fn reconnect_mismatched_device_is_rejected() {
        let now = Utc::now();
        let (singleton, auth) = singleton(now);
        let token = auth.sign("alice", now.timestamp() + 3600);
        let (tx, _rx) = tokio::sync::mpsc::channel(8);
        let outcome = singleton.connect(&token, "d1".to_string(), "c1".to_string(), tx).await.unwrap();

        let err = singleton
            .reconnect(outcome.session.session_id, &token, "wrong-device", 1)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn reconnect_increments_count_and_keeps_session() {
        let now = Utc::now();
        let (singleton, auth) = singleton(now);
        let token = auth.sign("alice", now.timestamp() + 3600);
        let (tx, _rx) = tokio::sync::mpsc::channel(8);
        let outcome = singleton.connect(&token, "d1".to_string(), "c1".to_string(), tx).await.unwrap();

        let snapshot = singleton.reconnect(outcome.session.session_id, &token, "d1", 1).await.unwrap();
        assert_eq!(snapshot.reconnect_count, 1);
    }

    #[tokio::test]
    async fn expired_session_is_drained() {
        let now = Utc::now();
        let (singleton, auth) = singleton(now);
        let token = auth.sign("alice", now.timestamp() + 3600);
        let (tx, _rx) = tokio::sync::mpsc::channel(8);
        singleton.connect(&token, "d1".to_string(), "c1".to_string(), tx).await.unwrap();

        {
            let mut guard = singleton.inner.lock().await;
            if let Some(s) = guard.session.as_mut() {
                s.expires_at = now - chrono::Duration::seconds(1);
            }
        }
        singleton.check_expiry().await;
        assert_eq!(singleton.instance_state().await, InstanceState::Ready);
    }
}
