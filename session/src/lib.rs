//! Session Singleton — spec §4.2 (C2). Serves exactly one user's live
//! trading session per process instance: multiplexes the user's devices
//! over WebSocket, relays exchange updates, and advertises readiness only
//! while unbound.

pub mod auth;
pub mod config;
pub mod grpc_client;
pub mod instance;
pub mod manager;
pub mod messages;
pub mod quality;
pub mod registry;
pub mod ws;

pub use instance::{InstanceState, ReadinessFiles};
pub use manager::{ConnectOutcome, SessionSingleton, SessionSingletonConfig};
