//! Market-Data Multiplexer — spec §4.3 (C3). Lives inside the
//! `exchange-worker` process: owns the upstream bar feed subscription,
//! persists each batch, and fans it out to downstream session subscribers.

pub mod config;
pub mod feed;
pub mod grpc_service;
pub mod multiplexer;
pub mod types;

pub use feed::{BarFeed, ReplayBarFeed, SimulatedBarFeed};
pub use grpc_service::ExchangeWorkerService;
pub use multiplexer::{BarMultiplexer, MultiplexerConfig, MultiplexerMetrics};
pub use types::{BarEnvelope, SubscriberId, Subscription};
