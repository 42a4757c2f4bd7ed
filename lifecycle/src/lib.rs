//! Lifecycle Controller — spec §4.1 (C1).
//!
//! A pure reconciliation loop: no request handling, no persistent
//! controller-owned state beyond what it re-derives from the `Store` and
//! `ClusterOps` every tick.

pub mod cluster;
pub mod config;
pub mod controller;
pub mod worker_spec;

pub use cluster::{ClusterOps, InMemoryClusterOps, ProcessClusterOps};
pub use controller::{LifecycleController, LifecycleControllerConfig, ReconcileReport};
pub use worker_spec::WorkerSpec;
