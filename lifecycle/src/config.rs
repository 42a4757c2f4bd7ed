//! `lifecycle-controller` binary configuration — spec §6 env vars plus the
//! controller's own tick interval, read the way `backend/src/config.rs`
//! reads `AppConfig::from_env`: plain `std::env::var`, no config-file crate.

use std::time::Duration;

use common::config_env::{env_parsed_or, CommonConfig};

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub common: CommonConfig,
    pub check_interval: Duration,
    pub health_check_timeout: Duration,
    pub health_check_retry_count: u32,
    pub exchange_worker_binary: String,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            common: CommonConfig::from_env(),
            check_interval: Duration::from_secs(env_parsed_or("CHECK_INTERVAL_SECONDS", 60)),
            health_check_timeout: Duration::from_secs(env_parsed_or(
                "HEALTH_CHECK_TIMEOUT_SECONDS",
                5,
            )),
            health_check_retry_count: env_parsed_or("HEALTH_CHECK_RETRY_COUNT", 1),
            exchange_worker_binary: std::env::var("EXCHANGE_WORKER_BINARY")
                .unwrap_or_else(|_| "exchange-worker".to_string()),
        }
    }
}
