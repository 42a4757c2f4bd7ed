//! `session-singleton` binary configuration — spec §6 env vars plus the
//! singleton's own session-lifetime and heartbeat knobs.

use std::path::PathBuf;
use std::time::Duration;

use common::config_env::{env_or, env_parsed_or, CommonConfig};

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub common: CommonConfig,
    pub ws_port: u16,
    pub session_timeout: Duration,
    pub session_extension_threshold: Duration,
    pub ws_heartbeat_interval: Duration,
    pub ready_file_path: Option<PathBuf>,
    pub active_lock_file_path: Option<PathBuf>,
    pub auth_secret: String,
    pub exch_id: String,
    pub drain_timeout: Duration,
    pub reconnect_base_backoff: Duration,
    pub reconnect_max_backoff: Duration,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            common: CommonConfig::from_env(),
            ws_port: env_parsed_or("WS_PORT", 8080),
            session_timeout: Duration::from_secs(env_parsed_or("SESSION_TIMEOUT_SECONDS", 3600)),
            session_extension_threshold: Duration::from_secs(env_parsed_or(
                "SESSION_EXTENSION_THRESHOLD",
                1800,
            )),
            ws_heartbeat_interval: Duration::from_secs(env_parsed_or("WS_HEARTBEAT_INTERVAL", 10)),
            ready_file_path: std::env::var("READY_FILE_PATH").ok().map(PathBuf::from),
            active_lock_file_path: std::env::var("ACTIVE_LOCK_FILE_PATH").ok().map(PathBuf::from),
            auth_secret: env_or("AUTH_TOKEN_SECRET", "dev-secret"),
            exch_id: env_or("EXCH_ID", "default"),
            drain_timeout: Duration::from_secs(env_parsed_or("DRAIN_TIMEOUT_SECONDS", 30)),
            reconnect_base_backoff: Duration::from_millis(env_parsed_or(
                "EXCHANGE_RECONNECT_BASE_BACKOFF_MS",
                500,
            )),
            reconnect_max_backoff: Duration::from_secs(env_parsed_or(
                "EXCHANGE_RECONNECT_MAX_BACKOFF_SECONDS",
                30,
            )),
        }
    }

    /// `RESET_ON_STARTUP` is a common env var (spec §6); the session
    /// singleton's startup sequence honors it by re-advertising `READY`
    /// and clearing any stale active-lock file left by a crashed instance.
    pub fn reset_on_startup(&self) -> bool {
        self.common.reset_on_startup
    }
}
