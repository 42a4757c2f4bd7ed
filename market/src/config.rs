//! `exchange-worker` binary configuration — spec §6 env vars plus the
//! worker's own identity and feed knobs.

use std::time::Duration;

use common::config_env::{env_or, env_parsed_or, CommonConfig};

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub common: CommonConfig,
    pub exch_id: String,
    pub grpc_port: u16,
    pub symbols: Vec<String>,
    pub tick_interval: Duration,
    pub send_deadline: Duration,
    pub replay_file_path: Option<String>,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let symbols = env_or("SYMBOLS", "AAPL,MSFT,GOOG")
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        Self {
            common: CommonConfig::from_env(),
            exch_id: env_or("EXCH_ID", "default"),
            grpc_port: env_parsed_or("GRPC_PORT", 50051),
            symbols,
            tick_interval: Duration::from_secs(env_parsed_or("BAR_TICK_INTERVAL_SECONDS", 60)),
            send_deadline: Duration::from_millis(env_parsed_or("SUBSCRIBER_SEND_DEADLINE_MS", 200)),
            replay_file_path: std::env::var("REPLAY_FILE_PATH").ok(),
        }
    }
}
