//! Environment-variable configuration helpers shared by every binary.
//!
//! Mirrors the teacher's `backend::config::AppConfig::from_env` style:
//! plain `std::env::var` reads with defaults, no config-file crate.

use std::env;
use std::str::FromStr;

pub fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

pub fn env_parsed_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

pub fn env_bool_or(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(v) => matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes"),
        Err(_) => default,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

impl Environment {
    pub fn from_env() -> Self {
        match env::var("ENVIRONMENT").as_deref() {
            Ok("production") => Environment::Production,
            _ => Environment::Development,
        }
    }

    pub fn is_production(self) -> bool {
        matches!(self, Environment::Production)
    }
}

/// Database connection knobs, per spec.md §6 `DB_*` variables.
#[derive(Debug, Clone)]
pub struct DbConfig {
    pub host: String,
    pub port: u16,
    pub name: String,
    pub user: String,
    pub password: String,
    pub min_connections: u32,
    pub max_connections: u32,
}

impl DbConfig {
    pub fn from_env() -> Self {
        Self {
            host: env_or("DB_HOST", "localhost"),
            port: env_parsed_or("DB_PORT", 5432),
            name: env_or("DB_NAME", "tradesim"),
            user: env_or("DB_USER", "tradesim"),
            password: env_or("DB_PASSWORD", ""),
            min_connections: env_parsed_or("DB_MIN_CONNECTIONS", 1),
            max_connections: env_parsed_or("DB_MAX_CONNECTIONS", 10),
        }
    }

    pub fn postgres_url(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.user, self.password, self.host, self.port, self.name
        )
    }
}

/// Fields every binary reads regardless of which component it is.
#[derive(Debug, Clone)]
pub struct CommonConfig {
    pub environment: Environment,
    pub db: DbConfig,
    pub metrics_port: u16,
    pub reset_on_startup: bool,
}

impl CommonConfig {
    pub fn from_env() -> Self {
        Self {
            environment: Environment::from_env(),
            db: DbConfig::from_env(),
            metrics_port: env_parsed_or("METRICS_PORT", 9090),
            reset_on_startup: env_bool_or("RESET_ON_STARTUP", false),
        }
    }
}
