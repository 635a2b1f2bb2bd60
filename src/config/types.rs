//! Core configuration types and loading.

use serde::Deserialize;
use std::net::SocketAddr;
use std::path::Path;
use thiserror::Error;

use super::defaults::{
    default_database_path, default_list_cache_ttl, default_listen, default_max_page_size,
    default_page_size, default_true,
};
use crate::security::identity::CallerKind;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Service configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Server identity and listener.
    pub server: ServerConfig,
    /// Database configuration.
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Cursor sync tuning.
    #[serde(default)]
    pub sync: SyncConfig,
    /// Log output.
    #[serde(default)]
    pub log: LogConfig,
    /// Bearer tokens accepted by the RPC layer.
    #[serde(default, rename = "token")]
    pub tokens: Vec<TokenBlock>,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }
}

/// Server identity configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Instance name, used in logs (e.g., "edgelist-eu-1").
    pub name: String,
    /// RPC listen address (default: 127.0.0.1:8003).
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,
    /// Serve Prometheus text on `GET /metrics` (default: true).
    #[serde(default = "default_true")]
    pub metrics: bool,
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to SQLite database file, or `:memory:`.
    #[serde(default = "default_database_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

/// Cursor sync configuration.
///
/// - `default_page_size`: rows per page when a poller sends `size <= 0` (default: 100)
/// - `max_page_size`: upper clamp on operator browse pages; the sync cursor
///   honors any positive `size` (default: 1000)
/// - `list_cache_ttl_secs`: how long a list lookup is reused across cursor reads (default: 60)
#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    #[serde(default = "default_page_size")]
    pub default_page_size: i64,
    #[serde(default = "default_max_page_size")]
    pub max_page_size: i64,
    #[serde(default = "default_list_cache_ttl")]
    pub list_cache_ttl_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            default_page_size: default_page_size(),
            max_page_size: default_max_page_size(),
            list_cache_ttl_secs: default_list_cache_ttl(),
        }
    }
}

impl SyncConfig {
    /// Effective page size for a requested one.
    pub fn page_size(&self, requested: i64) -> i64 {
        if requested <= 0 {
            self.default_page_size
        } else {
            requested.min(self.max_page_size)
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Log configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LogConfig {
    #[serde(default)]
    pub format: LogFormat,
}

/// A static bearer token and the caller it authenticates as.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenBlock {
    pub token: String,
    pub kind: CallerKind,
    /// Admin, tenant or node id.
    pub id: i64,
}
