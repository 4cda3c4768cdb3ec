//! Configuration System
//!
//! Provides hierarchical configuration loading from:
//! - query-sandbox.toml (default configuration)
//! - query-sandbox.local.toml (git-ignored local overrides)
//! - Environment variables (QUERY_SANDBOX_* prefix)
//!
//! ## Example
//!
//! ```toml
//! # query-sandbox.toml
//! [engine]
//! enforce_foreign_keys = true
//! min_sqlite_version = "3.35.0"
//!
//! [remote]
//! base_url = "http://127.0.0.1:8080/api"
//! request_timeout_ms = 30000
//! ```
//!
//! Environment variable overrides:
//! ```bash
//! QUERY_SANDBOX_REMOTE__BASE_URL=https://sandbox.example.com/api
//! QUERY_SANDBOX_REMOTE__REQUEST_TIMEOUT_MS=10000
//! ```

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Main configuration struct
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub remote: RemoteConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Embedded engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Turn on `PRAGMA foreign_keys` for every new sandbox database
    #[serde(default = "default_true")]
    pub enforce_foreign_keys: bool,

    /// Oldest SQLite runtime the loader accepts (dotted version)
    #[serde(default = "default_min_sqlite_version")]
    pub min_sqlite_version: String,
}

/// Remote sandbox server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Base URL of the sandbox API, without trailing slash
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Upper bound for one remote execution in milliseconds, including the
    /// replay after an expired session. 0 = no timeout.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// TCP connect timeout in milliseconds
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Error text the server uses to report an expired session
    #[serde(default = "default_session_expired_sentinel")]
    pub session_expired_sentinel: String,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (text, json)
    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default value functions
fn default_true() -> bool {
    true
}
fn default_min_sqlite_version() -> String {
    "3.35.0".to_string()
}
fn default_base_url() -> String {
    "http://127.0.0.1:8080/api".to_string()
}
fn default_request_timeout_ms() -> u64 {
    30_000
}
fn default_connect_timeout_ms() -> u64 {
    5_000
}
fn default_session_expired_sentinel() -> String {
    "SESSION_EXPIRED".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "text".to_string()
}

impl Config {
    /// Load configuration from default locations
    ///
    /// Merges in order:
    /// 1. query-sandbox.toml (base configuration)
    /// 2. query-sandbox.local.toml (local overrides, git-ignored)
    /// 3. Environment variables (QUERY_SANDBOX_* prefix)
    pub fn load() -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file("query-sandbox.toml"))
            .merge(Toml::file("query-sandbox.local.toml"))
            .merge(Env::prefixed("QUERY_SANDBOX_").split("__"))
            .extract()
    }

    /// Load configuration from specific file path
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("QUERY_SANDBOX_").split("__"))
            .extract()
    }
}

impl RemoteConfig {
    /// Bound applied to a remote execution, `None` when disabled
    pub fn request_timeout(&self) -> Option<Duration> {
        (self.request_timeout_ms > 0).then(|| Duration::from_millis(self.request_timeout_ms))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            enforce_foreign_keys: default_true(),
            min_sqlite_version: default_min_sqlite_version(),
        }
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        RemoteConfig {
            base_url: default_base_url(),
            request_timeout_ms: default_request_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            session_expired_sentinel: default_session_expired_sentinel(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.engine.enforce_foreign_keys);
        assert_eq!(config.engine.min_sqlite_version, "3.35.0");
        assert_eq!(config.remote.base_url, "http://127.0.0.1:8080/api");
        assert_eq!(config.remote.session_expired_sentinel, "SESSION_EXPIRED");
    }

    #[test]
    fn test_default_logging_config() {
        let config = Config::default();
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.logging.format, "text");
    }

    #[test]
    fn test_request_timeout() {
        let mut remote = RemoteConfig::default();
        assert_eq!(remote.request_timeout(), Some(Duration::from_secs(30)));

        remote.request_timeout_ms = 0;
        assert_eq!(remote.request_timeout(), None);
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let toml_str = toml::to_string(&config).unwrap();

        assert!(toml_str.contains("[engine]"));
        assert!(toml_str.contains("[remote]"));
        assert!(toml_str.contains("[logging]"));
    }

    #[test]
    fn test_config_toml_roundtrip() {
        let config = Config::default();
        let toml_str = toml::to_string(&config).unwrap();
        let back: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(back.remote.request_timeout_ms, 30_000);
        assert_eq!(back.logging.level, "info");
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let back: Config = toml::from_str("[remote]\nrequest_timeout_ms = 500\n").unwrap();
        assert_eq!(back.remote.request_timeout_ms, 500);
        assert_eq!(back.remote.connect_timeout_ms, 5_000);
        assert!(back.engine.enforce_foreign_keys);
    }
}
