//! Configuration for the relay server
//!
//! Loaded from environment variables with defaults suitable for a
//! single-host deployment.

use serde::{Deserialize, Serialize};
use std::env;
use tracing::warn;

use crate::error::{RelayError, RelayResult};

/// Relay server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Port the WebSocket/HTTP server listens on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Host to bind to
    #[serde(default = "default_host")]
    pub bind_address: String,

    /// UDP port of the shared broadcast channel
    #[serde(default = "default_broadcast_port")]
    pub broadcast_port: u16,

    /// Path of the shared SQLite database
    #[serde(default = "default_database_path")]
    pub database_path: String,

    /// Per-observer send budget in milliseconds
    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: u64,

    /// Interval between server-originated pings, in seconds
    #[serde(default = "default_ping_interval_secs")]
    pub ping_interval_secs: u64,

    /// Heartbeat staleness bound for the watchdog, in seconds
    #[serde(default = "default_watchdog_stale_secs")]
    pub watchdog_stale_secs: u64,

    /// How long the broadcast channel must stay quiet before the
    /// store fallback is polled, in milliseconds
    #[serde(default = "default_quiet_window_ms")]
    pub quiet_window_ms: u64,

    /// Where the watchdog writes diagnostic captures. Deliberately a
    /// plain file, independent of the primary logger.
    #[serde(default = "default_diagnostics_path")]
    pub diagnostics_path: String,

    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_port() -> u16 {
    9800
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_broadcast_port() -> u16 {
    weft_transport::DEFAULT_BROADCAST_PORT
}

fn default_database_path() -> String {
    "weft.db".to_string()
}

fn default_send_timeout_ms() -> u64 {
    2000
}

fn default_ping_interval_secs() -> u64 {
    10
}

fn default_watchdog_stale_secs() -> u64 {
    15
}

fn default_quiet_window_ms() -> u64 {
    1500
}

fn default_diagnostics_path() -> String {
    "weft-relay-diagnostics.log".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn env_u64(name: &str, target: &mut u64) {
    if let Ok(raw) = env::var(name) {
        match raw.parse::<u64>() {
            Ok(value) => *target = value,
            Err(_) => warn!("Invalid {} value: {}", name, raw),
        }
    }
}

impl RelayConfig {
    /// Load configuration from environment variables
    pub fn load() -> RelayResult<Self> {
        let mut config = Self::default();

        if let Ok(port) = env::var("RELAY_PORT") {
            match port.parse::<u16>() {
                Ok(port) => config.port = port,
                Err(_) => warn!("Invalid RELAY_PORT value: {}", port),
            }
        }

        if let Ok(host) = env::var("RELAY_BIND_ADDRESS") {
            config.bind_address = host;
        }

        if let Ok(port) = env::var("WEFT_BROADCAST_PORT") {
            match port.parse::<u16>() {
                Ok(port) => config.broadcast_port = port,
                Err(_) => warn!("Invalid WEFT_BROADCAST_PORT value: {}", port),
            }
        }

        if let Ok(path) = env::var("WEFT_DATABASE_PATH") {
            config.database_path = path;
        }

        env_u64("RELAY_SEND_TIMEOUT_MS", &mut config.send_timeout_ms);
        env_u64("RELAY_PING_INTERVAL_SECS", &mut config.ping_interval_secs);
        env_u64("RELAY_WATCHDOG_STALE_SECS", &mut config.watchdog_stale_secs);
        env_u64("RELAY_QUIET_WINDOW_MS", &mut config.quiet_window_ms);

        if let Ok(path) = env::var("RELAY_DIAGNOSTICS_PATH") {
            config.diagnostics_path = path;
        }

        if let Ok(level) = env::var("LOG_LEVEL") {
            config.log_level = level;
        }

        if config.send_timeout_ms == 0 {
            return Err(RelayError::ConfigError(
                "Send timeout must be non-zero; an unbounded observer send can stall the relay"
                    .to_string(),
            ));
        }
        if config.database_path.is_empty() {
            return Err(RelayError::ConfigError(
                "Database path is required".to_string(),
            ));
        }

        Ok(config)
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind_address: default_host(),
            broadcast_port: default_broadcast_port(),
            database_path: default_database_path(),
            send_timeout_ms: default_send_timeout_ms(),
            ping_interval_secs: default_ping_interval_secs(),
            watchdog_stale_secs: default_watchdog_stale_secs(),
            quiet_window_ms: default_quiet_window_ms(),
            diagnostics_path: default_diagnostics_path(),
            log_level: default_log_level(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_keep_bounds_tight() {
        let config = RelayConfig::default();
        assert_eq!(config.send_timeout_ms, 2000);
        assert_eq!(config.ping_interval_secs, 10);
        assert_eq!(config.watchdog_stale_secs, 15);
        assert!(config.quiet_window_ms >= 500);
    }
}
