//! Engine process configuration
//!
//! Loaded from environment variables; the engine has no command-line
//! surface of its own.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::env;
use tracing::warn;

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Unique machine name
    pub machine_name: String,

    /// Machine type used when claiming jobs
    #[serde(default)]
    pub machine_type: Option<String>,

    /// Path to the workflow definition file
    pub workflow_file: String,

    /// UDP port of this machine's control channel; 0 picks an
    /// ephemeral port
    #[serde(default)]
    pub control_port: u16,

    /// UDP port of the shared broadcast channel
    #[serde(default = "default_broadcast_port")]
    pub broadcast_port: u16,

    /// Path of the shared SQLite database
    #[serde(default = "default_database_path")]
    pub database_path: String,

    /// Optional directory scanned once for external action definitions
    #[serde(default)]
    pub actions_dir: Option<String>,

    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_broadcast_port() -> u16 {
    weft_transport::DEFAULT_BROADCAST_PORT
}

fn default_database_path() -> String {
    "weft.db".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl EngineConfig {
    /// Load configuration from environment variables
    pub fn load() -> Result<Self> {
        let Ok(machine_name) = env::var("WEFT_MACHINE_NAME") else {
            bail!("WEFT_MACHINE_NAME is required");
        };
        let Ok(workflow_file) = env::var("WEFT_WORKFLOW_FILE") else {
            bail!("WEFT_WORKFLOW_FILE is required");
        };

        let mut config = Self {
            machine_name,
            machine_type: env::var("WEFT_MACHINE_TYPE").ok(),
            workflow_file,
            control_port: 0,
            broadcast_port: default_broadcast_port(),
            database_path: default_database_path(),
            actions_dir: env::var("WEFT_ACTIONS_DIR").ok(),
            log_level: default_log_level(),
        };

        if let Ok(port) = env::var("WEFT_CONTROL_PORT") {
            match port.parse::<u16>() {
                Ok(port) => config.control_port = port,
                Err(_) => warn!("Invalid WEFT_CONTROL_PORT value: {}", port),
            }
        }
        if config.control_port == 0 {
            warn!("No WEFT_CONTROL_PORT set; using an ephemeral port peers cannot predict");
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

        if let Ok(level) = env::var("LOG_LEVEL") {
            config.log_level = level;
        }

        Ok(config)
    }
}
