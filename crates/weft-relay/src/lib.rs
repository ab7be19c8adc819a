//!
//! Weft Relay - observer relay server for the Weft platform
//!
//! Fans broadcast traffic out to many WebSocket observers, each under
//! an independent send budget, with liveness pings and hang
//! self-diagnosis.

use std::sync::Arc;

/// Configuration module
pub mod config;

/// Per-observer connection handling
pub mod connection;

/// Error module
pub mod error;

/// Server module
pub mod server;

/// Heartbeat and watchdog
pub mod watchdog;

// Re-export key types
pub use config::RelayConfig;
pub use connection::{relay_connection, ObserverSettings};
pub use error::{RelayError, RelayResult};
pub use server::{AppState, RelayServer};
pub use watchdog::{Heartbeat, RelayStats, Watchdog};

use weft_state_sqlite::{
    SqliteConnection, SqliteMachineStateRepository, SqliteRealtimeEventRepository,
};

/// Run the relay server with stores opened from configuration
pub async fn run(config: RelayConfig) -> RelayResult<()> {
    init_logging(&config);

    let conn = SqliteConnection::open(&config.database_path).await?;
    let machine_state = Arc::new(SqliteMachineStateRepository::new(conn.clone()));
    let realtime_events = Arc::new(SqliteRealtimeEventRepository::new(conn));

    let server = RelayServer::new(config, machine_state, realtime_events);
    server.run().await
}

/// Initialize logging
fn init_logging(config: &RelayConfig) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    // A second init (tests, embedding) is fine to ignore.
    let _ = fmt().with_env_filter(filter).with_target(true).try_init();
}
