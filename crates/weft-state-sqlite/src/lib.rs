//!
//! Weft State (SQLite) - persisted stores for the Weft platform
//!
//! Implements the `weft-core` repository traits on top of SQLite via
//! sqlx. Connections are pool-scoped: every operation acquires from the
//! pool and releases on all exit paths.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use weft_core::CoreError;

/// Schema management
pub mod migrations;

/// Repository implementations
pub mod repositories;

pub use repositories::{
    SqliteJobRepository, SqliteMachineEventRepository, SqliteMachineStateRepository,
    SqliteRealtimeEventRepository,
};

/// Shared handle to a SQLite database
#[derive(Clone)]
pub struct SqliteConnection {
    pool: SqlitePool,
}

impl SqliteConnection {
    /// Open (creating if missing) a database file and run migrations
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, CoreError> {
        // WAL plus a busy timeout: the database is shared by every
        // engine process and the relay.
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| CoreError::StateStoreError(format!("Failed to open database: {}", e)))?;
        let conn = Self { pool };
        migrations::run_migrations(conn.pool()).await?;
        Ok(conn)
    }

    /// Open an in-memory database (for testing).
    ///
    /// Pinned to a single pool connection; each SQLite in-memory
    /// database is private to its connection.
    pub async fn in_memory() -> Result<Self, CoreError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| CoreError::StateStoreError(e.to_string()))?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| {
                CoreError::StateStoreError(format!("Failed to open in-memory database: {}", e))
            })?;
        let conn = Self { pool };
        migrations::run_migrations(conn.pool()).await?;
        Ok(conn)
    }

    /// Borrow the underlying pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

pub(crate) fn store_err(e: sqlx::Error) -> CoreError {
    CoreError::StateStoreError(format!("Database error: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn in_memory_database_migrates() {
        let conn = SqliteConnection::in_memory().await.unwrap();
        // Schema exists and is idempotent.
        migrations::run_migrations(conn.pool()).await.unwrap();
    }

    #[tokio::test]
    async fn open_creates_database_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("weft.db");
        let _conn = SqliteConnection::open(&path).await.unwrap();
        assert!(path.exists());
    }
}
