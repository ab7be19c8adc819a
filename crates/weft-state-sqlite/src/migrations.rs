//! Schema management
//!
//! Idempotent creation of the four persisted tables. Safe to run at
//! every process start, from any number of processes.

use sqlx::sqlite::SqlitePool;
use weft_core::CoreError;

use crate::store_err;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS jobs (
    job_id TEXT PRIMARY KEY,
    job_type TEXT NOT NULL,
    machine_type TEXT,
    status TEXT NOT NULL,
    priority INTEGER NOT NULL DEFAULT 0,
    data TEXT NOT NULL,
    result TEXT,
    created_at TEXT NOT NULL,
    started_at TEXT,
    completed_at TEXT,
    error_message TEXT,
    metadata TEXT
);

CREATE INDEX IF NOT EXISTS idx_jobs_status_created ON jobs(status, created_at);
CREATE INDEX IF NOT EXISTS idx_jobs_machine_type ON jobs(machine_type);

CREATE TABLE IF NOT EXISTS machine_events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    source_machine TEXT NOT NULL,
    target_machine TEXT NOT NULL,
    event_type TEXT NOT NULL,
    job_id TEXT,
    payload TEXT NOT NULL,
    status TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_machine_events_created ON machine_events(created_at);

CREATE TABLE IF NOT EXISTS machine_state (
    machine_name TEXT PRIMARY KEY,
    current_state TEXT NOT NULL,
    last_activity TEXT NOT NULL,
    pid INTEGER,
    metadata TEXT
);

CREATE TABLE IF NOT EXISTS realtime_events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    machine_name TEXT NOT NULL,
    event_type TEXT NOT NULL,
    payload TEXT NOT NULL,
    created_at TEXT NOT NULL,
    consumed INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_realtime_events_consumed ON realtime_events(consumed, id);
"#;

/// Create all tables and indexes if they do not exist
pub async fn run_migrations(pool: &SqlitePool) -> Result<(), CoreError> {
    sqlx::raw_sql(SCHEMA).execute(pool).await.map_err(store_err)?;
    tracing::debug!("Schema migrations applied");
    Ok(())
}
