//! SQLite implementations of the core repository traits

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use weft_core::{
    CoreError, Job, JobRepository, JobStatus, MachineEvent, MachineEventRepository,
    MachineSnapshot, MachineStateRepository, RealtimeEvent, RealtimeEventRepository,
};

use crate::{store_err, SqliteConnection};

fn to_json_text(value: &serde_json::Value) -> Result<String, CoreError> {
    serde_json::to_string(value).map_err(|e| CoreError::SerializationError(e.to_string()))
}

fn from_json_text(text: &str) -> serde_json::Value {
    serde_json::from_str(text).unwrap_or(serde_json::Value::Null)
}

/// SQLite implementation of the job store
#[derive(Clone)]
pub struct SqliteJobRepository {
    conn: SqliteConnection,
}

impl SqliteJobRepository {
    /// Create a new job repository
    pub fn new(conn: SqliteConnection) -> Self {
        Self { conn }
    }
}

fn row_to_job(row: &SqliteRow) -> Result<Job, CoreError> {
    let status_text: String = row.try_get("status").map_err(store_err)?;
    let status = JobStatus::parse(&status_text)
        .ok_or_else(|| CoreError::StateStoreError(format!("Unknown job status: {}", status_text)))?;

    let data_text: String = row.try_get("data").map_err(store_err)?;
    let result_text: Option<String> = row.try_get("result").map_err(store_err)?;
    let metadata_text: Option<String> = row.try_get("metadata").map_err(store_err)?;

    Ok(Job {
        job_id: row.try_get("job_id").map_err(store_err)?,
        job_type: row.try_get("job_type").map_err(store_err)?,
        machine_type: row.try_get("machine_type").map_err(store_err)?,
        status,
        priority: row.try_get("priority").map_err(store_err)?,
        data: from_json_text(&data_text),
        result: result_text.map(|t| from_json_text(&t)),
        created_at: row.try_get("created_at").map_err(store_err)?,
        started_at: row.try_get("started_at").map_err(store_err)?,
        completed_at: row.try_get("completed_at").map_err(store_err)?,
        error_message: row.try_get("error_message").map_err(store_err)?,
        metadata: metadata_text
            .map(|t| from_json_text(&t))
            .unwrap_or(serde_json::Value::Null),
    })
}

const JOB_COLUMNS: &str = "job_id, job_type, machine_type, status, priority, data, result, \
                           created_at, started_at, completed_at, error_message, metadata";

#[async_trait]
impl JobRepository for SqliteJobRepository {
    async fn submit(&self, job: &Job) -> Result<(), CoreError> {
        let query = "
            INSERT INTO jobs (job_id, job_type, machine_type, status, priority, data,
                              result, created_at, started_at, completed_at, error_message, metadata)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
        ";
        sqlx::query(query)
            .bind(&job.job_id)
            .bind(&job.job_type)
            .bind(&job.machine_type)
            .bind(job.status.as_str())
            .bind(job.priority)
            .bind(to_json_text(&job.data)?)
            .bind(match &job.result {
                Some(result) => Some(to_json_text(result)?),
                None => None,
            })
            .bind(job.created_at)
            .bind(job.started_at)
            .bind(job.completed_at)
            .bind(&job.error_message)
            .bind(to_json_text(&job.metadata)?)
            .execute(self.conn.pool())
            .await
            .map_err(store_err)?;
        Ok(())
    }

    async fn claim_next(&self, machine_type: &str) -> Result<Option<Job>, CoreError> {
        // One statement: SQLite executes it atomically, so two
        // concurrent claimers can never both flip the same row. The
        // returned row already reads `processing`.
        let query = format!(
            "
            UPDATE jobs
            SET status = 'processing', started_at = ?1
            WHERE job_id = (
                SELECT job_id FROM jobs
                WHERE status = 'pending'
                  AND (?2 = '*' OR machine_type IS NULL OR machine_type = ?2)
                ORDER BY created_at ASC, job_id ASC
                LIMIT 1
            )
            AND status = 'pending'
            RETURNING {JOB_COLUMNS}
            "
        );
        let row = sqlx::query(&query)
            .bind(Utc::now())
            .bind(machine_type)
            .fetch_optional(self.conn.pool())
            .await
            .map_err(store_err)?;
        row.as_ref().map(row_to_job).transpose()
    }

    async fn complete(&self, job_id: &str, result: serde_json::Value) -> Result<(), CoreError> {
        let outcome = sqlx::query(
            "UPDATE jobs SET status = 'completed', result = ?1, completed_at = ?2
             WHERE job_id = ?3 AND status = 'processing'",
        )
        .bind(to_json_text(&result)?)
        .bind(Utc::now())
        .bind(job_id)
        .execute(self.conn.pool())
        .await
        .map_err(store_err)?;

        if outcome.rows_affected() == 0 {
            return Err(CoreError::StateStoreError(format!(
                "Job not in processing state: {}",
                job_id
            )));
        }
        Ok(())
    }

    async fn fail(&self, job_id: &str, error_message: &str) -> Result<(), CoreError> {
        let outcome = sqlx::query(
            "UPDATE jobs SET status = 'failed', error_message = ?1, completed_at = ?2
             WHERE job_id = ?3 AND status = 'processing'",
        )
        .bind(error_message)
        .bind(Utc::now())
        .bind(job_id)
        .execute(self.conn.pool())
        .await
        .map_err(store_err)?;

        if outcome.rows_affected() == 0 {
            return Err(CoreError::StateStoreError(format!(
                "Job not in processing state: {}",
                job_id
            )));
        }
        Ok(())
    }

    async fn find_by_id(&self, job_id: &str) -> Result<Option<Job>, CoreError> {
        let query = format!("SELECT {JOB_COLUMNS} FROM jobs WHERE job_id = ?1");
        let row = sqlx::query(&query)
            .bind(job_id)
            .fetch_optional(self.conn.pool())
            .await
            .map_err(store_err)?;
        row.as_ref().map(row_to_job).transpose()
    }

    async fn pending_count(&self) -> Result<u64, CoreError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM jobs WHERE status = 'pending'")
            .fetch_one(self.conn.pool())
            .await
            .map_err(store_err)?;
        let count: i64 = row.try_get("n").map_err(store_err)?;
        Ok(count as u64)
    }
}

/// SQLite implementation of the audit log
#[derive(Clone)]
pub struct SqliteMachineEventRepository {
    conn: SqliteConnection,
}

impl SqliteMachineEventRepository {
    /// Create a new audit log repository
    pub fn new(conn: SqliteConnection) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl MachineEventRepository for SqliteMachineEventRepository {
    async fn append(&self, event: &MachineEvent) -> Result<(), CoreError> {
        sqlx::query(
            "INSERT INTO machine_events
             (source_machine, target_machine, event_type, job_id, payload, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )
        .bind(&event.source_machine)
        .bind(&event.target_machine)
        .bind(&event.event_type)
        .bind(&event.job_id)
        .bind(to_json_text(&event.payload)?)
        .bind(&event.status)
        .bind(event.created_at)
        .execute(self.conn.pool())
        .await
        .map_err(store_err)?;
        Ok(())
    }
}

/// SQLite implementation of the realtime buffer
#[derive(Clone)]
pub struct SqliteRealtimeEventRepository {
    conn: SqliteConnection,
}

impl SqliteRealtimeEventRepository {
    /// Create a new realtime buffer repository
    pub fn new(conn: SqliteConnection) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl RealtimeEventRepository for SqliteRealtimeEventRepository {
    async fn append(&self, event: &RealtimeEvent) -> Result<(), CoreError> {
        sqlx::query(
            "INSERT INTO realtime_events (machine_name, event_type, payload, created_at, consumed)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(&event.machine_name)
        .bind(&event.event_type)
        .bind(to_json_text(&event.payload)?)
        .bind(event.created_at)
        .bind(event.consumed)
        .execute(self.conn.pool())
        .await
        .map_err(store_err)?;
        Ok(())
    }

    async fn fetch_unconsumed(&self, limit: u32) -> Result<Vec<RealtimeEvent>, CoreError> {
        let rows = sqlx::query(
            "SELECT id, machine_name, event_type, payload, created_at, consumed
             FROM realtime_events WHERE consumed = 0 ORDER BY id ASC LIMIT ?1",
        )
        .bind(limit as i64)
        .fetch_all(self.conn.pool())
        .await
        .map_err(store_err)?;

        rows.iter()
            .map(|row| {
                let payload_text: String = row.try_get("payload").map_err(store_err)?;
                Ok(RealtimeEvent {
                    id: row.try_get("id").map_err(store_err)?,
                    machine_name: row.try_get("machine_name").map_err(store_err)?,
                    event_type: row.try_get("event_type").map_err(store_err)?,
                    payload: from_json_text(&payload_text),
                    created_at: row.try_get("created_at").map_err(store_err)?,
                    consumed: row.try_get("consumed").map_err(store_err)?,
                })
            })
            .collect()
    }

    async fn mark_consumed(&self, ids: &[i64]) -> Result<(), CoreError> {
        for id in ids {
            sqlx::query("UPDATE realtime_events SET consumed = 1 WHERE id = ?1")
                .bind(id)
                .execute(self.conn.pool())
                .await
                .map_err(store_err)?;
        }
        Ok(())
    }
}

/// SQLite implementation of the snapshot cache
#[derive(Clone)]
pub struct SqliteMachineStateRepository {
    conn: SqliteConnection,
}

impl SqliteMachineStateRepository {
    /// Create a new snapshot repository
    pub fn new(conn: SqliteConnection) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl MachineStateRepository for SqliteMachineStateRepository {
    async fn upsert(&self, snapshot: &MachineSnapshot) -> Result<(), CoreError> {
        sqlx::query(
            "INSERT INTO machine_state (machine_name, current_state, last_activity, pid, metadata)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT (machine_name) DO UPDATE SET
                 current_state = ?2,
                 last_activity = ?3,
                 pid = ?4,
                 metadata = ?5",
        )
        .bind(&snapshot.machine_name)
        .bind(&snapshot.current_state)
        .bind(snapshot.last_activity)
        .bind(snapshot.pid.map(|p| p as i64))
        .bind(to_json_text(&snapshot.metadata)?)
        .execute(self.conn.pool())
        .await
        .map_err(store_err)?;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<MachineSnapshot>, CoreError> {
        let rows = sqlx::query(
            "SELECT machine_name, current_state, last_activity, pid, metadata
             FROM machine_state ORDER BY machine_name",
        )
        .fetch_all(self.conn.pool())
        .await
        .map_err(store_err)?;

        rows.iter()
            .map(|row| {
                let pid: Option<i64> = row.try_get("pid").map_err(store_err)?;
                let metadata_text: Option<String> = row.try_get("metadata").map_err(store_err)?;
                Ok(MachineSnapshot {
                    machine_name: row.try_get("machine_name").map_err(store_err)?,
                    current_state: row.try_get("current_state").map_err(store_err)?,
                    last_activity: row.try_get::<DateTime<Utc>, _>("last_activity").map_err(store_err)?,
                    pid: pid.and_then(|p| u32::try_from(p).ok()),
                    metadata: metadata_text
                        .map(|t| from_json_text(&t))
                        .unwrap_or(serde_json::Value::Null),
                })
            })
            .collect()
    }

    async fn remove(&self, machine_name: &str) -> Result<(), CoreError> {
        sqlx::query("DELETE FROM machine_state WHERE machine_name = ?1")
            .bind(machine_name)
            .execute(self.conn.pool())
            .await
            .map_err(store_err)?;
        Ok(())
    }
}
