//! Repository traits for the Weft core
//!
//! These are the persistence seams of the runtime. External crates
//! implement them to provide real storage; the `memory` module carries
//! in-process implementations for tests.

use async_trait::async_trait;

use super::job::Job;
use super::machine::MachineSnapshot;
use super::messages::{MachineEvent, RealtimeEvent};
use crate::CoreError;

/// Persisted work-item store with atomic claim semantics
#[async_trait]
pub trait JobRepository: Send + Sync {
    /// Persist a new pending job
    async fn submit(&self, job: &Job) -> Result<(), CoreError>;

    /// Atomically claim the oldest pending job.
    ///
    /// `machine_type` filters by type; `"*"` serves any type. The
    /// returned job already reads `processing` with `started_at`
    /// stamped — callers never re-observe `pending`. Concurrent
    /// claimers can never both receive the same job.
    async fn claim_next(&self, machine_type: &str) -> Result<Option<Job>, CoreError>;

    /// Mark a processing job completed with its result
    async fn complete(&self, job_id: &str, result: serde_json::Value) -> Result<(), CoreError>;

    /// Mark a processing job failed with an error message
    async fn fail(&self, job_id: &str, error_message: &str) -> Result<(), CoreError>;

    /// Find a job by id
    async fn find_by_id(&self, job_id: &str) -> Result<Option<Job>, CoreError>;

    /// Count jobs still pending
    async fn pending_count(&self) -> Result<u64, CoreError>;
}

/// Append-only inter-machine audit log
#[async_trait]
pub trait MachineEventRepository: Send + Sync {
    /// Append one audit record
    async fn append(&self, event: &MachineEvent) -> Result<(), CoreError>;
}

/// Append-only UI-facing realtime buffer
#[async_trait]
pub trait RealtimeEventRepository: Send + Sync {
    /// Append one buffered event
    async fn append(&self, event: &RealtimeEvent) -> Result<(), CoreError>;

    /// Fetch up to `limit` unconsumed rows, oldest first
    async fn fetch_unconsumed(&self, limit: u32) -> Result<Vec<RealtimeEvent>, CoreError>;

    /// Mark rows consumed after delivery
    async fn mark_consumed(&self, ids: &[i64]) -> Result<(), CoreError>;
}

/// Observer-facing machine snapshot cache
#[async_trait]
pub trait MachineStateRepository: Send + Sync {
    /// Insert or update a machine's snapshot row
    async fn upsert(&self, snapshot: &MachineSnapshot) -> Result<(), CoreError>;

    /// All known machine snapshots
    async fn list(&self) -> Result<Vec<MachineSnapshot>, CoreError>;

    /// Remove a machine's snapshot row
    async fn remove(&self, machine_name: &str) -> Result<(), CoreError>;
}

/// Memory implementations for testing
#[cfg(feature = "testing")]
pub mod memory {
    use super::*;
    use crate::domain::job::JobStatus;
    use chrono::Utc;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// In-memory job store with claim semantics matching the SQL store
    #[derive(Default)]
    pub struct MemoryJobRepository {
        jobs: Mutex<Vec<Job>>,
    }

    impl MemoryJobRepository {
        /// Create an empty store
        pub fn new() -> Self {
            Self::default()
        }
    }

    #[async_trait]
    impl JobRepository for MemoryJobRepository {
        async fn submit(&self, job: &Job) -> Result<(), CoreError> {
            let mut jobs = self.jobs.lock().map_err(poisoned)?;
            jobs.push(job.clone());
            Ok(())
        }

        async fn claim_next(&self, machine_type: &str) -> Result<Option<Job>, CoreError> {
            let mut jobs = self.jobs.lock().map_err(poisoned)?;
            let candidate = jobs
                .iter_mut()
                .filter(|j| j.status == JobStatus::Pending)
                .filter(|j| {
                    machine_type == "*"
                        || j.machine_type.is_none()
                        || j.machine_type.as_deref() == Some(machine_type)
                })
                .min_by(|a, b| {
                    a.created_at
                        .cmp(&b.created_at)
                        .then_with(|| a.job_id.cmp(&b.job_id))
                });

            Ok(candidate.map(|job| {
                job.status = JobStatus::Processing;
                job.started_at = Some(Utc::now());
                job.clone()
            }))
        }

        async fn complete(&self, job_id: &str, result: serde_json::Value) -> Result<(), CoreError> {
            let mut jobs = self.jobs.lock().map_err(poisoned)?;
            let job = jobs
                .iter_mut()
                .find(|j| j.job_id == job_id)
                .ok_or_else(|| CoreError::StateStoreError(format!("Unknown job: {}", job_id)))?;
            job.status = JobStatus::Completed;
            job.result = Some(result);
            job.completed_at = Some(Utc::now());
            Ok(())
        }

        async fn fail(&self, job_id: &str, error_message: &str) -> Result<(), CoreError> {
            let mut jobs = self.jobs.lock().map_err(poisoned)?;
            let job = jobs
                .iter_mut()
                .find(|j| j.job_id == job_id)
                .ok_or_else(|| CoreError::StateStoreError(format!("Unknown job: {}", job_id)))?;
            job.status = JobStatus::Failed;
            job.error_message = Some(error_message.to_string());
            job.completed_at = Some(Utc::now());
            Ok(())
        }

        async fn find_by_id(&self, job_id: &str) -> Result<Option<Job>, CoreError> {
            let jobs = self.jobs.lock().map_err(poisoned)?;
            Ok(jobs.iter().find(|j| j.job_id == job_id).cloned())
        }

        async fn pending_count(&self) -> Result<u64, CoreError> {
            let jobs = self.jobs.lock().map_err(poisoned)?;
            Ok(jobs.iter().filter(|j| j.status == JobStatus::Pending).count() as u64)
        }
    }

    /// In-memory audit log
    #[derive(Default)]
    pub struct MemoryMachineEventRepository {
        events: Mutex<Vec<MachineEvent>>,
    }

    impl MemoryMachineEventRepository {
        /// Create an empty log
        pub fn new() -> Self {
            Self::default()
        }

        /// Recorded events, for assertions
        pub fn events(&self) -> Vec<MachineEvent> {
            self.events.lock().map(|e| e.clone()).unwrap_or_default()
        }
    }

    #[async_trait]
    impl MachineEventRepository for MemoryMachineEventRepository {
        async fn append(&self, event: &MachineEvent) -> Result<(), CoreError> {
            let mut events = self.events.lock().map_err(poisoned)?;
            events.push(event.clone());
            Ok(())
        }
    }

    /// In-memory realtime buffer
    #[derive(Default)]
    pub struct MemoryRealtimeEventRepository {
        rows: Mutex<Vec<RealtimeEvent>>,
        next_id: Mutex<i64>,
    }

    impl MemoryRealtimeEventRepository {
        /// Create an empty buffer
        pub fn new() -> Self {
            Self::default()
        }
    }

    #[async_trait]
    impl RealtimeEventRepository for MemoryRealtimeEventRepository {
        async fn append(&self, event: &RealtimeEvent) -> Result<(), CoreError> {
            let mut rows = self.rows.lock().map_err(poisoned)?;
            let mut next_id = self.next_id.lock().map_err(poisoned)?;
            *next_id += 1;
            let mut event = event.clone();
            event.id = *next_id;
            rows.push(event);
            Ok(())
        }

        async fn fetch_unconsumed(&self, limit: u32) -> Result<Vec<RealtimeEvent>, CoreError> {
            let rows = self.rows.lock().map_err(poisoned)?;
            Ok(rows
                .iter()
                .filter(|r| !r.consumed)
                .take(limit as usize)
                .cloned()
                .collect())
        }

        async fn mark_consumed(&self, ids: &[i64]) -> Result<(), CoreError> {
            let mut rows = self.rows.lock().map_err(poisoned)?;
            for row in rows.iter_mut() {
                if ids.contains(&row.id) {
                    row.consumed = true;
                }
            }
            Ok(())
        }
    }

    /// In-memory snapshot cache
    #[derive(Default)]
    pub struct MemoryMachineStateRepository {
        snapshots: Mutex<HashMap<String, MachineSnapshot>>,
    }

    impl MemoryMachineStateRepository {
        /// Create an empty cache
        pub fn new() -> Self {
            Self::default()
        }
    }

    #[async_trait]
    impl MachineStateRepository for MemoryMachineStateRepository {
        async fn upsert(&self, snapshot: &MachineSnapshot) -> Result<(), CoreError> {
            let mut snapshots = self.snapshots.lock().map_err(poisoned)?;
            snapshots.insert(snapshot.machine_name.clone(), snapshot.clone());
            Ok(())
        }

        async fn list(&self) -> Result<Vec<MachineSnapshot>, CoreError> {
            let snapshots = self.snapshots.lock().map_err(poisoned)?;
            Ok(snapshots.values().cloned().collect())
        }

        async fn remove(&self, machine_name: &str) -> Result<(), CoreError> {
            let mut snapshots = self.snapshots.lock().map_err(poisoned)?;
            snapshots.remove(machine_name);
            Ok(())
        }
    }

    fn poisoned<T>(e: std::sync::PoisonError<T>) -> CoreError {
        CoreError::StateStoreError(format!("Lock poisoned: {}", e))
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use serde_json::json;

        #[tokio::test]
        async fn claim_prefers_oldest_pending() {
            let repo = MemoryJobRepository::new();
            let mut first = Job::new("x", json!({}));
            first.created_at = Utc::now() - chrono::Duration::seconds(10);
            let second = Job::new("x", json!({}));
            repo.submit(&second).await.unwrap();
            repo.submit(&first).await.unwrap();

            let claimed = repo.claim_next("*").await.unwrap().unwrap();
            assert_eq!(claimed.job_id, first.job_id);
            assert_eq!(claimed.status, JobStatus::Processing);
            assert!(claimed.started_at.is_some());
        }

        #[tokio::test]
        async fn claim_respects_machine_type_filter() {
            let repo = MemoryJobRepository::new();
            repo.submit(&Job::new("x", json!({})).for_machine_type("audio"))
                .await
                .unwrap();

            assert!(repo.claim_next("video").await.unwrap().is_none());
            assert!(repo.claim_next("audio").await.unwrap().is_some());
        }

        #[tokio::test]
        async fn claimed_job_is_not_pending_again() {
            let repo = MemoryJobRepository::new();
            repo.submit(&Job::new("x", json!({}))).await.unwrap();
            assert!(repo.claim_next("*").await.unwrap().is_some());
            assert!(repo.claim_next("*").await.unwrap().is_none());
            assert_eq!(repo.pending_count().await.unwrap(), 0);
        }

        #[tokio::test]
        async fn realtime_buffer_marks_consumed() {
            let repo = MemoryRealtimeEventRepository::new();
            let event = RealtimeEvent::from_broadcast(&crate::domain::messages::BroadcastMessage::activity_log("m1", "hi"));
            repo.append(&event).await.unwrap();

            let rows = repo.fetch_unconsumed(10).await.unwrap();
            assert_eq!(rows.len(), 1);
            repo.mark_consumed(&[rows[0].id]).await.unwrap();
            assert!(repo.fetch_unconsumed(10).await.unwrap().is_empty());
        }
    }
}
