use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Job status lifecycle.
///
/// `Pending -> Processing` happens exactly once, at claim time;
/// `Completed` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Submitted, waiting for a claimer
    Pending,

    /// Claimed by exactly one machine
    Processing,

    /// Finished successfully
    Completed,

    /// Finished with an error
    Failed,
}

impl JobStatus {
    /// Database/wire representation
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    /// Parse the database/wire representation
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(JobStatus::Pending),
            "processing" => Some(JobStatus::Processing),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }
}

/// A persisted unit of work
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Unique job identifier
    pub job_id: String,

    /// What kind of work this is
    pub job_type: String,

    /// Which machine type may claim it; `None` means any
    pub machine_type: Option<String>,

    /// Lifecycle status
    pub status: JobStatus,

    /// Claim-ordering hint; higher is more urgent
    pub priority: i64,

    /// Submitted input data
    pub data: serde_json::Value,

    /// Result recorded at completion
    pub result: Option<serde_json::Value>,

    /// Submission time
    pub created_at: DateTime<Utc>,

    /// Claim time
    pub started_at: Option<DateTime<Utc>>,

    /// Terminal-state time
    pub completed_at: Option<DateTime<Utc>>,

    /// Failure detail, for failed jobs
    pub error_message: Option<String>,

    /// Free-form metadata
    pub metadata: serde_json::Value,
}

impl Job {
    /// Create a new pending job with a generated id
    pub fn new(job_type: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            job_id: Uuid::new_v4().to_string(),
            job_type: job_type.into(),
            machine_type: None,
            status: JobStatus::Pending,
            priority: 0,
            data,
            result: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            error_message: None,
            metadata: serde_json::Value::Null,
        }
    }

    /// Restrict the job to one machine type
    pub fn for_machine_type(mut self, machine_type: impl Into<String>) -> Self {
        self.machine_type = Some(machine_type.into());
        self
    }

    /// Set the claim-ordering priority
    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    /// Whether this job has reached a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self.status, JobStatus::Completed | JobStatus::Failed)
    }
}
