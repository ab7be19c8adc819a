//! Job queue actions

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

use weft_core::application::runtime_interface::BroadcastSink;
use weft_core::{
    ActionExecutor, ActionExecutorBase, ActionResult, ActionRuntimeApi, BroadcastMessage,
    CoreError, JobRepository, LogLevel,
};

async fn outcome(api: &Arc<dyn ActionRuntimeApi>, key: &str, default: Option<&str>) -> Option<String> {
    match api.get_config(key).await {
        Ok(Value::String(event)) => Some(event),
        Ok(Value::Null) => None,
        _ => default.map(String::from),
    }
}

/// Claims the oldest pending job for this machine's type
pub struct ClaimJob {
    jobs: Arc<dyn JobRepository>,
    broadcast: Arc<dyn BroadcastSink>,
}

impl ClaimJob {
    /// Create the action over a job store and broadcast channel
    pub fn new(jobs: Arc<dyn JobRepository>, broadcast: Arc<dyn BroadcastSink>) -> Self {
        Self { jobs, broadcast }
    }
}

impl ActionExecutorBase for ClaimJob {
    fn action_type(&self) -> &str {
        "claim_job"
    }
}

#[async_trait]
impl ActionExecutor for ClaimJob {
    async fn execute(&self, api: Arc<dyn ActionRuntimeApi>) -> ActionResult {
        // A wildcard claimer serves any job type, which is how one
        // dispatcher machine can front heterogeneous workers.
        let machine_type = match api.get_config("machine_type").await {
            Ok(Value::String(machine_type)) => machine_type,
            _ => "*".to_string(),
        };

        let job = match self.jobs.claim_next(&machine_type).await {
            Ok(job) => job,
            Err(e) => return ActionResult::Failure(e),
        };

        match job {
            Some(job) => {
                if let Err(e) = api
                    .context_set("job_id", Value::String(job.job_id.clone()))
                    .await
                {
                    return ActionResult::Failure(e);
                }
                let job_value = match serde_json::to_value(&job) {
                    Ok(value) => value,
                    Err(e) => return ActionResult::Failure(CoreError::from(e)),
                };
                if let Err(e) = api.context_set("job", job_value).await {
                    return ActionResult::Failure(e);
                }

                let _ = self
                    .broadcast
                    .emit(&BroadcastMessage::job_started(
                        api.machine_name(),
                        &job.job_id,
                        &job.job_type,
                    ))
                    .await;
                let _ = api
                    .log(
                        LogLevel::Info,
                        &format!("Claimed job {} ({})", job.job_id, job.job_type),
                    )
                    .await;

                ActionResult::Success(outcome(&api, "on_claimed", Some("job_claimed")).await)
            }
            None => ActionResult::Success(outcome(&api, "on_empty", None).await),
        }
    }
}

/// Completes the job currently bound to the context
pub struct CompleteJob {
    jobs: Arc<dyn JobRepository>,
    broadcast: Arc<dyn BroadcastSink>,
}

impl CompleteJob {
    /// Create the action over a job store and broadcast channel
    pub fn new(jobs: Arc<dyn JobRepository>, broadcast: Arc<dyn BroadcastSink>) -> Self {
        Self { jobs, broadcast }
    }
}

impl ActionExecutorBase for CompleteJob {
    fn action_type(&self) -> &str {
        "complete_job"
    }
}

#[async_trait]
impl ActionExecutor for CompleteJob {
    async fn execute(&self, api: Arc<dyn ActionRuntimeApi>) -> ActionResult {
        let Some(job_id) = api.job_id().await else {
            return ActionResult::Failure(CoreError::ActionExecutionError(
                "No job_id in context to complete".to_string(),
            ));
        };

        let result = api.get_config("result").await.unwrap_or(Value::Null);
        if let Err(e) = self.jobs.complete(&job_id, result).await {
            return ActionResult::Failure(e);
        }

        let _ = self
            .broadcast
            .emit(&BroadcastMessage::job_completed(
                api.machine_name(),
                &job_id,
                true,
            ))
            .await;

        ActionResult::Success(outcome(&api, "outcome", None).await)
    }
}

/// Fails the job currently bound to the context
pub struct FailJob {
    jobs: Arc<dyn JobRepository>,
    broadcast: Arc<dyn BroadcastSink>,
}

impl FailJob {
    /// Create the action over a job store and broadcast channel
    pub fn new(jobs: Arc<dyn JobRepository>, broadcast: Arc<dyn BroadcastSink>) -> Self {
        Self { jobs, broadcast }
    }
}

impl ActionExecutorBase for FailJob {
    fn action_type(&self) -> &str {
        "fail_job"
    }
}

#[async_trait]
impl ActionExecutor for FailJob {
    async fn execute(&self, api: Arc<dyn ActionRuntimeApi>) -> ActionResult {
        let Some(job_id) = api.job_id().await else {
            return ActionResult::Failure(CoreError::ActionExecutionError(
                "No job_id in context to fail".to_string(),
            ));
        };

        let error_message = match api.get_config("error").await {
            Ok(Value::String(message)) => message,
            _ => "Job failed".to_string(),
        };
        if let Err(e) = self.jobs.fail(&job_id, &error_message).await {
            return ActionResult::Failure(e);
        }

        let _ = self
            .broadcast
            .emit(&BroadcastMessage::job_completed(
                api.machine_name(),
                &job_id,
                false,
            ))
            .await;

        ActionResult::Success(outcome(&api, "outcome", None).await)
    }
}
