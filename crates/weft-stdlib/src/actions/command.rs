//! External command execution
//!
//! The one action with a hard liveness contract: the subprocess wait is
//! bounded, and an expired bound terminates the child (SIGTERM, then
//! SIGKILL after a grace window) instead of abandoning it.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tracing::warn;

use weft_core::{
    ActionExecutor, ActionExecutorBase, ActionResult, ActionRuntimeApi, CoreError, LogLevel,
};

/// Default wall-clock bound for the child process
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Default window between SIGTERM and SIGKILL
const DEFAULT_GRACE_SECS: u64 = 2;

/// Longest stdout tail stored into the context
const MAX_CAPTURED_STDOUT: usize = 16 * 1024;

/// Runs an external command under a mandatory timeout
#[derive(Debug, Default)]
pub struct RunCommand;

impl ActionExecutorBase for RunCommand {
    fn action_type(&self) -> &str {
        "run_command"
    }
}

fn config_u64(config: Result<Value, CoreError>, default: u64) -> u64 {
    config.ok().and_then(|v| v.as_u64()).unwrap_or(default)
}

async fn outcome_name(
    api: &Arc<dyn ActionRuntimeApi>,
    key: &str,
    default: &str,
) -> Option<String> {
    match api.get_config(key).await {
        Ok(Value::String(event)) => Some(event),
        Ok(Value::Null) => None,
        _ => Some(default.to_string()),
    }
}

/// Ask the child to exit. SIGTERM where available, immediate kill
/// signal elsewhere.
fn terminate(child: &Child) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        if let Some(pid) = child.id() {
            if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                warn!(pid, error = %e, "Failed to send SIGTERM to child");
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = child;
    }
}

#[async_trait]
impl ActionExecutor for RunCommand {
    async fn execute(&self, api: Arc<dyn ActionRuntimeApi>) -> ActionResult {
        let command = match api.get_config("command").await {
            Ok(Value::String(command)) => command,
            Ok(_) => {
                return ActionResult::Failure(CoreError::ConfigurationError(
                    "command config must be a string".to_string(),
                ))
            }
            Err(e) => return ActionResult::Failure(e),
        };

        let args: Vec<String> = match api.get_config("args").await {
            Ok(Value::Array(items)) => items
                .into_iter()
                .map(|v| match v {
                    Value::String(s) => s,
                    other => other.to_string(),
                })
                .collect(),
            _ => Vec::new(),
        };

        let timeout = Duration::from_secs(config_u64(
            api.get_config("timeout").await,
            DEFAULT_TIMEOUT_SECS,
        ));
        let grace = Duration::from_secs(config_u64(
            api.get_config("grace").await,
            DEFAULT_GRACE_SECS,
        ));

        let mut child = match Command::new(&command)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                return ActionResult::Failure(CoreError::ActionExecutionError(format!(
                    "Failed to spawn {}: {}",
                    command, e
                )))
            }
        };

        // Drain stdout concurrently so a chatty child never fills the
        // pipe and stalls against the wait below.
        let stdout = child.stdout.take();
        let reader = tokio::spawn(async move {
            let mut buf = Vec::new();
            if let Some(mut out) = stdout {
                let _ = out.read_to_end(&mut buf).await;
            }
            buf
        });

        match tokio::time::timeout(timeout, child.wait()).await {
            Ok(Ok(status)) => {
                let captured = reader.await.unwrap_or_default();
                let mut stdout_tail = String::from_utf8_lossy(&captured).into_owned();
                if stdout_tail.len() > MAX_CAPTURED_STDOUT {
                    stdout_tail.truncate(MAX_CAPTURED_STDOUT);
                }

                if let Err(e) = api
                    .context_set(
                        "command_result",
                        json!({
                            "command": command,
                            "exit_code": status.code(),
                            "success": status.success(),
                            "stdout": stdout_tail,
                        }),
                    )
                    .await
                {
                    return ActionResult::Failure(e);
                }

                let outcome = if status.success() {
                    outcome_name(&api, "outcome_success", "command_succeeded").await
                } else {
                    outcome_name(&api, "outcome_failure", "command_failed").await
                };
                ActionResult::Success(outcome)
            }
            Ok(Err(e)) => {
                reader.abort();
                ActionResult::Failure(CoreError::ActionExecutionError(format!(
                    "Wait for {} failed: {}",
                    command, e
                )))
            }
            Err(_) => {
                // Bound expired. Never abandon the child: terminate,
                // give it the grace window, then kill and reap.
                let _ = api
                    .log(
                        LogLevel::Warn,
                        &format!("Command {} exceeded {:?}, terminating", command, timeout),
                    )
                    .await;
                terminate(&child);
                if tokio::time::timeout(grace, child.wait()).await.is_err() {
                    if let Err(e) = child.kill().await {
                        warn!(error = %e, "Failed to kill timed-out child");
                    }
                }
                reader.abort();

                if let Err(e) = api
                    .context_set(
                        "command_result",
                        json!({
                            "command": command,
                            "timed_out": true,
                            "timeout_secs": timeout.as_secs(),
                        }),
                    )
                    .await
                {
                    return ActionResult::Failure(e);
                }

                ActionResult::Success(outcome_name(&api, "outcome_timeout", "command_timeout").await)
            }
        }
    }
}
