//! Small context and logging actions

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

use weft_core::{
    ActionExecutor, ActionExecutorBase, ActionResult, ActionRuntimeApi, CoreError, LogLevel,
};

/// Does nothing; useful as a transition placeholder
#[derive(Debug, Default)]
pub struct NoOp;

impl ActionExecutorBase for NoOp {
    fn action_type(&self) -> &str {
        "no_op"
    }
}

#[async_trait]
impl ActionExecutor for NoOp {
    async fn execute(&self, _api: Arc<dyn ActionRuntimeApi>) -> ActionResult {
        ActionResult::done()
    }
}

/// Logs a configured message through the machine's logger
#[derive(Debug, Default)]
pub struct LogMessage;

impl ActionExecutorBase for LogMessage {
    fn action_type(&self) -> &str {
        "log_message"
    }
}

#[async_trait]
impl ActionExecutor for LogMessage {
    async fn execute(&self, api: Arc<dyn ActionRuntimeApi>) -> ActionResult {
        let message = match api.get_config("message").await {
            Ok(Value::String(message)) => message,
            Ok(other) => other.to_string(),
            Err(e) => return ActionResult::Failure(e),
        };

        let level = match api.get_config("level").await {
            Ok(Value::String(level)) => match level.as_str() {
                "debug" => LogLevel::Debug,
                "warn" => LogLevel::Warn,
                "error" => LogLevel::Error,
                _ => LogLevel::Info,
            },
            _ => LogLevel::Info,
        };

        if let Err(e) = api.log(level, &message).await {
            return ActionResult::Failure(e);
        }
        ActionResult::done()
    }
}

/// Writes a configured value into the machine context
#[derive(Debug, Default)]
pub struct SetContext;

impl ActionExecutorBase for SetContext {
    fn action_type(&self) -> &str {
        "set_context"
    }
}

#[async_trait]
impl ActionExecutor for SetContext {
    async fn execute(&self, api: Arc<dyn ActionRuntimeApi>) -> ActionResult {
        let key = match api.get_config("key").await {
            Ok(Value::String(key)) => key,
            Ok(_) => {
                return ActionResult::Failure(CoreError::ConfigurationError(
                    "key config must be a string".to_string(),
                ))
            }
            Err(e) => return ActionResult::Failure(e),
        };

        let value = match api.get_config("value").await {
            Ok(value) => value,
            Err(e) => return ActionResult::Failure(e),
        };

        if let Err(e) = api.context_set(&key, value).await {
            return ActionResult::Failure(e);
        }
        ActionResult::done()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::MockApi;
    use serde_json::json;

    #[tokio::test]
    async fn no_op_succeeds_without_outcome() {
        let api = MockApi::with_config(json!({}));
        let result = NoOp.execute(api.arc()).await;
        assert_eq!(result, ActionResult::done());
    }

    #[tokio::test]
    async fn log_message_requires_message_config() {
        let api = MockApi::with_config(json!({}));
        let result = LogMessage.execute(api.arc()).await;
        assert!(matches!(result, ActionResult::Failure(_)));

        let api = MockApi::with_config(json!({"message": "hello", "level": "warn"}));
        let result = LogMessage.execute(api.arc()).await;
        assert_eq!(result, ActionResult::done());
        assert_eq!(api.logged(), vec![(LogLevel::Warn, "hello".to_string())]);
    }

    #[tokio::test]
    async fn set_context_writes_value() {
        let api = MockApi::with_config(json!({"key": "job_id", "value": "j-9"}));
        let result = SetContext.execute(api.arc()).await;
        assert_eq!(result, ActionResult::done());
        assert_eq!(api.context_value("job_id"), Some(json!("j-9")));
    }

    #[tokio::test]
    async fn set_context_rejects_non_string_key() {
        let api = MockApi::with_config(json!({"key": 7, "value": "x"}));
        let result = SetContext.execute(api.arc()).await;
        assert!(matches!(result, ActionResult::Failure(_)));
    }
}
