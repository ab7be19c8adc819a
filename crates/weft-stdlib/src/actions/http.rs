//! HTTP request action

use async_trait::async_trait;
use reqwest::{Client, Method};
use serde_json::{json, Value};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use weft_core::{
    ActionExecutor, ActionExecutorBase, ActionResult, ActionRuntimeApi, CoreError, LogLevel,
};

/// Makes an HTTP request and stores the response in the context
#[derive(Debug)]
pub struct HttpCall {
    client: Client,
}

impl HttpCall {
    /// Create the action with bounded request timeouts
    pub fn new() -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(30))
                .connect_timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
        }
    }
}

impl Default for HttpCall {
    fn default() -> Self {
        Self::new()
    }
}

impl ActionExecutorBase for HttpCall {
    fn action_type(&self) -> &str {
        "http_call"
    }
}

#[async_trait]
impl ActionExecutor for HttpCall {
    async fn execute(&self, api: Arc<dyn ActionRuntimeApi>) -> ActionResult {
        let url = match api.get_config("url").await {
            Ok(Value::String(url)) => url,
            Ok(_) => {
                return ActionResult::Failure(CoreError::ConfigurationError(
                    "url config must be a string".to_string(),
                ))
            }
            Err(e) => return ActionResult::Failure(e),
        };

        let method_str = match api.get_config("method").await {
            Ok(Value::String(m)) => m.to_uppercase(),
            _ => "GET".to_string(),
        };
        let method = match Method::from_str(&method_str) {
            Ok(method) => method,
            Err(_) => {
                return ActionResult::Failure(CoreError::ConfigurationError(format!(
                    "Invalid HTTP method: {}",
                    method_str
                )))
            }
        };

        let mut request = self.client.request(method.clone(), &url);

        if let Ok(Value::Object(headers)) = api.get_config("headers").await {
            for (key, value) in headers {
                if let Value::String(value) = value {
                    request = request.header(key, value);
                }
            }
        }

        if method != Method::GET && method != Method::HEAD {
            if let Ok(body) = api.get_config("body").await {
                request = request.json(&body);
            }
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                let _ = api
                    .log(LogLevel::Warn, &format!("HTTP request to {} failed: {}", url, e))
                    .await;
                if let Err(set_err) = api
                    .context_set("http_response", json!({ "error": e.to_string() }))
                    .await
                {
                    return ActionResult::Failure(set_err);
                }
                return ActionResult::Success(outcome(&api, "on_error").await);
            }
        };

        let status = response.status().as_u16();
        let body: Value = match response.text().await {
            Ok(text) => serde_json::from_str(&text).unwrap_or(Value::String(text)),
            Err(_) => Value::Null,
        };

        if let Err(e) = api
            .context_set("http_response", json!({ "status": status, "body": body }))
            .await
        {
            return ActionResult::Failure(e);
        }

        let key = if (200..300).contains(&status) {
            "on_success"
        } else {
            "on_error"
        };
        ActionResult::Success(outcome(&api, key).await)
    }
}

async fn outcome(api: &Arc<dyn ActionRuntimeApi>, key: &str) -> Option<String> {
    match api.get_config(key).await {
        Ok(Value::String(event)) => Some(event),
        _ => None,
    }
}
