//! Peer event delivery

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

use weft_core::{
    ActionExecutor, ActionExecutorBase, ActionResult, ActionRuntimeApi, ControlMessage, CoreError,
    MachineEvent, MachineEventRepository,
};
use weft_transport::ControlSender;

/// Sends an event to a peer machine's control channel
pub struct SendEvent {
    sender: Arc<ControlSender>,
    machine_events: Arc<dyn MachineEventRepository>,
}

impl SendEvent {
    /// Create the action over a control sender and the audit log
    pub fn new(sender: Arc<ControlSender>, machine_events: Arc<dyn MachineEventRepository>) -> Self {
        Self {
            sender,
            machine_events,
        }
    }
}

impl ActionExecutorBase for SendEvent {
    fn action_type(&self) -> &str {
        "send_event"
    }
}

#[async_trait]
impl ActionExecutor for SendEvent {
    async fn execute(&self, api: Arc<dyn ActionRuntimeApi>) -> ActionResult {
        let event = match api.get_config("event").await {
            Ok(Value::String(event)) => event,
            Ok(_) => {
                return ActionResult::Failure(CoreError::ConfigurationError(
                    "event config must be a string".to_string(),
                ))
            }
            Err(e) => return ActionResult::Failure(e),
        };

        let Some(target_port) = api
            .get_config("target_port")
            .await
            .ok()
            .and_then(|v| v.as_u64())
            .and_then(|p| u16::try_from(p).ok())
        else {
            return ActionResult::Failure(CoreError::ConfigurationError(
                "target_port config must be a port number".to_string(),
            ));
        };

        let target_machine = match api.get_config("target_machine").await {
            Ok(Value::String(name)) => name,
            _ => format!("port:{}", target_port),
        };

        let mut payload = match api.get_config("payload").await {
            Ok(Value::Object(map)) => Value::Object(map),
            _ => Value::Object(serde_json::Map::new()),
        };
        // Stamp the sender so the receiver's audit trail has a source.
        if let Value::Object(map) = &mut payload {
            map.insert(
                "source".to_string(),
                Value::String(api.machine_name().to_string()),
            );
        }

        let mut message = ControlMessage::new(event).with_payload(payload);
        if let Some(job_id) = api.job_id().await {
            message = message.with_job_id(job_id);
        }

        if let Err(e) = self.sender.send_to(target_port, &message).await {
            return ActionResult::Failure(e);
        }

        if let Err(e) = self
            .machine_events
            .append(&MachineEvent::sent(
                api.machine_name(),
                &target_machine,
                &message,
            ))
            .await
        {
            // Delivery already happened; an audit miss is logged, not fatal.
            tracing::warn!(error = %e, "Failed to append sent-event audit record");
        }

        ActionResult::done()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::MockApi;
    use serde_json::json;
    use std::time::Duration;
    use weft_core::application::runtime_interface::ControlSource;
    use weft_core::domain::repository::memory::MemoryMachineEventRepository;
    use weft_transport::ControlChannel;

    #[tokio::test]
    async fn event_reaches_peer_and_audit_log() {
        let peer = ControlChannel::bind(0).await.unwrap();
        let sender = Arc::new(ControlSender::new().await.unwrap());
        let audit = Arc::new(MemoryMachineEventRepository::new());

        let api = MockApi::with_config(json!({
            "event": "wake_up",
            "target_port": peer.port(),
            "target_machine": "m2",
            "payload": {"reason": "new work"}
        }));
        api.set_job_id("j-1");

        let action = SendEvent::new(sender, audit.clone());
        let result = action.execute(api.arc()).await;
        assert_eq!(result, ActionResult::done());

        let received = peer
            .recv_timeout(Duration::from_secs(2))
            .await
            .unwrap()
            .expect("delivered");
        assert_eq!(received.event_type, "wake_up");
        assert_eq!(received.payload["reason"], "new work");
        assert_eq!(received.payload["source"], "mock-machine");
        assert_eq!(received.job_id.as_deref(), Some("j-1"));

        let events = audit.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].status, "sent");
        assert_eq!(events[0].target_machine, "m2");
    }

    #[tokio::test]
    async fn missing_target_port_fails() {
        let sender = Arc::new(ControlSender::new().await.unwrap());
        let audit = Arc::new(MemoryMachineEventRepository::new());
        let api = MockApi::with_config(json!({"event": "x"}));

        let action = SendEvent::new(sender, audit);
        let result = action.execute(api.arc()).await;
        assert!(matches!(result, ActionResult::Failure(_)));
    }
}
