//!
//! Weft Stdlib - standard library of actions for the Weft platform
//!
//! Built-in actions, the action registry, and one-time discovery of
//! external action definitions.

use std::sync::Arc;

use weft_core::application::runtime_interface::BroadcastSink;
use weft_core::{JobRepository, MachineEventRepository};
use weft_transport::ControlSender;

pub mod actions;
pub mod discovery;
pub mod registry;

pub use discovery::load_external_dir;
pub use registry::ActionRegistry;

/// Shared services the job and event actions are built over
pub struct ActionServices {
    /// Job store
    pub jobs: Arc<dyn JobRepository>,

    /// Inter-machine audit log
    pub machine_events: Arc<dyn MachineEventRepository>,

    /// Shared broadcast channel
    pub broadcast: Arc<dyn BroadcastSink>,

    /// Point-to-point sender for peer control channels
    pub control_sender: Arc<ControlSender>,
}

/// Build a registry holding every built-in action
pub fn builtin_registry(services: ActionServices) -> ActionRegistry {
    let mut registry = ActionRegistry::new();

    registry.register(Arc::new(actions::NoOp));
    registry.register(Arc::new(actions::LogMessage));
    registry.register(Arc::new(actions::SetContext));
    registry.register(Arc::new(actions::RunCommand));
    registry.register(Arc::new(actions::HttpCall::new()));
    registry.register(Arc::new(actions::SendEvent::new(
        services.control_sender.clone(),
        services.machine_events.clone(),
    )));
    registry.register(Arc::new(actions::ClaimJob::new(
        services.jobs.clone(),
        services.broadcast.clone(),
    )));
    registry.register(Arc::new(actions::CompleteJob::new(
        services.jobs.clone(),
        services.broadcast.clone(),
    )));
    registry.register(Arc::new(actions::FailJob::new(
        services.jobs,
        services.broadcast,
    )));

    registry
}


#[cfg(test)]
mod tests {
    use super::*;
    use weft_core::application::runtime_interface::channel::CollectingBroadcastSink;
    use weft_core::domain::repository::memory::{
        MemoryJobRepository, MemoryMachineEventRepository,
    };

    #[tokio::test]
    async fn builtin_registry_holds_every_action() {
        let services = ActionServices {
            jobs: Arc::new(MemoryJobRepository::new()),
            machine_events: Arc::new(MemoryMachineEventRepository::new()),
            broadcast: Arc::new(CollectingBroadcastSink::new()),
            control_sender: Arc::new(ControlSender::new().await.unwrap()),
        };
        let registry = builtin_registry(services);
        assert_eq!(
            registry.names(),
            vec![
                "claim_job",
                "complete_job",
                "fail_job",
                "http_call",
                "log_message",
                "no_op",
                "run_command",
                "send_event",
                "set_context",
            ]
        );
    }
}
