//! The machine execution loop
//!
//! One service instance drives one machine: it polls the control
//! channel under a bound, watches timeout deadlines, dispatches events
//! through the transition table, runs entry actions, and converts every
//! failure into observable events instead of unwinding.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::domain::machine::MachineInstance;
use crate::domain::messages::{BroadcastMessage, ControlMessage, MachineEvent, RealtimeEvent};
use crate::domain::repository::{
    MachineEventRepository, MachineStateRepository, RealtimeEventRepository,
};
use crate::domain::workflow::{TimeoutTransition, WorkflowDefinition};
use crate::{ActionFactory, ActionResult, ActionRuntimeApi, ActionSpec, CoreError, LogLevel};

use super::runtime_interface::{BroadcastSink, ControlSource};

/// Tunable execution-loop settings
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Bound for one control-channel poll. Kept sub-second so liveness
    /// duties are serviced between messages.
    pub poll_interval: Duration,

    /// Maximum synchronous outcome dispatches per incoming event.
    /// Guards against cyclic self-triggering configurations.
    pub max_chain_depth: u32,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(200),
            max_chain_depth: 25,
        }
    }
}

/// A pending timeout deadline for the current state
struct ArmedTimeout {
    fires_at: Instant,
    transition: TimeoutTransition,
}

/// Service executing one machine instance
pub struct MachineExecutionService {
    /// The immutable workflow definition
    workflow: WorkflowDefinition,

    /// The machine being driven; mutated only from this service's loop
    machine: Arc<Mutex<MachineInstance>>,

    /// Inbound control channel
    control: Arc<dyn ControlSource>,

    /// Shared outbound broadcast channel
    broadcast: Arc<dyn BroadcastSink>,

    /// Factory for action executors
    action_factory: ActionFactory,

    /// Inter-machine audit log
    machine_events: Arc<dyn MachineEventRepository>,

    /// UI-facing realtime buffer
    realtime_events: Arc<dyn RealtimeEventRepository>,

    /// Observer-facing snapshot cache
    machine_state: Arc<dyn MachineStateRepository>,

    /// Loop tuning
    settings: EngineSettings,
}

impl MachineExecutionService {
    /// Create a new execution service
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        workflow: WorkflowDefinition,
        machine: MachineInstance,
        control: Arc<dyn ControlSource>,
        broadcast: Arc<dyn BroadcastSink>,
        action_factory: ActionFactory,
        machine_events: Arc<dyn MachineEventRepository>,
        realtime_events: Arc<dyn RealtimeEventRepository>,
        machine_state: Arc<dyn MachineStateRepository>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            workflow,
            machine: Arc::new(Mutex::new(machine)),
            control,
            broadcast,
            action_factory,
            machine_events,
            realtime_events,
            machine_state,
            settings,
        }
    }

    /// The driven machine, for inspection
    pub fn machine(&self) -> Arc<Mutex<MachineInstance>> {
        self.machine.clone()
    }

    /// Persist the startup snapshot and announce the machine
    pub async fn announce_startup(&self) -> Result<(), CoreError> {
        let (name, state, snapshot) = {
            let machine = self.machine.lock().await;
            (
                machine.machine_name.clone(),
                machine.current_state.clone(),
                machine.snapshot(),
            )
        };
        self.machine_state.upsert(&snapshot).await?;
        self.emit(BroadcastMessage::machine_registered(&name, &state))
            .await;
        info!(machine = %name, state = %state, "Machine registered");
        Ok(())
    }

    /// Announce shutdown and persist the final snapshot
    pub async fn announce_shutdown(&self) -> Result<(), CoreError> {
        let (name, state, snapshot) = {
            let machine = self.machine.lock().await;
            (
                machine.machine_name.clone(),
                machine.current_state.clone(),
                machine.snapshot(),
            )
        };
        self.emit(BroadcastMessage::machine_terminated(&name, &state))
            .await;
        self.machine_state.upsert(&snapshot).await?;
        info!(machine = %name, state = %state, "Machine terminated");
        Ok(())
    }

    /// Run the execution loop until the task is cancelled.
    ///
    /// No single iteration's failure terminates the loop: errors are
    /// converted to `error` broadcasts and audit records at the point
    /// of origin.
    pub async fn run(&self) -> Result<(), CoreError> {
        self.announce_startup().await?;
        let mut armed = self.arm_timeout().await;

        loop {
            let bound = match &armed {
                Some(timeout) => timeout
                    .fires_at
                    .saturating_duration_since(Instant::now())
                    .min(self.settings.poll_interval)
                    .max(Duration::from_millis(1)),
                None => self.settings.poll_interval,
            };

            match self.control.recv_timeout(bound).await {
                Ok(Some(message)) => {
                    // Any dispatched event cancels the pending deadline.
                    armed = None;
                    if let Err(e) = self.handle_control(&message).await {
                        self.report_failure(
                            &format!("Event {} failed: {}", message.event_type, e),
                            message.job_id.clone(),
                        )
                        .await;
                    }
                    armed = self.arm_timeout().await;
                }
                Ok(None) => {
                    // Empty receive is not an error. Yield before the
                    // retry so sibling duties are never starved.
                    tokio::task::yield_now().await;
                    if let Some(timeout) = &armed {
                        if Instant::now() >= timeout.fires_at {
                            let transition = timeout.transition.clone();
                            armed = None;
                            if let Err(e) = self.fire_timeout(&transition).await {
                                self.report_failure(
                                    &format!("Timeout transition failed: {}", e),
                                    None,
                                )
                                .await;
                            }
                            armed = self.arm_timeout().await;
                        }
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Control channel receive failed");
                    tokio::time::sleep(self.settings.poll_interval).await;
                }
            }
        }
    }

    /// Handle one received control message
    async fn handle_control(&self, message: &ControlMessage) -> Result<(), CoreError> {
        let machine_name = {
            let mut machine = self.machine.lock().await;
            machine
                .context
                .set("last_event", message.payload.clone());
            if let Some(job_id) = &message.job_id {
                machine.context.set("job_id", Value::String(job_id.clone()));
            }
            machine.machine_name.clone()
        };

        // Audit first; a store failure degrades to a warning rather
        // than dropping the event.
        if let Err(e) = self
            .machine_events
            .append(&MachineEvent::received(&machine_name, message))
            .await
        {
            warn!(error = %e, "Failed to append audit record");
        }

        self.dispatch_chain(&message.event_type).await
    }

    /// Fire an elapsed timeout deadline
    async fn fire_timeout(&self, transition: &TimeoutTransition) -> Result<(), CoreError> {
        let state = { self.machine.lock().await.current_state.clone() };
        debug!(state = %state, trigger = %transition.trigger(), "Timeout deadline elapsed");
        self.dispatch_chain(&transition.trigger()).await
    }

    /// Dispatch an event and chase chained outcomes until one has no
    /// further transition, then persist and broadcast the settled state.
    async fn dispatch_chain(&self, trigger: &str) -> Result<(), CoreError> {
        let (machine_name, from_state) = {
            let machine = self.machine.lock().await;
            (machine.machine_name.clone(), machine.current_state.clone())
        };

        let mut current = from_state.clone();
        let mut event = trigger.to_string();
        let mut depth = 0u32;
        let mut transitioned = false;

        loop {
            let Some(target) = self
                .workflow
                .transition_for(&current, &event)
                .map(str::to_string)
            else {
                if !transitioned {
                    // Unmatched event: non-fatal, state unchanged.
                    debug!(
                        machine = %machine_name,
                        state = %current,
                        event = %event,
                        "No transition for event"
                    );
                }
                break;
            };

            transitioned = true;
            {
                let mut machine = self.machine.lock().await;
                machine.current_state = target.clone();
            }

            if depth > 0 {
                self.emit(BroadcastMessage::activity_log(
                    &machine_name,
                    &format!("chained {} -> {} on {}", current, target, event),
                ))
                .await;
            }
            current = target;

            match self.run_entry_actions(&current).await {
                Some(outcome) => {
                    depth += 1;
                    if depth >= self.settings.max_chain_depth {
                        self.report_failure(
                            &format!(
                                "Transition chain exceeded {} dispatches; settling in {}",
                                self.settings.max_chain_depth, current
                            ),
                            None,
                        )
                        .await;
                        break;
                    }
                    event = outcome;
                }
                None => break,
            }
        }

        if transitioned {
            let snapshot = { self.machine.lock().await.snapshot() };
            if let Err(e) = self.machine_state.upsert(&snapshot).await {
                warn!(error = %e, "Failed to persist machine snapshot");
            }
            self.emit(BroadcastMessage::state_change(
                &machine_name,
                &from_state,
                &current,
                trigger,
            ))
            .await;
        }

        Ok(())
    }

    /// Run a state's entry actions in order.
    ///
    /// Returns the last non-`None` outcome. Action failures are caught
    /// here: they produce an `error` broadcast plus an audit record and
    /// end the chain, leaving the machine in the state it had reached.
    async fn run_entry_actions(&self, state_name: &str) -> Option<String> {
        let specs: Vec<ActionSpec> = self
            .workflow
            .state(state_name)
            .map(|s| s.actions.clone())
            .unwrap_or_default();

        let mut last_outcome = None;
        for spec in specs {
            match self.execute_action(&spec).await {
                Ok(Some(outcome)) => last_outcome = Some(outcome),
                Ok(None) => {}
                Err(e) => {
                    let job_id = {
                        let machine = self.machine.lock().await;
                        machine
                            .context
                            .get_path("job_id")
                            .and_then(Value::as_str)
                            .map(String::from)
                    };
                    self.report_failure(&e.to_string(), job_id).await;
                    return None;
                }
            }
        }
        last_outcome
    }

    /// Execute one action with its config interpolated against the
    /// current context
    async fn execute_action(&self, spec: &ActionSpec) -> Result<Option<String>, CoreError> {
        let executor = (self.action_factory)(&spec.action)?;

        let (machine_name, config) = {
            let machine = self.machine.lock().await;
            (
                machine.machine_name.clone(),
                machine.context.interpolate_value(&spec.config),
            )
        };

        debug!(machine = %machine_name, action = %spec.action, "Executing action");

        let api: Arc<dyn ActionRuntimeApi> = Arc::new(ActionInvocation {
            machine_name,
            config,
            machine: self.machine.clone(),
        });

        match executor.execute(api).await {
            ActionResult::Success(outcome) => Ok(outcome),
            ActionResult::Failure(e) => Err(CoreError::ActionExecutionError(format!(
                "{}: {}",
                spec.action, e
            ))),
        }
    }

    /// Convert a caught failure into observable events
    async fn report_failure(&self, detail: &str, job_id: Option<String>) {
        let machine_name = { self.machine.lock().await.machine_name.clone() };
        error!(machine = %machine_name, detail = %detail, "Caught failure");

        self.emit(BroadcastMessage::error(
            &machine_name,
            detail,
            serde_json::json!({ "job_id": job_id }),
        ))
        .await;

        if let Err(e) = self
            .machine_events
            .append(&MachineEvent::error(&machine_name, detail, job_id))
            .await
        {
            warn!(error = %e, "Failed to append error audit record");
        }
    }

    /// Emit a broadcast message and buffer it for fallback delivery.
    /// Best-effort on both paths.
    async fn emit(&self, message: BroadcastMessage) {
        if let Err(e) = self.broadcast.emit(&message).await {
            warn!(error = %e, "Broadcast emit failed");
        }
        if let Err(e) = self
            .realtime_events
            .append(&RealtimeEvent::from_broadcast(&message))
            .await
        {
            warn!(error = %e, "Realtime buffer append failed");
        }
    }

    /// Arm the earliest timeout deadline for the current state, if any
    async fn arm_timeout(&self) -> Option<ArmedTimeout> {
        let machine = self.machine.lock().await;
        let state = self.workflow.state(&machine.current_state)?;
        let transition = state.earliest_timeout()?;
        Some(ArmedTimeout {
            fires_at: Instant::now() + transition.duration(),
            transition,
        })
    }
}

/// Per-execution runtime API handed to actions
struct ActionInvocation {
    machine_name: String,
    config: Value,
    machine: Arc<Mutex<MachineInstance>>,
}

#[async_trait]
impl ActionRuntimeApi for ActionInvocation {
    fn machine_name(&self) -> &str {
        &self.machine_name
    }

    async fn get_config(&self, name: &str) -> Result<Value, CoreError> {
        self.config
            .get(name)
            .cloned()
            .ok_or_else(|| CoreError::ConfigurationError(format!("Config not found: {}", name)))
    }

    async fn context_get(&self, path: &str) -> Option<Value> {
        self.machine.lock().await.context.get_path(path).cloned()
    }

    async fn context_set(&self, key: &str, value: Value) -> Result<(), CoreError> {
        self.machine.lock().await.context.set(key, value);
        Ok(())
    }

    async fn job_id(&self) -> Option<String> {
        self.machine
            .lock()
            .await
            .context
            .get_path("job_id")
            .and_then(Value::as_str)
            .map(String::from)
    }

    async fn log(&self, level: LogLevel, message: &str) -> Result<(), CoreError> {
        match level {
            LogLevel::Debug => debug!(machine = %self.machine_name, "[ACTION] {}", message),
            LogLevel::Info => info!(machine = %self.machine_name, "[ACTION] {}", message),
            LogLevel::Warn => warn!(machine = %self.machine_name, "[ACTION] {}", message),
            LogLevel::Error => error!(machine = %self.machine_name, "[ACTION] {}", message),
        }
        Ok(())
    }
}
