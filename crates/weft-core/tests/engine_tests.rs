//! Execution-loop integration tests using the in-memory repositories
//! and channel-backed transport ports.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use weft_core::application::runtime_interface::channel::{
    ChannelControlSource, CollectingBroadcastSink,
};
use weft_core::domain::repository::memory::{
    MemoryMachineEventRepository, MemoryMachineStateRepository, MemoryRealtimeEventRepository,
};
use weft_core::{
    ActionExecutor, ActionExecutorBase, ActionResult, ActionRuntimeApi, ActionSpec, ControlMessage,
    CoreError, EngineSettings, MachineExecutionService, MachineInstance, MachineStateRepository,
    StateDefinition, TimeoutTransition, WorkflowDefinition,
};

/// Test action: stores its `note` config (if any) into the context and
/// returns its `outcome` config (if any) as the outcome event.
struct ScriptedAction;

impl ActionExecutorBase for ScriptedAction {
    fn action_type(&self) -> &str {
        "scripted"
    }
}

#[async_trait]
impl ActionExecutor for ScriptedAction {
    async fn execute(&self, api: Arc<dyn ActionRuntimeApi>) -> ActionResult {
        if let Ok(note) = api.get_config("note").await {
            if let Err(e) = api.context_set("note", note).await {
                return ActionResult::Failure(e);
            }
        }
        match api.get_config("outcome").await {
            Ok(Value::String(event)) => ActionResult::outcome(event),
            _ => ActionResult::done(),
        }
    }
}

/// Test action that always fails
struct FailingAction;

impl ActionExecutorBase for FailingAction {
    fn action_type(&self) -> &str {
        "failing"
    }
}

#[async_trait]
impl ActionExecutor for FailingAction {
    async fn execute(&self, _api: Arc<dyn ActionRuntimeApi>) -> ActionResult {
        ActionResult::Failure(CoreError::ActionExecutionError("boom".to_string()))
    }
}

struct Harness {
    control_tx: mpsc::Sender<ControlMessage>,
    broadcast: Arc<CollectingBroadcastSink>,
    machine_state: Arc<MemoryMachineStateRepository>,
    machine_events: Arc<MemoryMachineEventRepository>,
    service: Arc<MachineExecutionService>,
    task: tokio::task::JoinHandle<()>,
}

impl Harness {
    fn start(workflow: WorkflowDefinition) -> Self {
        let (control_tx, control) = ChannelControlSource::new();
        let broadcast = Arc::new(CollectingBroadcastSink::new());
        let machine_state = Arc::new(MemoryMachineStateRepository::new());
        let machine_events = Arc::new(MemoryMachineEventRepository::new());
        let realtime = Arc::new(MemoryRealtimeEventRepository::new());

        let machine = MachineInstance::new("m1", workflow.initial_state.clone());
        let factory: weft_core::ActionFactory = Arc::new(|name: &str| match name {
            "scripted" => Ok(Arc::new(ScriptedAction) as Arc<dyn ActionExecutor>),
            "failing" => Ok(Arc::new(FailingAction) as Arc<dyn ActionExecutor>),
            other => Err(CoreError::ActionNotFound(other.to_string())),
        });

        let service = Arc::new(MachineExecutionService::new(
            workflow,
            machine,
            Arc::new(control),
            broadcast.clone(),
            factory,
            machine_events.clone(),
            realtime,
            machine_state.clone(),
            EngineSettings {
                poll_interval: Duration::from_millis(50),
                max_chain_depth: 25,
            },
        ));

        let runner = service.clone();
        let task = tokio::spawn(async move {
            let _ = runner.run().await;
        });

        Self {
            control_tx,
            broadcast,
            machine_state,
            machine_events,
            service,
            task,
        }
    }

    async fn send(&self, message: ControlMessage) {
        self.control_tx.send(message).await.expect("send control");
    }

    async fn current_state(&self) -> String {
        self.service.machine().lock().await.current_state.clone()
    }

    async fn wait_until<F>(&self, mut condition: F)
    where
        F: FnMut(&Harness) -> bool,
    {
        for _ in 0..200 {
            if condition(self) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("condition never became true");
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn state(on: &[(&str, &str)], actions: Vec<ActionSpec>) -> StateDefinition {
    StateDefinition {
        on: on
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
        timeout_transitions: Vec::new(),
        actions,
        group: None,
    }
}

fn workflow(initial: &str, states: Vec<(&str, StateDefinition)>) -> WorkflowDefinition {
    let workflow = WorkflowDefinition {
        name: "test".to_string(),
        version: None,
        initial_state: initial.to_string(),
        states: states
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect::<HashMap<_, _>>(),
    };
    workflow.validate().expect("valid workflow");
    workflow
}

#[tokio::test(start_paused = true)]
async fn job_cycle_produces_two_state_changes() {
    // waiting -[new_job]-> processing -[job_done]-> waiting
    let harness = Harness::start(workflow(
        "waiting",
        vec![
            ("waiting", state(&[("new_job", "processing")], vec![])),
            ("processing", state(&[("job_done", "waiting")], vec![])),
        ],
    ));

    harness.send(ControlMessage::new("new_job")).await;
    harness
        .wait_until(|h| h.broadcast.of_type("state_change").len() == 1)
        .await;
    assert_eq!(harness.current_state().await, "processing");

    harness.send(ControlMessage::new("job_done")).await;
    harness
        .wait_until(|h| h.broadcast.of_type("state_change").len() == 2)
        .await;
    assert_eq!(harness.current_state().await, "waiting");

    let changes = harness.broadcast.of_type("state_change");
    assert_eq!(changes[0].payload["from_state"], "waiting");
    assert_eq!(changes[0].payload["to_state"], "processing");
    assert_eq!(changes[0].payload["event_trigger"], "new_job");
    assert_eq!(changes[1].payload["from_state"], "processing");
    assert_eq!(changes[1].payload["to_state"], "waiting");
}

#[tokio::test(start_paused = true)]
async fn timeout_auto_transitions_without_input() {
    // waiting -[timeout(2)]-> timed_out
    let mut waiting = state(&[], vec![]);
    waiting.timeout_transitions.push(TimeoutTransition {
        seconds: 2,
        target: "timed_out".to_string(),
    });
    let harness = Harness::start(workflow(
        "waiting",
        vec![("waiting", waiting), ("timed_out", state(&[], vec![]))],
    ));

    harness
        .wait_until(|h| !h.broadcast.of_type("machine_registered").is_empty())
        .await;

    tokio::time::sleep(Duration::from_secs(3)).await;
    harness
        .wait_until(|h| !h.broadcast.of_type("state_change").is_empty())
        .await;

    assert_eq!(harness.current_state().await, "timed_out");
    let changes = harness.broadcast.of_type("state_change");
    assert_eq!(changes[0].payload["event_trigger"], "timeout(2)");
}

#[tokio::test(start_paused = true)]
async fn event_cancels_pending_timeout() {
    let mut waiting = state(&[("go", "done")], vec![]);
    waiting.timeout_transitions.push(TimeoutTransition {
        seconds: 5,
        target: "timed_out".to_string(),
    });
    let harness = Harness::start(workflow(
        "waiting",
        vec![
            ("waiting", waiting),
            ("done", state(&[], vec![])),
            ("timed_out", state(&[], vec![])),
        ],
    ));

    tokio::time::sleep(Duration::from_secs(3)).await;
    harness.send(ControlMessage::new("go")).await;
    harness
        .wait_until(|h| !h.broadcast.of_type("state_change").is_empty())
        .await;

    assert_eq!(harness.current_state().await, "done");
    // The five-second deadline must not fire later.
    tokio::time::sleep(Duration::from_secs(6)).await;
    assert_eq!(harness.current_state().await, "done");
    assert_eq!(harness.broadcast.of_type("state_change").len(), 1);
}

#[tokio::test(start_paused = true)]
async fn unmatched_event_leaves_state_and_store_untouched() {
    let harness = Harness::start(workflow(
        "waiting",
        vec![
            ("waiting", state(&[("new_job", "processing")], vec![])),
            ("processing", state(&[], vec![])),
        ],
    ));

    harness
        .wait_until(|h| !h.broadcast.of_type("machine_registered").is_empty())
        .await;
    let snapshots_before = harness.machine_state.list().await.unwrap();

    harness.send(ControlMessage::new("nonsense")).await;
    tokio::time::sleep(Duration::from_millis(500)).await;

    assert_eq!(harness.current_state().await, "waiting");
    assert!(harness.broadcast.of_type("state_change").is_empty());
    // Only the startup snapshot exists, unchanged.
    let snapshots_after = harness.machine_state.list().await.unwrap();
    assert_eq!(snapshots_after.len(), 1);
    assert_eq!(
        snapshots_after[0].current_state,
        snapshots_before[0].current_state
    );
}

#[tokio::test(start_paused = true)]
async fn action_outcomes_chain_within_one_event() {
    // a -[go]-> b, whose action yields "next", chaining into c.
    let b = state(
        &[("next", "c")],
        vec![ActionSpec {
            action: "scripted".to_string(),
            config: json!({"outcome": "next"}),
        }],
    );
    let harness = Harness::start(workflow(
        "a",
        vec![
            ("a", state(&[("go", "b")], vec![])),
            ("b", b),
            ("c", state(&[], vec![])),
        ],
    ));

    harness.send(ControlMessage::new("go")).await;
    harness
        .wait_until(|h| !h.broadcast.of_type("state_change").is_empty())
        .await;

    assert_eq!(harness.current_state().await, "c");
    // One settled state change for the whole chain, plus an
    // activity_log hop marker.
    let changes = harness.broadcast.of_type("state_change");
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].payload["from_state"], "a");
    assert_eq!(changes[0].payload["to_state"], "c");
    assert_eq!(changes[0].payload["event_trigger"], "go");
    assert!(!harness.broadcast.of_type("activity_log").is_empty());
}

#[tokio::test(start_paused = true)]
async fn cyclic_chain_is_cut_at_depth_cap() {
    // ping and pong endlessly re-trigger each other.
    let ping = state(
        &[("spin", "pong")],
        vec![ActionSpec {
            action: "scripted".to_string(),
            config: json!({"outcome": "spin"}),
        }],
    );
    let pong = state(
        &[("spin", "ping")],
        vec![ActionSpec {
            action: "scripted".to_string(),
            config: json!({"outcome": "spin"}),
        }],
    );
    let harness = Harness::start(workflow(
        "start",
        vec![
            ("start", state(&[("go", "ping")], vec![])),
            ("ping", ping),
            ("pong", pong),
        ],
    ));

    harness.send(ControlMessage::new("go")).await;
    harness
        .wait_until(|h| !h.broadcast.of_type("error").is_empty())
        .await;

    // The loop survives and still answers later events.
    harness
        .wait_until(|h| !h.broadcast.of_type("state_change").is_empty())
        .await;
    let errors = harness.broadcast.of_type("error");
    assert!(errors[0].payload["message"]
        .as_str()
        .unwrap()
        .contains("chain"));
}

#[tokio::test(start_paused = true)]
async fn action_config_is_interpolated_against_context() {
    // The first event parks its payload in the context; the second
    // state's action sees `{last_event.job}` resolved.
    let working = state(
        &[],
        vec![ActionSpec {
            action: "scripted".to_string(),
            config: json!({"note": "job={last_event.job} missing={nope}"}),
        }],
    );
    let harness = Harness::start(workflow(
        "idle",
        vec![("idle", state(&[("work", "working")], vec![])), ("working", working)],
    ));

    harness
        .send(ControlMessage::new("work").with_payload(json!({"job": "j-7"})))
        .await;
    harness
        .wait_until(|h| !h.broadcast.of_type("state_change").is_empty())
        .await;

    let machine = harness.service.machine();
    let machine = machine.lock().await;
    assert_eq!(
        machine.context.get_path("note"),
        Some(&json!("job=j-7 missing={nope}"))
    );
}

#[tokio::test(start_paused = true)]
async fn action_failure_becomes_error_broadcast_and_audit() {
    let broken = state(
        &[],
        vec![ActionSpec {
            action: "failing".to_string(),
            config: json!({}),
        }],
    );
    let harness = Harness::start(workflow(
        "idle",
        vec![("idle", state(&[("go", "broken")], vec![])), ("broken", broken)],
    ));

    harness.send(ControlMessage::new("go")).await;
    harness
        .wait_until(|h| !h.broadcast.of_type("error").is_empty())
        .await;

    // The transition itself still settles and is announced.
    harness
        .wait_until(|h| !h.broadcast.of_type("state_change").is_empty())
        .await;
    assert_eq!(harness.current_state().await, "broken");

    let audit = harness.machine_events.events();
    assert!(audit.iter().any(|e| e.status == "error"));
}

#[tokio::test(start_paused = true)]
async fn action_not_found_is_non_fatal() {
    let broken = state(
        &[("recover", "idle")],
        vec![ActionSpec {
            action: "no_such_action".to_string(),
            config: json!({}),
        }],
    );
    let harness = Harness::start(workflow(
        "idle",
        vec![("idle", state(&[("go", "broken")], vec![])), ("broken", broken)],
    ));

    harness.send(ControlMessage::new("go")).await;
    harness
        .wait_until(|h| !h.broadcast.of_type("error").is_empty())
        .await;

    // Loop still alive: the machine answers the recovery event.
    harness.send(ControlMessage::new("recover")).await;
    harness
        .wait_until(|h| h.broadcast.of_type("state_change").len() == 2)
        .await;
    assert_eq!(harness.current_state().await, "idle");
}

#[tokio::test(start_paused = true)]
async fn control_job_id_lands_in_context() {
    let harness = Harness::start(workflow(
        "idle",
        vec![
            ("idle", state(&[("claim", "busy")], vec![])),
            ("busy", state(&[], vec![])),
        ],
    ));

    harness
        .send(ControlMessage::new("claim").with_job_id("j-42"))
        .await;
    harness
        .wait_until(|h| !h.broadcast.of_type("state_change").is_empty())
        .await;

    let machine = harness.service.machine();
    let machine = machine.lock().await;
    assert_eq!(machine.context.get_path("job_id"), Some(&json!("j-42")));
}
