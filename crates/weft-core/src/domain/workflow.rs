use crate::CoreError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Represents a parsed workflow definition.
///
/// Loaded once at engine startup and never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    /// Workflow name
    pub name: String,

    /// The workflow version
    #[serde(default)]
    pub version: Option<String>,

    /// Name of the state a fresh machine starts in
    pub initial_state: String,

    /// All states, keyed by name
    pub states: HashMap<String, StateDefinition>,
}

/// A single state in a workflow
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StateDefinition {
    /// Event name -> target state. Keys of the form `timeout(N)` are
    /// treated as timeout pseudo-events.
    #[serde(default)]
    pub on: HashMap<String, String>,

    /// Timeout-driven transitions out of this state
    #[serde(default)]
    pub timeout_transitions: Vec<TimeoutTransition>,

    /// Entry actions executed, in order, when the state is entered
    #[serde(default)]
    pub actions: Vec<ActionSpec>,

    /// Optional composite-state grouping. Navigation metadata only,
    /// carries no execution semantics.
    #[serde(default)]
    pub group: Option<String>,
}

/// A transition fired when a state has seen no event for `seconds`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutTransition {
    /// Idle seconds before the transition fires
    pub seconds: u64,

    /// Target state
    pub target: String,
}

impl TimeoutTransition {
    /// Duration form of the deadline
    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.seconds)
    }

    /// The pseudo-event name this transition is recorded under
    pub fn trigger(&self) -> String {
        format!("timeout({})", self.seconds)
    }
}

/// An action invocation attached to a state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionSpec {
    /// Registered action name
    pub action: String,

    /// Action configuration; `{path}` placeholders are interpolated
    /// against the machine context before execution
    #[serde(default = "default_config")]
    pub config: serde_json::Value,
}

fn default_config() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

/// Parse a `timeout(N)` pseudo-event key
fn parse_timeout_event(event: &str) -> Option<u64> {
    let inner = event.strip_prefix("timeout(")?.strip_suffix(')')?;
    inner.trim().parse().ok()
}

impl StateDefinition {
    /// All timeout transitions out of this state, merging the
    /// `timeout_transitions` list with any `timeout(N)` keys in `on`.
    pub fn timeouts(&self) -> Vec<TimeoutTransition> {
        let mut out = self.timeout_transitions.clone();
        for (event, target) in &self.on {
            if let Some(seconds) = parse_timeout_event(event) {
                out.push(TimeoutTransition {
                    seconds,
                    target: target.clone(),
                });
            }
        }
        out
    }

    /// When several timeouts are declared they race; the earliest wins.
    pub fn earliest_timeout(&self) -> Option<TimeoutTransition> {
        self.timeouts().into_iter().min_by_key(|t| t.seconds)
    }
}

impl WorkflowDefinition {
    /// Look up the target state for `(state, event)`.
    ///
    /// Returns `None` for unknown states and unmatched events alike;
    /// the caller decides how loudly to report that.
    pub fn transition_for(&self, state: &str, event: &str) -> Option<&str> {
        let definition = self.states.get(state)?;
        if let Some(target) = definition.on.get(event) {
            return Some(target.as_str());
        }
        // A synthesized timeout event may reference a transition declared
        // in the timeout_transitions list rather than in `on`.
        if let Some(seconds) = parse_timeout_event(event) {
            return definition
                .timeout_transitions
                .iter()
                .find(|t| t.seconds == seconds)
                .map(|t| t.target.as_str());
        }
        None
    }

    /// Borrow a state definition by name
    pub fn state(&self, name: &str) -> Option<&StateDefinition> {
        self.states.get(name)
    }

    /// Validate the workflow definition
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.states.is_empty() {
            return Err(CoreError::ValidationError(
                "Workflow must have at least one state".to_string(),
            ));
        }

        if !self.states.contains_key(&self.initial_state) {
            return Err(CoreError::ValidationError(format!(
                "Initial state does not exist: {}",
                self.initial_state
            )));
        }

        for (name, state) in &self.states {
            for (event, target) in &state.on {
                if !self.states.contains_key(target) {
                    return Err(CoreError::ValidationError(format!(
                        "State {} transition {} references non-existent target: {}",
                        name, event, target
                    )));
                }
            }
            for timeout in &state.timeout_transitions {
                if !self.states.contains_key(&timeout.target) {
                    return Err(CoreError::ValidationError(format!(
                        "State {} timeout({}) references non-existent target: {}",
                        name, timeout.seconds, timeout.target
                    )));
                }
            }
        }

        Ok(())
    }
}
