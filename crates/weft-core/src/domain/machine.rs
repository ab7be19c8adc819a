use crate::types::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Aggregate: one running state machine.
///
/// Mutated only by its own execution loop; everything observers see is
/// derived from the persisted [`MachineSnapshot`] and broadcast traffic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MachineInstance {
    /// Unique machine name (identity on the control channel)
    pub machine_name: String,

    /// Machine type used for job claiming
    pub machine_type: Option<String>,

    /// Name of the current state
    pub current_state: String,

    /// Mutable key-value state visible to every action
    pub context: Context,

    /// OS process id, when known
    pub pid: Option<u32>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

impl MachineInstance {
    /// Create a new machine instance positioned at the given initial state
    pub fn new(machine_name: impl Into<String>, initial_state: impl Into<String>) -> Self {
        Self {
            machine_name: machine_name.into(),
            machine_type: None,
            current_state: initial_state.into(),
            context: Context::new(),
            pid: std::process::id().into(),
            created_at: Utc::now(),
        }
    }

    /// Set the machine type used when claiming jobs
    pub fn with_machine_type(mut self, machine_type: impl Into<String>) -> Self {
        self.machine_type = Some(machine_type.into());
        self
    }

    /// The observer-facing snapshot of this instance.
    ///
    /// A cache for new observers, not the source of truth.
    pub fn snapshot(&self) -> MachineSnapshot {
        MachineSnapshot {
            machine_name: self.machine_name.clone(),
            current_state: self.current_state.clone(),
            last_activity: Utc::now(),
            pid: self.pid,
            metadata: serde_json::json!({
                "machine_type": self.machine_type,
                "context_keys": self.context.as_map().keys().collect::<Vec<_>>(),
            }),
        }
    }
}

/// Persisted per-machine state row, written on every transition
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MachineSnapshot {
    /// Machine name (primary key)
    pub machine_name: String,

    /// Current state name
    pub current_state: String,

    /// When the machine last did anything
    pub last_activity: DateTime<Utc>,

    /// OS process id, when known
    pub pid: Option<u32>,

    /// Free-form metadata
    pub metadata: serde_json::Value,
}
