use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Envelope delivered on a machine's control channel
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ControlMessage {
    /// Event name dispatched against the machine's current state
    #[serde(rename = "type")]
    pub event_type: String,

    /// Event payload, stored into the machine context
    #[serde(default)]
    pub payload: Value,

    /// Job this event relates to, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
}

impl ControlMessage {
    /// Create a control message with an empty payload
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            payload: Value::Object(serde_json::Map::new()),
            job_id: None,
        }
    }

    /// Attach a payload
    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    /// Attach a job id
    pub fn with_job_id(mut self, job_id: impl Into<String>) -> Self {
        self.job_id = Some(job_id.into());
        self
    }
}

/// Message fanned out on the shared broadcast channel
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BroadcastMessage {
    /// One of the broadcast message types
    #[serde(rename = "type")]
    pub message_type: String,

    /// Originating machine
    pub machine_name: String,

    /// Type-specific payload
    #[serde(default)]
    pub payload: Value,

    /// Epoch seconds at emission
    pub timestamp: i64,
}

impl BroadcastMessage {
    fn new(message_type: &str, machine_name: &str, payload: Value) -> Self {
        Self {
            message_type: message_type.to_string(),
            machine_name: machine_name.to_string(),
            payload,
            timestamp: Utc::now().timestamp(),
        }
    }

    /// A completed state transition
    pub fn state_change(
        machine_name: &str,
        from_state: &str,
        to_state: &str,
        event_trigger: &str,
    ) -> Self {
        Self::new(
            "state_change",
            machine_name,
            json!({
                "from_state": from_state,
                "to_state": to_state,
                "event_trigger": event_trigger,
            }),
        )
    }

    /// Free-form progress visibility
    pub fn activity_log(machine_name: &str, message: &str) -> Self {
        Self::new("activity_log", machine_name, json!({ "message": message }))
    }

    /// A job was claimed
    pub fn job_started(machine_name: &str, job_id: &str, job_type: &str) -> Self {
        Self::new(
            "job_started",
            machine_name,
            json!({ "job_id": job_id, "job_type": job_type }),
        )
    }

    /// A job reached a terminal state
    pub fn job_completed(machine_name: &str, job_id: &str, success: bool) -> Self {
        Self::new(
            "job_completed",
            machine_name,
            json!({ "job_id": job_id, "success": success }),
        )
    }

    /// A caught failure, surfaced to observers
    pub fn error(machine_name: &str, message: &str, detail: Value) -> Self {
        Self::new(
            "error",
            machine_name,
            json!({ "message": message, "detail": detail }),
        )
    }

    /// A machine instance came up
    pub fn machine_registered(machine_name: &str, initial_state: &str) -> Self {
        Self::new(
            "machine_registered",
            machine_name,
            json!({ "initial_state": initial_state }),
        )
    }

    /// A machine instance went away
    pub fn machine_terminated(machine_name: &str, last_state: &str) -> Self {
        Self::new(
            "machine_terminated",
            machine_name,
            json!({ "last_state": last_state }),
        )
    }
}

/// Immutable inter-machine audit record. Write-only; never polled for
/// delivery.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MachineEvent {
    /// Emitting machine
    pub source_machine: String,

    /// Addressed machine
    pub target_machine: String,

    /// Event name
    pub event_type: String,

    /// Related job, if any
    pub job_id: Option<String>,

    /// Event payload
    pub payload: Value,

    /// Delivery status note (`sent`, `received`, `error`)
    pub status: String,

    /// Creation time
    pub created_at: DateTime<Utc>,
}

impl MachineEvent {
    /// Record an event observed by `target_machine`
    pub fn received(target_machine: &str, message: &ControlMessage) -> Self {
        let source = message
            .payload
            .get("source")
            .and_then(Value::as_str)
            .unwrap_or("external")
            .to_string();
        Self {
            source_machine: source,
            target_machine: target_machine.to_string(),
            event_type: message.event_type.clone(),
            job_id: message.job_id.clone(),
            payload: message.payload.clone(),
            status: "received".to_string(),
            created_at: Utc::now(),
        }
    }

    /// Record an event sent from `source_machine`
    pub fn sent(source_machine: &str, target_machine: &str, message: &ControlMessage) -> Self {
        Self {
            source_machine: source_machine.to_string(),
            target_machine: target_machine.to_string(),
            event_type: message.event_type.clone(),
            job_id: message.job_id.clone(),
            payload: message.payload.clone(),
            status: "sent".to_string(),
            created_at: Utc::now(),
        }
    }

    /// Record a caught failure with its job context
    pub fn error(machine_name: &str, detail: &str, job_id: Option<String>) -> Self {
        Self {
            source_machine: machine_name.to_string(),
            target_machine: machine_name.to_string(),
            event_type: "error".to_string(),
            job_id,
            payload: json!({ "detail": detail }),
            status: "error".to_string(),
            created_at: Utc::now(),
        }
    }
}

/// UI-facing realtime buffer row; the relay's fallback source when the
/// broadcast channel is quiet.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RealtimeEvent {
    /// Row id, assigned by the store (0 until persisted)
    #[serde(default)]
    pub id: i64,

    /// Originating machine
    pub machine_name: String,

    /// Broadcast message type
    pub event_type: String,

    /// Broadcast payload
    pub payload: Value,

    /// Creation time
    pub created_at: DateTime<Utc>,

    /// Whether the relay already delivered this row
    pub consumed: bool,
}

impl RealtimeEvent {
    /// Buffer a broadcast message for fallback delivery
    pub fn from_broadcast(message: &BroadcastMessage) -> Self {
        Self {
            id: 0,
            machine_name: message.machine_name.clone(),
            event_type: message.message_type.clone(),
            payload: message.payload.clone(),
            created_at: Utc::now(),
            consumed: false,
        }
    }

    /// Rebuild the broadcast form for relay delivery
    pub fn to_broadcast(&self) -> BroadcastMessage {
        BroadcastMessage {
            message_type: self.event_type.clone(),
            machine_name: self.machine_name.clone(),
            payload: self.payload.clone(),
            timestamp: self.created_at.timestamp(),
        }
    }
}
