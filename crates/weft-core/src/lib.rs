//!
//! Weft Core - Core runtime for the Weft platform
//!
//! This crate defines the domain model, the action contract, and the
//! machine execution service. It is the foundation for all other crates
//! in the platform.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

/// Domain layer - core entities and persistence seams
pub mod domain;

/// Application services - the machine execution loop
pub mod application;

/// Core value types
pub mod types;

/// Error types
pub mod error;

// Re-export key types
pub use error::CoreError;
pub use types::Context;

pub use domain::job::{Job, JobStatus};
pub use domain::machine::{MachineInstance, MachineSnapshot};
pub use domain::messages::{BroadcastMessage, ControlMessage, MachineEvent, RealtimeEvent};
pub use domain::repository::{
    JobRepository, MachineEventRepository, MachineStateRepository, RealtimeEventRepository,
};
pub use domain::workflow::{ActionSpec, StateDefinition, TimeoutTransition, WorkflowDefinition};

pub use application::machine_execution_service::{EngineSettings, MachineExecutionService};
pub use application::runtime_interface::{BroadcastSink, ControlSource};

/// Log level for action logging
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Debug information
    Debug,
    /// General information
    Info,
    /// Warnings
    Warn,
    /// Errors
    Error,
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
        }
    }
}

/// Result of one action execution
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionResult {
    /// The action completed; an optional outcome event drives the next
    /// transition
    Success(Option<String>),
    /// The action failed
    Failure(CoreError),
}

impl ActionResult {
    /// Success with no outcome event
    pub fn done() -> Self {
        ActionResult::Success(None)
    }

    /// Success with an outcome event
    pub fn outcome(event: impl Into<String>) -> Self {
        ActionResult::Success(Some(event.into()))
    }
}

/// Non-async base trait for actions; object-safe marker carrying the
/// registered name
pub trait ActionExecutorBase: Send + Sync {
    /// The action name this executor answers to
    fn action_type(&self) -> &str;
}

/// A named behavior unit invoked on state entry
#[async_trait]
pub trait ActionExecutor: ActionExecutorBase {
    /// Execute the action against the machine runtime
    async fn execute(&self, api: Arc<dyn ActionRuntimeApi>) -> ActionResult;
}

/// Runtime API handed to actions during execution.
///
/// Context mutations made through this API are visible to later actions
/// in the same and subsequent cycles; the context is the sole
/// inter-action communication channel.
#[async_trait]
pub trait ActionRuntimeApi: Send + Sync {
    /// Name of the machine this action runs inside
    fn machine_name(&self) -> &str;

    /// Get a configuration value by name, with `{path}` placeholders
    /// already interpolated against the machine context
    async fn get_config(&self, name: &str) -> Result<Value, CoreError>;

    /// Read a dotted path from the machine context
    async fn context_get(&self, path: &str) -> Option<Value>;

    /// Write a top-level context key
    async fn context_set(&self, key: &str, value: Value) -> Result<(), CoreError>;

    /// The job currently bound to the machine context, if any
    async fn job_id(&self) -> Option<String>;

    /// Log through the machine's logger
    async fn log(&self, level: LogLevel, message: &str) -> Result<(), CoreError>;
}

/// Factory function to create action executors by name
pub type ActionFactory =
    Arc<dyn Fn(&str) -> Result<Arc<dyn ActionExecutor>, CoreError> + Send + Sync>;
