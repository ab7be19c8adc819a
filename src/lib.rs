//!
//! Weft - event-driven state machine orchestration
//!
//! This crate wires the platform together into the engine process: one
//! machine instance driven by a workflow definition, speaking UDP
//! control/broadcast channels and sharing SQLite stores with its peers
//! and the relay server.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};

use weft_core::{EngineSettings, MachineExecutionService, MachineInstance, WorkflowDefinition};
use weft_state_sqlite::{
    SqliteConnection, SqliteJobRepository, SqliteMachineEventRepository,
    SqliteMachineStateRepository, SqliteRealtimeEventRepository,
};
use weft_stdlib::{builtin_registry, load_external_dir, ActionServices};
use weft_transport::{BroadcastSender, ControlChannel, ControlSender};

/// Engine process configuration
pub mod config;

pub use config::EngineConfig;

/// A built engine, ready to run
pub struct EngineHandle {
    /// The execution service
    pub service: MachineExecutionService,

    /// The bound control port (useful when the config asked for an
    /// ephemeral port)
    pub control_port: u16,
}

/// Load and validate a workflow definition file (YAML or JSON)
pub fn load_workflow(path: &str) -> Result<WorkflowDefinition> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Cannot read workflow file {}", path))?;
    let workflow: WorkflowDefinition =
        serde_yaml::from_str(&raw).with_context(|| format!("Cannot parse workflow file {}", path))?;
    workflow
        .validate()
        .with_context(|| format!("Workflow {} failed validation", path))?;
    Ok(workflow)
}

/// Build the engine from configuration: stores, channels, registry,
/// workflow, service.
pub async fn build(config: &EngineConfig) -> Result<EngineHandle> {
    let workflow = load_workflow(&config.workflow_file)?;
    info!(workflow = %workflow.name, states = workflow.states.len(), "Workflow loaded");

    let conn = SqliteConnection::open(&config.database_path)
        .await
        .context("Failed to open database")?;
    let jobs = Arc::new(SqliteJobRepository::new(conn.clone()));
    let machine_events = Arc::new(SqliteMachineEventRepository::new(conn.clone()));
    let realtime_events = Arc::new(SqliteRealtimeEventRepository::new(conn.clone()));
    let machine_state = Arc::new(SqliteMachineStateRepository::new(conn));

    let control = ControlChannel::bind(config.control_port)
        .await
        .context("Failed to bind control channel")?;
    let control_port = control.port();
    let broadcast = Arc::new(
        BroadcastSender::new(config.broadcast_port)
            .await
            .context("Failed to create broadcast sender")?,
    );
    let control_sender = Arc::new(
        ControlSender::new()
            .await
            .context("Failed to create control sender")?,
    );

    let mut registry = builtin_registry(ActionServices {
        jobs: jobs.clone(),
        machine_events: machine_events.clone(),
        broadcast: broadcast.clone(),
        control_sender,
    });
    if let Some(dir) = &config.actions_dir {
        let count = load_external_dir(&mut registry, dir)
            .with_context(|| format!("Failed to scan actions directory {}", dir))?;
        info!(dir = %dir, count, "External actions loaded");
    }

    let mut machine = MachineInstance::new(&config.machine_name, &workflow.initial_state);
    if let Some(machine_type) = &config.machine_type {
        machine = machine.with_machine_type(machine_type);
    }

    let service = MachineExecutionService::new(
        workflow,
        machine,
        Arc::new(control),
        broadcast,
        registry.into_factory(),
        machine_events,
        realtime_events,
        machine_state,
        EngineSettings::default(),
    );

    Ok(EngineHandle {
        service,
        control_port,
    })
}

/// Run the engine process until ctrl-c
pub async fn run(config: EngineConfig) -> Result<()> {
    init_logging(&config);

    let handle = build(&config).await?;
    info!(
        machine = %config.machine_name,
        control_port = handle.control_port,
        "Engine starting"
    );

    tokio::select! {
        result = handle.service.run() => {
            result.context("Engine loop failed")?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
        }
    }

    if let Err(e) = handle.service.announce_shutdown().await {
        warn!(error = %e, "Shutdown announcement failed");
    }
    Ok(())
}

/// Initialize logging
fn init_logging(config: &EngineConfig) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let _ = fmt().with_env_filter(filter).with_target(true).try_init();
}
