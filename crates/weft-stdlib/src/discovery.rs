//! External action discovery
//!
//! An optional directory is scanned once at startup for
//! `{name}_action.yaml` definition files. Each file binds a name to a
//! built-in capability plus preset configuration; a definition whose
//! name collides with a registered action overrides it.

use serde::Deserialize;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use weft_core::{ActionExecutor, ActionExecutorBase, ActionResult, ActionRuntimeApi, CoreError, LogLevel};

use crate::registry::ActionRegistry;

/// One `{name}_action.yaml` definition
#[derive(Debug, Deserialize)]
struct ActionDefinition {
    /// Registered name; defaults to the file-stem convention
    #[serde(default)]
    name: Option<String>,

    /// The built-in capability this definition specializes
    capability: String,

    /// Preset configuration, consulted when the workflow's own action
    /// config lacks a key
    #[serde(default)]
    config: Value,
}

/// Executor wrapping a built-in with preset configuration
struct DefinedAction {
    name: String,
    inner: Arc<dyn ActionExecutor>,
    presets: Value,
}

impl ActionExecutorBase for DefinedAction {
    fn action_type(&self) -> &str {
        &self.name
    }
}

#[async_trait]
impl ActionExecutor for DefinedAction {
    async fn execute(&self, api: Arc<dyn ActionRuntimeApi>) -> ActionResult {
        let api: Arc<dyn ActionRuntimeApi> = Arc::new(PresetConfigApi {
            inner: api,
            presets: self.presets.clone(),
        });
        self.inner.execute(api).await
    }
}

/// Runtime API overlaying preset config under the instance config
struct PresetConfigApi {
    inner: Arc<dyn ActionRuntimeApi>,
    presets: Value,
}

#[async_trait]
impl ActionRuntimeApi for PresetConfigApi {
    fn machine_name(&self) -> &str {
        self.inner.machine_name()
    }

    async fn get_config(&self, name: &str) -> Result<Value, CoreError> {
        match self.inner.get_config(name).await {
            Ok(value) => Ok(value),
            Err(instance_miss) => self
                .presets
                .get(name)
                .cloned()
                .ok_or(instance_miss),
        }
    }

    async fn context_get(&self, path: &str) -> Option<Value> {
        self.inner.context_get(path).await
    }

    async fn context_set(&self, key: &str, value: Value) -> Result<(), CoreError> {
        self.inner.context_set(key, value).await
    }

    async fn job_id(&self) -> Option<String> {
        self.inner.job_id().await
    }

    async fn log(&self, level: LogLevel, message: &str) -> Result<(), CoreError> {
        self.inner.log(level, message).await
    }
}

/// Derive the action name from a `{name}_action.yaml` file stem
fn name_from_stem(stem: &str) -> Option<String> {
    stem.strip_suffix("_action").map(str::to_string)
}

/// Scan a directory once and register every definition found.
///
/// Unreadable or malformed files are skipped with a warning; a
/// definition referencing an unknown capability is skipped too.
/// Returns the number of definitions registered.
pub fn load_external_dir(
    registry: &mut ActionRegistry,
    dir: impl AsRef<Path>,
) -> Result<usize, CoreError> {
    let dir = dir.as_ref();
    let entries = std::fs::read_dir(dir)
        .map_err(|e| CoreError::IOError(format!("Cannot scan {}: {}", dir.display(), e)))?;

    let mut registered = 0;
    for entry in entries {
        let Ok(entry) = entry else { continue };
        let path = entry.path();

        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        let extension = path.extension().and_then(|s| s.to_str());
        if !matches!(extension, Some("yaml") | Some("yml")) {
            continue;
        }
        let Some(default_name) = name_from_stem(stem) else {
            continue;
        };

        let raw = match std::fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Skipping unreadable action definition");
                continue;
            }
        };
        let definition: ActionDefinition = match serde_yaml::from_str(&raw) {
            Ok(definition) => definition,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Skipping malformed action definition");
                continue;
            }
        };

        let Some(inner) = registry.get(&definition.capability) else {
            warn!(
                path = %path.display(),
                capability = %definition.capability,
                "Skipping definition with unknown capability"
            );
            continue;
        };

        let name = definition.name.unwrap_or(default_name);
        info!(action = %name, capability = %definition.capability, "Discovered external action");
        registry.register_named(
            name.clone(),
            Arc::new(DefinedAction {
                name,
                inner,
                presets: definition.config,
            }),
        );
        registered += 1;
    }

    Ok(registered)
}
