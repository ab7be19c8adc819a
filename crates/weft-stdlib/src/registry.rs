//! Name -> executor registry
//!
//! Built at startup and never mutated afterwards. Registration order
//! matters only for collisions: the last registration under a name
//! wins, which is how externally discovered definitions override
//! built-ins.

use std::collections::HashMap;
use std::sync::Arc;

use weft_core::{ActionExecutor, ActionFactory, CoreError};

/// Registry of named action executors
#[derive(Default)]
pub struct ActionRegistry {
    actions: HashMap<String, Arc<dyn ActionExecutor>>,
}

impl ActionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an executor under its own `action_type` name.
    /// Re-registering a name replaces the previous executor.
    pub fn register(&mut self, executor: Arc<dyn ActionExecutor>) {
        self.register_named(executor.action_type().to_string(), executor);
    }

    /// Register an executor under an explicit name
    pub fn register_named(&mut self, name: String, executor: Arc<dyn ActionExecutor>) {
        if self.actions.contains_key(&name) {
            tracing::info!(action = %name, "Overriding registered action");
        }
        self.actions.insert(name, executor);
    }

    /// Look up an executor by name
    pub fn get(&self, name: &str) -> Option<Arc<dyn ActionExecutor>> {
        self.actions.get(name).cloned()
    }

    /// Whether a name is registered
    pub fn contains(&self, name: &str) -> bool {
        self.actions.contains_key(name)
    }

    /// All registered names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.actions.keys().cloned().collect();
        names.sort();
        names
    }

    /// Freeze the registry into the factory form the engine consumes
    pub fn into_factory(self) -> ActionFactory {
        let registry = Arc::new(self);
        Arc::new(move |name: &str| {
            registry
                .get(name)
                .ok_or_else(|| CoreError::ActionNotFound(name.to_string()))
        })
    }
}
