//! Domain layer - core entities and persistence seams

/// Workflow definitions
pub mod workflow;

/// Machine instances and snapshots
pub mod machine;

/// Jobs and their lifecycle
pub mod job;

/// Wire and audit message types
pub mod messages;

/// Repository traits
pub mod repository;
