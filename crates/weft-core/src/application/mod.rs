//! Application services - the machine execution loop and its ports

/// The machine execution service
pub mod machine_execution_service;

/// Transport ports consumed by the service
pub mod runtime_interface;
