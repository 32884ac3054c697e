// Port Layer - Interfaces for external dependencies

pub mod id_provider; // For deterministic testing
pub mod job_launcher;
pub mod target_operation;
pub mod time_provider;
pub mod world_probe;

// Re-exports
pub use id_provider::IdProvider;
pub use job_launcher::{JobLauncher, LaunchError};
pub use target_operation::{OperationError, TargetOperation};
pub use time_provider::TimeProvider;
pub use world_probe::{FleetProbe, NodeSnapshot, TargetProbe};
