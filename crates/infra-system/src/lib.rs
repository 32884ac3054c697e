// Volley Infrastructure - System Adapters
// Implements: JobLauncher, FleetProbe, TargetProbe, TargetOperation

pub mod sim_world;
pub mod task_launcher;

pub use sim_world::{NodeConfig, SimulatedWorld, WorldFile};
pub use task_launcher::TaskLauncher;
