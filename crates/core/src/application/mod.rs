// Application Layer - planning, execution and the campaign loop

pub mod broker;
pub mod campaign;
pub mod cost_model;
pub mod executor;
pub mod ledger;
pub mod planner;
pub mod rendezvous;
pub mod worker;

// Re-exports
pub use broker::ChannelBroker;
pub use campaign::{Campaign, PassReport, ReportSink};
pub use cost_model::{apply_growth, grow_threads_needed, CostTable, JobCostModel, RestoreModel};
pub use executor::{BatchExecutor, ExecutionReport, ExecutorConfig};
pub use ledger::CapacityLedger;
pub use planner::{BatchPlanner, ExtractionPlanner, PlannerConfig, PrepPhase, SaturationPlanner};
pub use rendezvous::RendezvousChannel;
pub use worker::{
    run_guarded, shutdown_channel, ShutdownSender, ShutdownToken, WorkerOutcome, WorkerProtocol,
};
