//! Campaign: the outer control loop
//!
//! Each pass takes a fresh fleet and target snapshot, builds a new ledger,
//! plans with the current strategy and executes the plan.

use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use crate::application::executor::BatchExecutor;
use crate::application::ledger::CapacityLedger;
use crate::application::planner::BatchPlanner;
use crate::application::worker::ShutdownToken;
use crate::domain::TargetState;
use crate::error::{AppError, Result};
use crate::port::time_provider::SystemTimeProvider;
use crate::port::{FleetProbe, IdProvider, TargetProbe, TimeProvider};

/// Summary of one executed pass
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PassReport {
    pub pass_id: String,
    pub strategy: &'static str,
    pub batches: usize,
    pub jobs: usize,
    pub launched: usize,
    /// Broadcast end time on the executor's clock (ms)
    pub end_time: f64,
    /// Wall clock at pass start (epoch ms)
    pub started_at_ms: f64,
    /// Projected value (saturation) or fraction stolen (extraction)
    pub projection: f64,
    pub in_order: bool,
}

/// Called with each report as soon as its pass finishes
pub type ReportSink = Arc<dyn Fn(&PassReport) + Send + Sync>;

pub struct Campaign {
    planner: Arc<dyn BatchPlanner>,
    fleet: Arc<dyn FleetProbe>,
    targets: Arc<dyn TargetProbe>,
    executor: BatchExecutor,
    ids: Arc<dyn IdProvider>,
    wall_clock: Arc<dyn TimeProvider>,
    report_sink: Option<ReportSink>,
}

impl Campaign {
    pub fn new(
        planner: Arc<dyn BatchPlanner>,
        fleet: Arc<dyn FleetProbe>,
        targets: Arc<dyn TargetProbe>,
        executor: BatchExecutor,
        ids: Arc<dyn IdProvider>,
    ) -> Self {
        Self {
            planner,
            fleet,
            targets,
            executor,
            ids,
            wall_clock: Arc::new(SystemTimeProvider),
            report_sink: None,
        }
    }

    pub fn with_wall_clock(mut self, wall_clock: Arc<dyn TimeProvider>) -> Self {
        self.wall_clock = wall_clock;
        self
    }

    /// Publish every finished pass, including those before a later failure
    pub fn with_report_sink(mut self, sink: ReportSink) -> Self {
        self.report_sink = Some(sink);
        self
    }

    /// Switch strategy between phases
    pub fn set_planner(&mut self, planner: Arc<dyn BatchPlanner>) {
        self.planner = planner;
    }

    pub fn planner(&self) -> &dyn BatchPlanner {
        self.planner.as_ref()
    }

    pub fn executor_mut(&mut self) -> &mut BatchExecutor {
        &mut self.executor
    }

    async fn snapshot(&self, target: &str) -> Result<TargetState> {
        let state = self.targets.target(target).await?;
        state.validate()?;
        Ok(state)
    }

    /// Plan and execute one pass against `target`
    ///
    /// # Errors
    /// - AppError::CapacityExhausted if not a single batch fits the fleet
    /// - AppError::DesyncDetected if the executed plan lost sync
    pub async fn run_pass(&mut self, target: &str) -> Result<PassReport> {
        let state = self.snapshot(target).await?;
        let nodes = self.fleet.nodes().await;
        let mut ledger = CapacityLedger::from_snapshot(&nodes)?;

        let plan = self.planner.create_batches_list(&state, &mut ledger)?;
        if plan.is_empty() {
            return Err(AppError::CapacityExhausted(format!(
                "{} planner found no batch for {} on {} nodes",
                self.planner.name(),
                target,
                nodes.len()
            )));
        }

        let pass_id = self.ids.generate_id();
        let started_at_ms = self.wall_clock.now_millis();
        let projection = self.planner.projection(&state, &plan);
        info!(
            pass_id = %pass_id,
            strategy = self.planner.name(),
            target = %target,
            batches = plan.len(),
            jobs = plan.job_count(),
            projection = %projection,
            "Pass started"
        );

        let execution = self.executor.execute(&state, &plan).await?;

        let report = PassReport {
            pass_id,
            strategy: self.planner.name(),
            batches: plan.len(),
            jobs: plan.job_count(),
            launched: execution.launched,
            end_time: execution.end_time,
            started_at_ms,
            projection,
            in_order: execution.in_order(),
        };
        info!(
            pass_id = %report.pass_id,
            launched = report.launched,
            in_order = report.in_order,
            "Pass finished"
        );
        if let Some(sink) = &self.report_sink {
            sink(&report);
        }
        Ok(report)
    }

    /// Run passes until the target is prepped or shutdown is requested
    pub async fn run_until_prepped(
        &mut self,
        target: &str,
        shutdown: &ShutdownToken,
    ) -> Result<Vec<PassReport>> {
        let mut reports = Vec::new();
        loop {
            if shutdown.is_shutdown() {
                info!(
                    target = %target,
                    passes = reports.len(),
                    "Shutdown requested, stopping prep"
                );
                break;
            }
            let state = self.snapshot(target).await?;
            if state.is_prepped() {
                info!(target = %target, passes = reports.len(), "Target prepped");
                break;
            }
            reports.push(self.run_pass(target).await?);
        }
        Ok(reports)
    }

    /// Run extraction passes on a prepped target
    ///
    /// Stops after `max_passes` (if given) or on shutdown. A pass that
    /// leaves the target un-prepped is fatal.
    pub async fn run_extraction(
        &mut self,
        target: &str,
        max_passes: Option<usize>,
        shutdown: &ShutdownToken,
    ) -> Result<Vec<PassReport>> {
        if !self.snapshot(target).await?.is_prepped() {
            return Err(AppError::InvalidState(format!(
                "{} must be prepped before extraction",
                target
            )));
        }

        let mut reports = Vec::new();
        while max_passes.map_or(true, |max| reports.len() < max) {
            if shutdown.is_shutdown() {
                info!(
                    target = %target,
                    passes = reports.len(),
                    "Shutdown requested, stopping extraction"
                );
                break;
            }
            let report = self.run_pass(target).await?;
            let pass_id = report.pass_id.clone();
            reports.push(report);

            let state = self.snapshot(target).await?;
            if !state.is_prepped() {
                return Err(AppError::InvalidState(format!(
                    "pass {} left {} un-prepped (value {} of {}, instability {} over {})",
                    pass_id,
                    target,
                    state.value,
                    state.max_value,
                    state.instability,
                    state.min_instability
                )));
            }
        }
        Ok(reports)
    }
}
