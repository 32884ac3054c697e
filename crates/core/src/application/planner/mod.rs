// Batch planners
//
// Two independent strategies behind one trait. Planning is synchronous and
// single-threaded: a planner owns the ledger for the duration of a pass.

pub mod extraction;
pub mod saturation;
pub mod search;

pub use extraction::ExtractionPlanner;
pub use saturation::{PrepPhase, SaturationPlanner};
pub use search::search_max_fraction;

use serde::{Deserialize, Serialize};

use crate::application::cost_model::JobCostModel;
use crate::application::ledger::CapacityLedger;
use crate::application::worker::constants::EXTRACTION_SEARCH_ROUNDS;
use crate::domain::{Node, Plan, TargetState};
use crate::error::Result;

/// Planner configuration shared by both strategies
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PlannerConfig {
    pub model: JobCostModel,
    /// Binary search rounds per extraction batch
    pub search_rounds: u32,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            model: JobCostModel::default(),
            search_rounds: EXTRACTION_SEARCH_ROUNDS,
        }
    }
}

/// A batch-planning strategy
pub trait BatchPlanner: Send + Sync {
    /// Strategy name (logs and reports)
    fn name(&self) -> &'static str;

    /// Build an ordered plan for `target`, reserving its capacity in `ledger`
    ///
    /// Capacity exhaustion is not an error: the plan holds whatever could be
    /// built, possibly nothing. Errors are reserved for broken invariants.
    fn create_batches_list(&self, target: &TargetState, ledger: &mut CapacityLedger)
        -> Result<Plan>;

    /// Strategy-specific projection of what `plan` achieves, for status
    /// reporting only
    fn projection(&self, target: &TargetState, plan: &Plan) -> f64;
}

/// Largest thread count of `per_thread` cost that fits on `node`
pub(crate) fn affordable_threads(node: &Node, per_thread: f64) -> u32 {
    if per_thread <= 0.0 {
        return 0;
    }
    let mut threads = (node.available() / per_thread).floor() as u32;
    while threads > 0 && !node.fits(threads as f64 * per_thread) {
        threads -= 1;
    }
    threads
}
