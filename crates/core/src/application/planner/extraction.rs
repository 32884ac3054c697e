//! Extraction strategy
//!
//! Repeatedly carves the largest feasible four-stage batch out of the fleet.
//! Each batch steals a fraction of the target's value and carries the growth
//! and restorative stages that undo its side effects.

use tracing::{debug, info, warn};

use super::{search_max_fraction, BatchPlanner, PlannerConfig};
use crate::application::cost_model::{grow_threads_needed, JobCostModel};
use crate::application::ledger::CapacityLedger;
use crate::domain::{Batch, JobKind, Placement, Plan, TargetState};
use crate::error::{AppError, Result};

pub struct ExtractionPlanner {
    model: JobCostModel,
    search_rounds: u32,
}

/// A stage placed during a probe, kept so it can be released again
struct Reserved {
    kind: JobKind,
    threads: u32,
    node_id: String,
    cost: f64,
}

impl ExtractionPlanner {
    pub fn new(config: PlannerConfig) -> Self {
        Self {
            model: config.model,
            search_rounds: config.search_rounds,
        }
    }

    /// Sum of the value fractions every extraction stage of `plan` removes
    pub fn total_fraction_stolen(&self, target: &TargetState, plan: &Plan) -> f64 {
        plan.batches()
            .iter()
            .filter_map(|batch| batch.threads_of(JobKind::Primary))
            .map(|threads| threads as f64 * target.steal_per_thread)
            .sum()
    }

    /// Thread counts of the four stages for a steal fraction, in batch order
    fn stage_threads(&self, target: &TargetState, fraction: f64) -> [(JobKind, u32); 4] {
        let primary = JobCostModel::extraction_threads_for(fraction, target.steal_per_thread);
        let expected =
            (target.max_value * (1.0 - target.steal_per_thread * primary as f64)).max(0.0);
        let params = target.growth_params(target.min_instability);
        let secondary = grow_threads_needed(expected, target.max_value, &params);

        [
            (JobKind::Primary, primary),
            (
                JobKind::Restore1,
                self.model.restorative_threads_for(JobKind::Primary, primary),
            ),
            (JobKind::Secondary, secondary),
            (
                JobKind::Restore2,
                self.model.restorative_threads_for(JobKind::Secondary, secondary),
            ),
        ]
    }

    /// Probe whether a batch for `fraction` fits; the ledger is left unchanged
    fn try_batch(
        &self,
        target: &TargetState,
        fraction: f64,
        ledger: &mut CapacityLedger,
    ) -> Result<Option<Batch>> {
        let [primary, restore1, secondary, restore2] = self.stage_threads(target, fraction);

        // The larger of the two value stages goes first, while the most room is left
        let primary_cost = self.model.cost(primary.0, primary.1);
        let secondary_cost = self.model.cost(secondary.0, secondary.1);
        let order = if primary_cost >= secondary_cost {
            [primary, secondary, restore1, restore2]
        } else {
            [secondary, primary, restore1, restore2]
        };

        let mut reserved: Vec<Reserved> = Vec::with_capacity(4);
        let mut feasible = true;
        for (kind, threads) in order {
            let cost = self.model.cost(kind, threads);
            match ledger.find_suitable_node(cost).map(str::to_owned) {
                Some(node_id) => {
                    ledger.reserve(&node_id, cost)?;
                    reserved.push(Reserved {
                        kind,
                        threads,
                        node_id,
                        cost,
                    });
                }
                None => {
                    feasible = false;
                    break;
                }
            }
        }

        for stage in &reserved {
            ledger.release(&stage.node_id, stage.cost)?;
        }

        if !feasible {
            return Ok(None);
        }
        Ok(Some(Batch::extraction(
            placement_of(&reserved, JobKind::Primary)?,
            placement_of(&reserved, JobKind::Restore1)?,
            placement_of(&reserved, JobKind::Secondary)?,
            placement_of(&reserved, JobKind::Restore2)?,
        )))
    }
}

/// # Errors
/// - AppError::Internal if no stage of `kind` was reserved
fn placement_of(reserved: &[Reserved], kind: JobKind) -> Result<Placement> {
    reserved
        .iter()
        .find(|stage| stage.kind == kind)
        .map(|stage| Placement::new(stage.threads, stage.node_id.clone()))
        .ok_or_else(|| AppError::Internal(format!("no {} stage was reserved", kind)))
}

impl BatchPlanner for ExtractionPlanner {
    fn name(&self) -> &'static str {
        "extraction"
    }

    fn create_batches_list(
        &self,
        target: &TargetState,
        ledger: &mut CapacityLedger,
    ) -> Result<Plan> {
        let mut batches = Vec::new();

        loop {
            let best = search_max_fraction(self.search_rounds, |fraction| {
                self.try_batch(target, fraction, ledger)
            })?;
            let Some((fraction, batch)) = best else {
                break;
            };

            let cost: f64 = batch
                .jobs()
                .iter()
                .map(|job| self.model.cost(job.kind, job.threads))
                .sum();
            if cost <= 0.0 {
                warn!("Extraction batch costs nothing, stopping to avoid an endless plan");
                break;
            }

            ledger.reserve_batch(&batch, &self.model)?;
            debug!(
                batch_index = batches.len(),
                fraction = %fraction,
                cost = %cost,
                "Committed extraction batch"
            );
            batches.push(batch);
        }

        let plan = Plan::new(batches);
        if plan.is_empty() {
            warn!(target = %target.name, "No extraction batch fits the fleet");
        } else {
            info!(
                target = %target.name,
                batches = plan.len(),
                stolen = %self.total_fraction_stolen(target, &plan),
                free = %ledger.total_available(),
                "Extraction plan built"
            );
        }
        Ok(plan)
    }

    fn projection(&self, target: &TargetState, plan: &Plan) -> f64 {
        self.total_fraction_stolen(target, plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{BatchShape, Node};

    fn target() -> TargetState {
        TargetState {
            name: "joesguns".to_string(),
            value: 1000.0,
            max_value: 1000.0,
            instability: 1.0,
            min_instability: 1.0,
            growth_rate: 0.25,
            steal_per_thread: 0.01,
            base_duration_ms: 100.0,
            player_multiplier: 1.0,
            world_multiplier: 1.0,
        }
    }

    fn ledger(nodes: &[(&str, f64)]) -> CapacityLedger {
        CapacityLedger::new(
            nodes
                .iter()
                .map(|(id, cap)| Node::new(*id, *cap).unwrap())
                .collect(),
        )
    }

    fn planner() -> ExtractionPlanner {
        ExtractionPlanner::new(PlannerConfig::default())
    }

    #[test]
    fn test_missing_stage_is_an_error() {
        let reserved = vec![Reserved {
            kind: JobKind::Primary,
            threads: 4,
            node_id: "home".to_string(),
            cost: 6.8,
        }];
        let primary = placement_of(&reserved, JobKind::Primary).unwrap();
        assert_eq!(primary, Placement::new(4, "home"));
        assert!(matches!(
            placement_of(&reserved, JobKind::Restore2),
            Err(AppError::Internal(_))
        ));
    }

    #[test]
    fn test_starved_fleet_gives_empty_plan() {
        // one extraction thread alone needs 1.7
        let mut l = ledger(&[("a", 1.5), ("b", 1.0)]);
        let plan = planner().create_batches_list(&target(), &mut l).unwrap();
        assert!(plan.is_empty());
        assert_eq!(l.total_available(), 2.5);
    }

    #[test]
    fn test_probe_leaves_ledger_untouched() {
        let mut l = ledger(&[("a", 512.0), ("b", 64.0)]);
        let batch = planner().try_batch(&target(), 0.25, &mut l).unwrap();
        assert!(batch.is_some());
        assert_eq!(l.available("a").unwrap(), 512.0);
        assert_eq!(l.available("b").unwrap(), 64.0);
    }

    #[test]
    fn test_batches_keep_stage_order() {
        let mut l = ledger(&[("a", 512.0), ("b", 256.0), ("c", 64.0)]);
        let plan = planner().create_batches_list(&target(), &mut l).unwrap();
        assert!(!plan.is_empty());
        for batch in plan.batches() {
            assert_eq!(batch.shape(), BatchShape::Extraction);
            let kinds: Vec<_> = batch.jobs().iter().map(|j| j.kind).collect();
            assert_eq!(
                kinds,
                vec![
                    JobKind::Primary,
                    JobKind::Restore1,
                    JobKind::Secondary,
                    JobKind::Restore2
                ]
            );
            assert!(batch.jobs().iter().all(|j| j.threads > 0));
        }
    }

    #[test]
    fn test_never_overcommits_a_node() {
        let nodes = [("a", 300.0), ("b", 120.0), ("c", 45.0), ("d", 8.0)];
        let mut l = ledger(&nodes);
        let model = JobCostModel::default();
        let plan = planner().create_batches_list(&target(), &mut l).unwrap();

        for (id, capacity) in nodes {
            let used: f64 = plan
                .batches()
                .iter()
                .flat_map(|b| b.jobs())
                .filter(|j| j.node_id == id)
                .map(|j| model.cost(j.kind, j.threads))
                .sum();
            assert!(used <= capacity + 1e-6, "{} used {} of {}", id, used, capacity);
            assert!((l.available(id).unwrap() - (capacity - used)).abs() < 1e-6);
        }
    }

    #[test]
    fn test_fraction_stolen_sums_extraction_stages() {
        let plan = Plan::new(vec![
            Batch::extraction(
                Placement::new(10, "a"),
                Placement::new(1, "a"),
                Placement::new(20, "a"),
                Placement::new(2, "a"),
            ),
            Batch::extraction(
                Placement::new(5, "b"),
                Placement::new(1, "b"),
                Placement::new(10, "b"),
                Placement::new(1, "b"),
            ),
        ]);
        let stolen = planner().total_fraction_stolen(&target(), &plan);
        assert!((stolen - 0.15).abs() < 1e-9);
    }

    #[test]
    fn test_larger_fleet_steals_more_per_batch() {
        let mut small = ledger(&[("a", 64.0)]);
        let mut large = ledger(&[("a", 4096.0)]);
        let small_plan = planner().create_batches_list(&target(), &mut small).unwrap();
        let large_plan = planner().create_batches_list(&target(), &mut large).unwrap();
        let first = |plan: &Plan| plan.batches()[0].threads_of(JobKind::Primary).unwrap();
        assert!(first(&large_plan) > first(&small_plan));
    }
}
