//! Saturation strategy
//!
//! Drives a target to its prepped state: instability down to the minimum
//! first, then value up to the maximum. Holds no state between calls; the
//! phase is derived from the target snapshot every time.

use tracing::{debug, info};

use super::{affordable_threads, BatchPlanner, PlannerConfig};
use crate::application::cost_model::{apply_growth, grow_threads_needed, JobCostModel};
use crate::application::ledger::CapacityLedger;
use crate::domain::{Batch, JobKind, Node, Placement, Plan, TargetState};
use crate::error::Result;

/// Where a target stands on its way to prepped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrepPhase {
    NeedsSecurityRestore,
    NeedsValueRestore,
    Prepped,
}

impl PrepPhase {
    pub fn of(target: &TargetState) -> Self {
        if target.instability > target.min_instability {
            PrepPhase::NeedsSecurityRestore
        } else if target.value < target.max_value {
            PrepPhase::NeedsValueRestore
        } else {
            PrepPhase::Prepped
        }
    }
}

pub struct SaturationPlanner {
    model: JobCostModel,
}

impl SaturationPlanner {
    pub fn new(config: PlannerConfig) -> Self {
        Self {
            model: config.model,
        }
    }

    pub fn is_prepped(&self, target: &TargetState) -> bool {
        target.is_prepped()
    }

    /// Value the target reaches once every growth stage of `plan` lands
    ///
    /// Growth is projected at minimum instability, which the restorative
    /// stages of the same plan guarantee.
    pub fn projected_value(&self, target: &TargetState, plan: &Plan) -> f64 {
        let params = target.growth_params(target.min_instability);
        plan.batches()
            .iter()
            .filter_map(|batch| batch.threads_of(JobKind::Secondary))
            .fold(target.value, |value, threads| {
                apply_growth(value, threads, &params).min(target.max_value)
            })
    }

    /// Emit restorative batches; returns the projected instability afterwards
    fn plan_restore(
        &self,
        target: &TargetState,
        ledger: &mut CapacityLedger,
        batches: &mut Vec<Batch>,
    ) -> Result<f64> {
        let per_thread = self.model.per_thread(JobKind::Restore1);
        let mut instability = target.instability;

        while instability > target.min_instability {
            let ideal = self
                .model
                .restore_threads_for_excess(instability - target.min_instability);
            let ideal_cost = self.model.cost(JobKind::Restore1, ideal);

            if let Some(node_id) = ledger.find_suitable_node(ideal_cost).map(str::to_owned) {
                ledger.reserve(&node_id, ideal_cost)?;
                debug!(node = %node_id, threads = ideal, "Single-shot restore");
                batches.push(Batch::restore(Placement::new(ideal, node_id)));
                instability = target.min_instability;
                break;
            }

            let Some(largest) = ledger.largest_node() else {
                break;
            };
            let threads = affordable_threads(largest, per_thread);
            if threads == 0 {
                debug!(remaining = %instability, "No node can host a restore thread");
                break;
            }
            let node_id = largest.id().to_owned();
            ledger.reserve(&node_id, self.model.cost(JobKind::Restore1, threads))?;
            batches.push(Batch::restore(Placement::new(threads, node_id)));
            instability =
                (instability - self.model.restore_amount(threads)).max(target.min_instability);
        }

        Ok(instability)
    }

    /// Emit growth batches starting from `instability`
    fn plan_growth(
        &self,
        target: &TargetState,
        instability: f64,
        ledger: &mut CapacityLedger,
        batches: &mut Vec<Batch>,
    ) -> Result<()> {
        let params = target.growth_params(instability);
        let pair_cost =
            self.model.per_thread(JobKind::Secondary) + self.model.per_thread(JobKind::Restore2);
        let mut value = target.value;

        while value < target.max_value {
            let ideal_grow = grow_threads_needed(value, target.max_value, &params);
            if ideal_grow == 0 {
                break;
            }
            if let Some(batch) = self.place_in_one_shot(ideal_grow, ledger)? {
                batches.push(batch);
                break;
            }

            let Some(largest) = ledger.largest_node() else {
                break;
            };
            if !largest.fits(pair_cost) {
                debug!(value = %value, "No node has room for a growth pair");
                break;
            }
            let (grow, restore) = self.split_on(largest, ideal_grow);
            if grow == 0 {
                break;
            }
            let node_id = largest.id().to_owned();
            ledger.reserve(&node_id, self.model.cost(JobKind::Secondary, grow))?;
            ledger.reserve(&node_id, self.model.cost(JobKind::Restore2, restore))?;
            batches.push(self.growth_batch(
                Placement::new(grow, node_id.clone()),
                Placement::new(restore, node_id),
            ));
            value = apply_growth(value, grow, &params).min(target.max_value);
        }

        Ok(())
    }

    /// Growth plus its paired restore on best-fitting nodes, or nothing
    fn place_in_one_shot(&self, grow: u32, ledger: &mut CapacityLedger) -> Result<Option<Batch>> {
        let restore = self.model.restorative_threads_for(JobKind::Secondary, grow);
        let grow_cost = self.model.cost(JobKind::Secondary, grow);
        let Some(grow_node) = ledger.find_suitable_node(grow_cost).map(str::to_owned) else {
            return Ok(None);
        };
        ledger.reserve(&grow_node, grow_cost)?;

        let restore_cost = self.model.cost(JobKind::Restore2, restore);
        let Some(restore_node) = ledger.find_suitable_node(restore_cost).map(str::to_owned) else {
            ledger.release(&grow_node, grow_cost)?;
            return Ok(None);
        };
        ledger.reserve(&restore_node, restore_cost)?;

        Ok(Some(self.growth_batch(
            Placement::new(grow, grow_node),
            Placement::new(restore, restore_node),
        )))
    }

    /// Split one node between growth and its restore at the model's ratio
    fn split_on(&self, node: &Node, ideal_grow: u32) -> (u32, u32) {
        let unit = self
            .model
            .per_thread(JobKind::Secondary)
            .max(self.model.per_thread(JobKind::Restore2));
        let slots = affordable_threads(node, unit);
        let restore_share =
            (slots as f64 / (self.model.growth_per_restore() + 1.0)).ceil() as u32;
        let mut grow = slots.saturating_sub(restore_share).min(ideal_grow);

        loop {
            let restore = self.model.restorative_threads_for(JobKind::Secondary, grow);
            let cost = self.model.cost(JobKind::Secondary, grow)
                + self.model.cost(JobKind::Restore2, restore);
            if grow == 0 || node.fits(cost) {
                return (grow, restore);
            }
            grow -= 1;
        }
    }

    fn growth_batch(&self, grow: Placement, restore: Placement) -> Batch {
        if restore.threads == 0 {
            Batch::grow(grow)
        } else {
            Batch::grow_restore(grow, restore)
        }
    }
}

impl BatchPlanner for SaturationPlanner {
    fn name(&self) -> &'static str {
        "saturation"
    }

    fn create_batches_list(
        &self,
        target: &TargetState,
        ledger: &mut CapacityLedger,
    ) -> Result<Plan> {
        let phase = PrepPhase::of(target);
        let mut batches = Vec::new();

        if phase != PrepPhase::Prepped {
            let instability = self.plan_restore(target, ledger, &mut batches)?;
            if target.value < target.max_value {
                self.plan_growth(target, instability, ledger, &mut batches)?;
            }
        }

        info!(
            target = %target.name,
            phase = ?phase,
            batches = batches.len(),
            free = %ledger.total_available(),
            "Saturation plan built"
        );
        Ok(Plan::new(batches))
    }

    fn projection(&self, target: &TargetState, plan: &Plan) -> f64 {
        self.projected_value(target, plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::cost_model::RestoreModel;
    use crate::domain::BatchShape;

    fn target(value: f64, instability: f64) -> TargetState {
        TargetState {
            name: "joesguns".to_string(),
            value,
            max_value: 1000.0,
            instability,
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

    fn planner() -> SaturationPlanner {
        SaturationPlanner::new(PlannerConfig::default())
    }

    #[test]
    fn test_phase_detection() {
        assert_eq!(PrepPhase::of(&target(500.0, 5.0)), PrepPhase::NeedsSecurityRestore);
        assert_eq!(PrepPhase::of(&target(500.0, 1.0)), PrepPhase::NeedsValueRestore);
        assert_eq!(PrepPhase::of(&target(1000.0, 1.0)), PrepPhase::Prepped);
        assert!(planner().is_prepped(&target(1000.0, 1.0)));
        assert!(!planner().is_prepped(&target(999.999, 1.0)));
    }

    #[test]
    fn test_prepped_target_gets_empty_plan() {
        let mut l = ledger(&[("home", 64.0)]);
        let plan = planner()
            .create_batches_list(&target(1000.0, 1.0), &mut l)
            .unwrap();
        assert!(plan.is_empty());
        assert_eq!(l.total_available(), 64.0);
    }

    #[test]
    fn test_restore_comes_before_growth() {
        let mut l = ledger(&[("home", 1024.0), ("n00dles", 256.0)]);
        let plan = planner()
            .create_batches_list(&target(500.0, 5.0), &mut l)
            .unwrap();
        let shapes: Vec<_> = plan.batches().iter().map(Batch::shape).collect();
        assert_eq!(shapes, vec![BatchShape::Restore, BatchShape::GrowRestore]);
        // 4 excess / 0.05 per thread
        assert_eq!(plan.batches()[0].threads_of(JobKind::Restore1), Some(80));
        assert_eq!(planner().projected_value(&target(500.0, 5.0), &plan), 1000.0);
    }

    #[test]
    fn test_restore_split_across_nodes_when_nothing_fits_whole() {
        // 80 threads * 1.75 = 140 needed, largest node hosts 57
        let mut l = ledger(&[("a", 100.0), ("b", 60.0)]);
        let plan = planner()
            .create_batches_list(&target(1000.0, 5.0), &mut l)
            .unwrap();
        let threads: Vec<_> = plan
            .batches()
            .iter()
            .map(|b| b.threads_of(JobKind::Restore1).unwrap())
            .collect();
        assert_eq!(threads, vec![57, 23]);
        assert!(plan.batches().iter().all(|b| b.shape() == BatchShape::Restore));
    }

    #[test]
    fn test_starved_fleet_returns_partial_plan() {
        let mut l = ledger(&[("a", 10.0)]);
        let plan = planner()
            .create_batches_list(&target(500.0, 5.0), &mut l)
            .unwrap();
        assert_eq!(plan.len(), 1);
        assert_eq!(plan.batches()[0].threads_of(JobKind::Restore1), Some(5));
        assert!(l.total_available() < 1.75);
    }

    #[test]
    fn test_growth_heuristic_respects_ratio() {
        // value 1 needs far more growth than a 40-unit node can host
        let mut l = ledger(&[("a", 40.0)]);
        let plan = planner()
            .create_batches_list(&target(1.0, 1.0), &mut l)
            .unwrap();
        assert_eq!(plan.len(), 1);
        let batch = &plan.batches()[0];
        let grow = batch.threads_of(JobKind::Secondary).unwrap();
        let restore = batch.threads_of(JobKind::Restore2).unwrap();
        assert!(grow > 0);
        assert_eq!(
            restore,
            JobCostModel::default().restorative_threads_for(JobKind::Secondary, grow)
        );
        assert!(l.available("a").unwrap() >= 0.0);
    }

    #[test]
    fn test_growth_without_fortify_uses_single_stage() {
        let config = PlannerConfig {
            model: JobCostModel::new(
                Default::default(),
                RestoreModel {
                    secondary_fortify: 0.0,
                    ..Default::default()
                },
            ),
            ..Default::default()
        };
        let mut l = ledger(&[("home", 1024.0)]);
        let plan = SaturationPlanner::new(config)
            .create_batches_list(&target(500.0, 1.0), &mut l)
            .unwrap();
        assert_eq!(plan.len(), 1);
        assert_eq!(plan.batches()[0].shape(), BatchShape::Grow);
    }
}
