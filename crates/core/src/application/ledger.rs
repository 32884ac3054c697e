//! Capacity ledger
//!
//! Tracks free capacity per node for one planning pass. Rebuilt from a fresh
//! fleet snapshot every pass; reservations here are bookkeeping only.

use tracing::debug;

use crate::application::cost_model::JobCostModel;
use crate::domain::node::to_micros;
use crate::domain::{Batch, Node};
use crate::error::{AppError, Result};
use crate::port::NodeSnapshot;

pub struct CapacityLedger {
    /// Kept sorted by (available, id) ascending
    nodes: Vec<Node>,
}

impl CapacityLedger {
    pub fn new(nodes: Vec<Node>) -> Self {
        let mut ledger = Self { nodes };
        ledger.sort();
        ledger
    }

    /// Build a ledger from a live fleet snapshot
    pub fn from_snapshot(snapshot: &[NodeSnapshot]) -> Result<Self> {
        let nodes = snapshot
            .iter()
            .map(|n| Node::from_snapshot(n.id.clone(), n.total_capacity, n.free_capacity))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(Self::new(nodes))
    }

    fn sort(&mut self) {
        self.nodes.sort_by(|a, b| {
            a.available_micros()
                .cmp(&b.available_micros())
                .then_with(|| a.id().cmp(b.id()))
        });
    }

    fn node_mut(&mut self, node_id: &str) -> Result<&mut Node> {
        self.nodes
            .iter_mut()
            .find(|n| n.id() == node_id)
            .ok_or_else(|| AppError::UnknownNode(node_id.to_string()))
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Nodes from least to most available capacity
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn available(&self, node_id: &str) -> Result<f64> {
        self.nodes
            .iter()
            .find(|n| n.id() == node_id)
            .map(Node::available)
            .ok_or_else(|| AppError::UnknownNode(node_id.to_string()))
    }

    /// Best fit: the node with the least available capacity that still fits
    pub fn find_suitable_node(&self, need: f64) -> Option<&str> {
        self.nodes.iter().find(|n| n.fits(need)).map(Node::id)
    }

    /// Node with the most available capacity
    pub fn largest_node(&self) -> Option<&Node> {
        self.nodes.last()
    }

    /// Sum of free capacity over all nodes (reporting only)
    pub fn total_available(&self) -> f64 {
        self.nodes.iter().map(Node::available).sum()
    }

    /// Take `amount` of capacity on `node_id`
    ///
    /// # Errors
    /// - AppError::UnknownNode if the node is not in this ledger
    /// - AppError::CapacityExhausted if the node does not have `amount` free
    pub fn reserve(&mut self, node_id: &str, amount: f64) -> Result<()> {
        let micros = to_micros(amount)?;
        let node = self.node_mut(node_id)?;
        if !node.take(micros) {
            return Err(AppError::CapacityExhausted(format!(
                "{} has {} free, {} requested",
                node_id,
                node.available(),
                amount
            )));
        }
        debug!(node = %node_id, amount = %amount, "Reserved capacity");
        self.sort();
        Ok(())
    }

    /// Give back `amount` of capacity on `node_id` (inverse of `reserve`)
    pub fn release(&mut self, node_id: &str, amount: f64) -> Result<()> {
        let micros = to_micros(amount)?;
        let node = self.node_mut(node_id)?;
        if !node.give_back(micros) {
            return Err(AppError::InvalidState(format!(
                "{} has only {} reserved, {} released",
                node_id,
                node.reserved(),
                amount
            )));
        }
        debug!(node = %node_id, amount = %amount, "Released capacity");
        self.sort();
        Ok(())
    }

    /// Reserve every job of a batch; all-or-nothing
    pub fn reserve_batch(&mut self, batch: &Batch, model: &JobCostModel) -> Result<()> {
        let mut reserved = Vec::with_capacity(batch.jobs().len());
        for job in batch.jobs() {
            let amount = model.cost(job.kind, job.threads);
            if let Err(e) = self.reserve(&job.node_id, amount) {
                for (node_id, amount) in reserved {
                    self.release(node_id, amount)?;
                }
                return Err(e);
            }
            reserved.push((job.node_id.as_str(), amount));
        }
        Ok(())
    }

    /// Release every job of a previously reserved batch
    pub fn release_batch(&mut self, batch: &Batch, model: &JobCostModel) -> Result<()> {
        for job in batch.jobs() {
            self.release(&job.node_id, model.cost(job.kind, job.threads))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Placement;
    use proptest::prelude::*;

    fn ledger(nodes: &[(&str, f64)]) -> CapacityLedger {
        CapacityLedger::new(
            nodes
                .iter()
                .map(|(id, cap)| Node::new(*id, *cap).unwrap())
                .collect(),
        )
    }

    #[test]
    fn test_find_suitable_is_best_fit() {
        let l = ledger(&[("big", 64.0), ("small", 4.0), ("mid", 16.0)]);
        assert_eq!(l.find_suitable_node(3.5), Some("small"));
        assert_eq!(l.find_suitable_node(10.0), Some("mid"));
        assert_eq!(l.find_suitable_node(64.0), Some("big"));
        assert_eq!(l.find_suitable_node(64.1), None);
    }

    #[test]
    fn test_ties_resolved_by_id() {
        let l = ledger(&[("zeta", 8.0), ("alpha", 8.0)]);
        assert_eq!(l.find_suitable_node(1.0), Some("alpha"));
        assert_eq!(l.largest_node().unwrap().id(), "zeta");
    }

    #[test]
    fn test_reserve_unknown_node() {
        let mut l = ledger(&[("a", 8.0)]);
        assert!(matches!(
            l.reserve("nope", 1.0),
            Err(AppError::UnknownNode(id)) if id == "nope"
        ));
        assert!(matches!(l.release("nope", 1.0), Err(AppError::UnknownNode(_))));
    }

    #[test]
    fn test_reserve_never_overcommits() {
        let mut l = ledger(&[("a", 8.0)]);
        l.reserve("a", 7.0).unwrap();
        let err = l.reserve("a", 1.5).unwrap_err();
        assert!(err.is_recoverable());
        assert_eq!(l.available("a").unwrap(), 1.0);
    }

    #[test]
    fn test_release_more_than_reserved_rejected() {
        let mut l = ledger(&[("a", 8.0)]);
        l.reserve("a", 2.0).unwrap();
        assert!(l.release("a", 3.0).is_err());
        assert_eq!(l.available("a").unwrap(), 6.0);
    }

    #[test]
    fn test_largest_tracks_reservations() {
        let mut l = ledger(&[("a", 10.0), ("b", 8.0)]);
        assert_eq!(l.largest_node().unwrap().id(), "a");
        l.reserve("a", 5.0).unwrap();
        assert_eq!(l.largest_node().unwrap().id(), "b");
        assert!((l.total_available() - 13.0).abs() < 1e-9);
    }

    #[test]
    fn test_snapshot_ledger_uses_free_capacity() {
        let snapshot = vec![NodeSnapshot {
            id: "home".to_string(),
            total_capacity: 32.0,
            free_capacity: 20.0,
        }];
        let l = CapacityLedger::from_snapshot(&snapshot).unwrap();
        assert_eq!(l.available("home").unwrap(), 20.0);
        assert_eq!(l.nodes()[0].reserved(), 12.0);
    }

    #[test]
    fn test_reserve_batch_is_all_or_nothing() {
        let model = JobCostModel::default();
        let mut l = ledger(&[("a", 16.0), ("b", 8.0)]);
        // second job does not fit on b
        let batch = Batch::grow_restore(Placement::new(2, "a"), Placement::new(5, "b"));
        assert!(l.reserve_batch(&batch, &model).is_err());
        assert_eq!(l.available("a").unwrap(), 16.0);
        assert_eq!(l.available("b").unwrap(), 8.0);
    }

    #[test]
    fn test_two_node_extraction_batch_round_trip() {
        let model = JobCostModel::default();
        let mut l = ledger(&[("A", 16.0), ("B", 8.0)]);
        let batch = Batch::extraction(
            Placement::new(2, "A"),
            Placement::new(1, "B"),
            Placement::new(2, "A"),
            Placement::new(1, "B"),
        );
        l.reserve_batch(&batch, &model).unwrap();
        assert!((l.available("A").unwrap() - (16.0 - 2.0 * 1.7 - 2.0 * 1.75)).abs() < 1e-9);
        assert!((l.available("B").unwrap() - (8.0 - 2.0 * 1.75)).abs() < 1e-9);
        l.release_batch(&batch, &model).unwrap();
        assert_eq!(l.available("A").unwrap(), 16.0);
        assert_eq!(l.available("B").unwrap(), 8.0);
    }

    proptest! {
        /// reserve then release restores the exact prior state
        #[test]
        fn prop_reserve_release_round_trip(
            capacity in 0.0f64..10_000.0,
            pre in 0.0f64..1.0,
            fraction in 0.0f64..1.0,
        ) {
            let mut l = ledger(&[("n", capacity)]);
            l.reserve("n", capacity * pre * 0.5).unwrap();
            let before = l.available("n").unwrap();
            let amount = before * fraction;
            l.reserve("n", amount).unwrap();
            l.release("n", amount).unwrap();
            prop_assert_eq!(l.available("n").unwrap(), before);
        }

        /// 0 <= reserved <= total across any sequence of attempts
        #[test]
        fn prop_reserved_within_bounds(
            capacity in 0.0f64..1_000.0,
            ops in prop::collection::vec((any::<bool>(), 0.0f64..300.0), 0..50),
        ) {
            let mut l = ledger(&[("n", capacity)]);
            for (is_reserve, amount) in ops {
                let _ = if is_reserve { l.reserve("n", amount) } else { l.release("n", amount) };
                let node = &l.nodes()[0];
                prop_assert!(node.reserved() >= 0.0);
                prop_assert!(node.reserved() <= node.total_capacity());
                prop_assert!(node.available() >= 0.0);
            }
        }
    }
}
