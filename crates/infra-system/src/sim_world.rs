// Simulated world: fleet capacity and target state in memory
// reason: async-trait for the probe and operation ports, serde for world files
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info, warn};

use volley_core::application::cost_model::{apply_growth, JobCostModel};
use volley_core::application::CapacityLedger;
use volley_core::domain::{JobKind, Node, TargetState};
use volley_core::port::{
    FleetProbe, LaunchError, NodeSnapshot, OperationError, TargetOperation, TargetProbe,
};
use volley_core::{AppError, Result};

/// Instability is tracked at this resolution
const INSTABILITY_RESOLUTION: f64 = 1e6;

type TargetMap = BTreeMap<String, TargetState>;

/// One node entry of a world file
#[derive(Debug, Clone, Deserialize)]
pub struct NodeConfig {
    pub id: String,
    pub capacity: f64,
}

/// World file: `{"nodes": [{"id", "capacity"}], "targets": [TargetState]}`
#[derive(Debug, Clone, Deserialize)]
pub struct WorldFile {
    pub nodes: Vec<NodeConfig>,
    #[serde(default)]
    pub targets: Vec<TargetState>,
}

/// In-memory fleet and targets with the exact stage effect model
///
/// Launched jobs occupy node capacity until they exit; the fleet probe
/// reports what is left.
pub struct SimulatedWorld {
    model: JobCostModel,
    fleet: Mutex<CapacityLedger>,
    targets: Mutex<TargetMap>,
    extracted: Mutex<f64>,
}

impl SimulatedWorld {
    pub fn new(model: JobCostModel) -> Self {
        Self {
            model,
            fleet: Mutex::new(CapacityLedger::new(Vec::new())),
            targets: Mutex::new(BTreeMap::new()),
            extracted: Mutex::new(0.0),
        }
    }

    pub fn from_world_file(model: JobCostModel, world: WorldFile) -> Result<Self> {
        let nodes = world
            .nodes
            .into_iter()
            .map(|n| Node::new(n.id, n.capacity))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut targets = BTreeMap::new();
        for target in world.targets {
            target.validate()?;
            targets.insert(target.name.clone(), target);
        }

        info!(
            nodes = nodes.len(),
            targets = targets.len(),
            "Simulated world loaded"
        );
        Ok(Self {
            model,
            fleet: Mutex::new(CapacityLedger::new(nodes)),
            targets: Mutex::new(targets),
            extracted: Mutex::new(0.0),
        })
    }

    pub fn from_json(model: JobCostModel, raw: &str) -> Result<Self> {
        let world: WorldFile = serde_json::from_str(raw)?;
        Self::from_world_file(model, world)
    }

    pub fn load(model: JobCostModel, path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(model, &raw)
    }

    fn fleet(&self) -> Result<MutexGuard<'_, CapacityLedger>> {
        self.fleet
            .lock()
            .map_err(|_| AppError::Internal("fleet lock poisoned".to_string()))
    }

    fn targets(&self) -> std::result::Result<MutexGuard<'_, TargetMap>, OperationError> {
        self.targets
            .lock()
            .map_err(|_| OperationError::Failed("target lock poisoned".to_string()))
    }

    pub fn add_node(&self, id: &str, capacity: f64) -> Result<()> {
        let mut fleet = self.fleet()?;
        let mut nodes: Vec<Node> = fleet.nodes().to_vec();
        nodes.push(Node::new(id, capacity)?);
        *fleet = CapacityLedger::new(nodes);
        Ok(())
    }

    pub fn add_target(&self, target: TargetState) -> Result<()> {
        target.validate()?;
        self.targets()
            .map_err(|e| AppError::Internal(e.to_string()))?
            .insert(target.name.clone(), target);
        Ok(())
    }

    /// Current state of a target, if known
    pub fn target_state(&self, name: &str) -> Option<TargetState> {
        self.targets().ok()?.get(name).cloned()
    }

    /// Total value removed by extraction stages so far
    pub fn total_extracted(&self) -> f64 {
        self.extracted.lock().map(|v| *v).unwrap_or(0.0)
    }

    /// Mark `amount` of a node's capacity as used by a launched job
    pub fn occupy(&self, node_id: &str, amount: f64) -> std::result::Result<(), LaunchError> {
        let mut fleet = self
            .fleet()
            .map_err(|e| LaunchError::SpawnFailed(e.to_string()))?;
        fleet.reserve(node_id, amount).map_err(|e| match e {
            AppError::UnknownNode(node) => LaunchError::UnknownNode(node),
            AppError::CapacityExhausted(_) => LaunchError::InsufficientCapacity {
                node: node_id.to_string(),
                requested: amount,
            },
            other => LaunchError::SpawnFailed(other.to_string()),
        })
    }

    /// Give back capacity of an exited job
    pub fn free(&self, node_id: &str, amount: f64) {
        let result = self.fleet().and_then(|mut fleet| fleet.release(node_id, amount));
        if let Err(e) = result {
            warn!(node = %node_id, amount = %amount, error = %e, "Failed to free capacity");
        }
    }

    /// Apply a finished stage to the target; returns the value removed
    fn apply(&self, state: &mut TargetState, kind: JobKind, threads: u32) -> f64 {
        let mut stolen = 0.0;
        match kind {
            JobKind::Primary => {
                let fraction = (state.steal_per_thread * threads as f64).min(1.0);
                stolen = state.value * fraction;
                state.value *= 1.0 - fraction;
                state.instability += self.model.fortify_amount(kind, threads);
            }
            JobKind::Secondary => {
                let params = state.growth_params(state.instability);
                state.value = apply_growth(state.value, threads, &params).min(state.max_value);
                state.instability += self.model.fortify_amount(kind, threads);
            }
            JobKind::Restore1 | JobKind::Restore2 => {
                state.instability = (state.instability - self.model.restore_amount(threads))
                    .max(state.min_instability);
            }
        }
        state.instability =
            (state.instability * INSTABILITY_RESOLUTION).round() / INSTABILITY_RESOLUTION;
        stolen
    }
}

#[async_trait]
impl FleetProbe for SimulatedWorld {
    async fn nodes(&self) -> Vec<NodeSnapshot> {
        let Ok(fleet) = self.fleet() else {
            return Vec::new();
        };
        let mut nodes: Vec<NodeSnapshot> = fleet
            .nodes()
            .iter()
            .map(|node| NodeSnapshot {
                id: node.id().to_string(),
                total_capacity: node.total_capacity(),
                free_capacity: node.available(),
            })
            .collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        nodes
    }
}

#[async_trait]
impl TargetProbe for SimulatedWorld {
    async fn target(&self, name: &str) -> Result<TargetState> {
        self.target_state(name)
            .ok_or_else(|| AppError::NotFound(format!("target {}", name)))
    }
}

#[async_trait]
impl TargetOperation for SimulatedWorld {
    async fn perform(
        &self,
        kind: JobKind,
        target: &str,
        threads: u32,
        duration: Duration,
    ) -> std::result::Result<(), OperationError> {
        if !self.targets()?.contains_key(target) {
            return Err(OperationError::TargetNotFound(target.to_string()));
        }

        tokio::time::sleep(duration).await;

        let stolen = {
            let mut targets = self.targets()?;
            let state = targets
                .get_mut(target)
                .ok_or_else(|| OperationError::TargetNotFound(target.to_string()))?;
            let stolen = self.apply(state, kind, threads);
            debug!(
                target = %target,
                kind = %kind,
                threads = threads,
                value = %state.value,
                instability = %state.instability,
                "Stage landed"
            );
            stolen
        };

        if stolen > 0.0 {
            if let Ok(mut extracted) = self.extracted.lock() {
                *extracted += stolen;
            }
        }
        Ok(())
    }
}
