// World probe ports: live fleet and target state
// reason: async-trait, probes may query remote hosts
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::{NodeId, TargetState};
use crate::error::Result;

/// One node of a fleet snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeSnapshot {
    pub id: NodeId,
    pub total_capacity: f64,
    /// Capacity not used by running processes
    pub free_capacity: f64,
}

/// Fleet probe port
///
/// The ledger is rebuilt from a fresh snapshot on every planning pass.
#[async_trait]
pub trait FleetProbe: Send + Sync {
    /// Every node we are allowed to launch on
    async fn nodes(&self) -> Vec<NodeSnapshot>;
}

/// Target probe port (authoritative target state)
#[async_trait]
pub trait TargetProbe: Send + Sync {
    /// # Errors
    /// - AppError::NotFound if no target has this name
    async fn target(&self, name: &str) -> Result<TargetState>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use crate::error::AppError;
    use std::sync::{Arc, Mutex};

    /// Static fleet for testing
    pub struct MockFleetProbe {
        nodes: Arc<Mutex<Vec<NodeSnapshot>>>,
    }

    impl MockFleetProbe {
        /// Nodes given as `(id, capacity)`, all of it free
        pub fn new(nodes: &[(&str, f64)]) -> Self {
            let nodes = nodes
                .iter()
                .map(|(id, capacity)| NodeSnapshot {
                    id: id.to_string(),
                    total_capacity: *capacity,
                    free_capacity: *capacity,
                })
                .collect();
            Self {
                nodes: Arc::new(Mutex::new(nodes)),
            }
        }

        pub fn set_free(&self, id: &str, free: f64) {
            if let Some(node) = self.nodes.lock().unwrap().iter_mut().find(|n| n.id == id) {
                node.free_capacity = free;
            }
        }
    }

    #[async_trait]
    impl FleetProbe for MockFleetProbe {
        async fn nodes(&self) -> Vec<NodeSnapshot> {
            self.nodes.lock().unwrap().clone()
        }
    }

    /// Single mutable target for testing
    pub struct MockTargetProbe {
        state: Arc<Mutex<TargetState>>,
    }

    impl MockTargetProbe {
        pub fn new(state: TargetState) -> Self {
            Self {
                state: Arc::new(Mutex::new(state)),
            }
        }

        pub fn update(&self, f: impl FnOnce(&mut TargetState)) {
            f(&mut self.state.lock().unwrap());
        }
    }

    #[async_trait]
    impl TargetProbe for MockTargetProbe {
        async fn target(&self, name: &str) -> Result<TargetState> {
            let state = self.state.lock().unwrap().clone();
            if state.name != name {
                return Err(AppError::NotFound(format!("target {}", name)));
            }
            Ok(state)
        }
    }
}
