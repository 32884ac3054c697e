// Job Launcher Port
// Abstraction over process launch: launch(node, spec) -> process id

use crate::domain::{Job, JobSpec, ProcessId};
use async_trait::async_trait;
use thiserror::Error;

/// Launch errors
#[derive(Error, Debug)]
pub enum LaunchError {
    #[error("Spawn failed: {0}")]
    SpawnFailed(String),

    #[error("Node {node} cannot host {requested} more capacity")]
    InsufficientCapacity { node: String, requested: f64 },

    #[error("Unknown node: {0}")]
    UnknownNode(String),

    #[error("Unknown process: {0}")]
    UnknownProcess(ProcessId),

    #[error("Process killed: {0}")]
    Killed(String),
}

/// Job Launcher trait
///
/// Implementations:
/// - TaskLauncher: runs each job as an isolated tokio task
#[async_trait]
pub trait JobLauncher: Send + Sync {
    /// Launch a job on its node
    ///
    /// The launched process runs the worker protocol with `spec` and must not
    /// perform its operation before the start broadcast.
    ///
    /// # Errors
    /// - LaunchError::InsufficientCapacity if the node cannot host the job
    /// - LaunchError::SpawnFailed if the process cannot be started
    async fn launch(&self, job: &Job, spec: &JobSpec) -> Result<ProcessId, LaunchError>;

    /// Terminate a running process
    ///
    /// # Errors
    /// - LaunchError::UnknownProcess if the pid is not (or no longer) running
    async fn kill(&self, pid: ProcessId) -> Result<(), LaunchError>;

    /// Check if a process is still alive
    fn is_alive(&self, pid: ProcessId) -> bool;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::collections::HashSet;
    use std::sync::{Arc, Mutex};

    /// Mock launcher behavior
    #[derive(Debug, Clone)]
    pub enum MockBehavior {
        /// Every launch succeeds
        Success,
        /// The n-th launch (0-based) and every later one fail
        FailFrom(usize),
    }

    /// Mock Job Launcher for testing
    ///
    /// Hands out sequential pids starting at 100. Launched processes never
    /// complete on their own; tests drive the channel directly.
    pub struct MockJobLauncher {
        behavior: MockBehavior,
        launched: Arc<Mutex<Vec<(Job, JobSpec, ProcessId)>>>,
        alive: Arc<Mutex<HashSet<ProcessId>>>,
        killed: Arc<Mutex<Vec<ProcessId>>>,
    }

    impl MockJobLauncher {
        pub fn new(behavior: MockBehavior) -> Self {
            Self {
                behavior,
                launched: Arc::new(Mutex::new(Vec::new())),
                alive: Arc::new(Mutex::new(HashSet::new())),
                killed: Arc::new(Mutex::new(Vec::new())),
            }
        }

        pub fn new_success() -> Self {
            Self::new(MockBehavior::Success)
        }

        pub fn launched(&self) -> Vec<(Job, JobSpec, ProcessId)> {
            self.launched.lock().unwrap().clone()
        }

        pub fn killed(&self) -> Vec<ProcessId> {
            self.killed.lock().unwrap().clone()
        }

        /// Mark a process as exited (as a real worker would after signalling)
        pub fn finish(&self, pid: ProcessId) {
            self.alive.lock().unwrap().remove(&pid);
        }
    }

    #[async_trait]
    impl JobLauncher for MockJobLauncher {
        async fn launch(&self, job: &Job, spec: &JobSpec) -> Result<ProcessId, LaunchError> {
            let mut launched = self.launched.lock().unwrap();
            if let MockBehavior::FailFrom(n) = self.behavior {
                if launched.len() >= n {
                    return Err(LaunchError::SpawnFailed("mock failure".to_string()));
                }
            }
            let pid = 100 + launched.len() as ProcessId;
            launched.push((job.clone(), spec.clone(), pid));
            self.alive.lock().unwrap().insert(pid);
            Ok(pid)
        }

        async fn kill(&self, pid: ProcessId) -> Result<(), LaunchError> {
            if !self.alive.lock().unwrap().remove(&pid) {
                return Err(LaunchError::UnknownProcess(pid));
            }
            self.killed.lock().unwrap().push(pid);
            Ok(())
        }

        fn is_alive(&self, pid: ProcessId) -> bool {
            self.alive.lock().unwrap().contains(&pid)
        }
    }
}
