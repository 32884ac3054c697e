// In-process job launcher
// reason: async-trait for the JobLauncher port, tokio tasks as isolated worker processes
use async_trait::async_trait;
use rand::Rng;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::AbortHandle;
use tracing::{debug, info};

use volley_core::application::cost_model::JobCostModel;
use volley_core::application::{
    run_guarded, ChannelBroker, ShutdownToken, WorkerOutcome, WorkerProtocol,
};
use volley_core::domain::{Job, JobSpec, ProcessId};
use volley_core::port::{JobLauncher, LaunchError, TimeProvider};

use crate::sim_world::SimulatedWorld;

/// First pid handed out
const FIRST_PID: ProcessId = 1;

struct RunningJob {
    handle: AbortHandle,
    node_id: String,
    cost: f64,
}

type ProcessTable = Arc<Mutex<HashMap<ProcessId, RunningJob>>>;

/// Runs every job as its own tokio task executing the worker protocol
///
/// A job occupies its cost on the node from launch until it exits or is
/// killed. An optional random startup delay models process launch jitter.
pub struct TaskLauncher {
    world: Arc<SimulatedWorld>,
    broker: Arc<ChannelBroker>,
    clock: Arc<dyn TimeProvider>,
    model: JobCostModel,
    max_jitter: Duration,
    shutdown: Option<ShutdownToken>,
    next_pid: AtomicU32,
    running: ProcessTable,
}

impl TaskLauncher {
    /// Create a launcher
    ///
    /// # Arguments
    /// * `world` - Hosts capacity and performs the stage operations
    /// * `broker` - Resolves the channel id carried in each job spec
    /// * `clock` - Shared with the executor; start moments are on this clock
    pub fn new(
        world: Arc<SimulatedWorld>,
        broker: Arc<ChannelBroker>,
        clock: Arc<dyn TimeProvider>,
        model: JobCostModel,
    ) -> Self {
        Self {
            world,
            broker,
            clock,
            model,
            max_jitter: Duration::ZERO,
            shutdown: None,
            next_pid: AtomicU32::new(FIRST_PID),
            running: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Delay every worker start by a random amount up to `max_jitter`
    pub fn with_startup_jitter(mut self, max_jitter: Duration) -> Self {
        self.max_jitter = max_jitter;
        self
    }

    /// Workers still waiting for their moment abort on shutdown
    pub fn with_shutdown(mut self, shutdown: ShutdownToken) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Number of jobs currently alive
    pub fn running_count(&self) -> usize {
        self.running.lock().map(|table| table.len()).unwrap_or(0)
    }

    fn startup_delay(&self) -> Duration {
        if self.max_jitter.is_zero() {
            return Duration::ZERO;
        }
        let max_ms = self.max_jitter.as_secs_f64() * 1000.0;
        Duration::from_secs_f64(rand::thread_rng().gen_range(0.0..=max_ms) / 1000.0)
    }
}

/// Drop a job from the table and give its capacity back (once)
fn reap(running: &ProcessTable, world: &SimulatedWorld, pid: ProcessId) -> bool {
    let removed = running.lock().ok().and_then(|mut table| table.remove(&pid));
    match removed {
        Some(job) => {
            world.free(&job.node_id, job.cost);
            true
        }
        None => false,
    }
}

#[async_trait]
impl JobLauncher for TaskLauncher {
    async fn launch(&self, job: &Job, spec: &JobSpec) -> Result<ProcessId, LaunchError> {
        let cost = self.model.cost(job.kind, job.threads);
        let pid = self.next_pid.fetch_add(1, Ordering::SeqCst);
        let delay = self.startup_delay();

        let mut protocol = WorkerProtocol::new(
            pid,
            job.threads,
            spec.clone(),
            Arc::clone(&self.broker),
            self.world.clone(),
            Arc::clone(&self.clock),
        );
        if let Some(shutdown) = &self.shutdown {
            protocol = protocol.with_shutdown(shutdown.clone());
        }

        // The table lock is held across spawn so the task cannot reap itself
        // before it is registered.
        let mut table = self
            .running
            .lock()
            .map_err(|_| LaunchError::SpawnFailed("process table poisoned".to_string()))?;
        self.world.occupy(&job.node_id, cost)?;

        let running = Arc::clone(&self.running);
        let world = Arc::clone(&self.world);
        let handle = tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let outcome = run_guarded(protocol.run()).await;
            reap(&running, &world, pid);
            if let WorkerOutcome::Aborted(reason) = &outcome {
                debug!(pid = pid, reason = %reason, "Worker aborted");
            }
            outcome
        });

        table.insert(
            pid,
            RunningJob {
                handle: handle.abort_handle(),
                node_id: job.node_id.clone(),
                cost,
            },
        );
        debug!(
            pid = pid,
            node = %job.node_id,
            kind = %job.kind,
            threads = job.threads,
            startup_delay_ms = %(delay.as_secs_f64() * 1000.0),
            "Worker task spawned"
        );
        Ok(pid)
    }

    async fn kill(&self, pid: ProcessId) -> Result<(), LaunchError> {
        let removed = self
            .running
            .lock()
            .map_err(|_| LaunchError::Killed("process table poisoned".to_string()))?
            .remove(&pid);
        let Some(job) = removed else {
            return Err(LaunchError::UnknownProcess(pid));
        };

        job.handle.abort();
        self.world.free(&job.node_id, job.cost);
        info!(pid = pid, node = %job.node_id, "Worker task killed");
        Ok(())
    }

    fn is_alive(&self, pid: ProcessId) -> bool {
        self.running
            .lock()
            .map(|table| table.contains_key(&pid))
            .unwrap_or(false)
    }
}
