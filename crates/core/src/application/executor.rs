//! Batch executor
//!
//! Launches every job of a plan, broadcasts one common end time, and waits
//! for the completions. Ordering comes from the shared end time plus fixed
//! spacing; the executor only verifies that every expected process reports.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::application::broker::ChannelBroker;
use crate::application::cost_model::JobCostModel;
use crate::application::rendezvous::RendezvousChannel;
use crate::application::worker::constants::{COMPLETION_GRACE, LAUNCH_BUFFER_MS};
use crate::domain::{
    Batch, ChannelId, JobKind, JobSpec, Plan, ProcessId, StageSpacing, TargetState,
};
use crate::error::{AppError, Result};
use crate::port::{JobLauncher, TimeProvider};

/// Executor timing configuration
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExecutorConfig {
    pub spacing: StageSpacing,
    /// Time given to launched workers before the start broadcast (ms)
    pub launch_buffer_ms: f64,
    /// Allowed lateness past the last planned completion (ms)
    pub completion_grace_ms: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            spacing: StageSpacing::default(),
            launch_buffer_ms: LAUNCH_BUFFER_MS,
            completion_grace_ms: COMPLETION_GRACE.as_millis() as u64,
        }
    }
}

/// A launched job the executor is still waiting on
#[derive(Debug, Clone)]
struct Outstanding {
    kind: JobKind,
    batch_index: usize,
    job_index: usize,
    /// Planned completion relative to the broadcast end time (ms)
    end_offset: f64,
}

/// What one `execute` call did
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionReport {
    pub batches: usize,
    pub launched: usize,
    /// Broadcast end time on the executor's clock (ms)
    pub end_time: f64,
    /// Process ids in the order their completions arrived
    pub completion_order: Vec<ProcessId>,
    /// Completions that arrived before one planned earlier
    pub out_of_order: usize,
}

impl ExecutionReport {
    pub fn in_order(&self) -> bool {
        self.out_of_order == 0
    }
}

pub struct BatchExecutor {
    launcher: Arc<dyn JobLauncher>,
    broker: Arc<ChannelBroker>,
    clock: Arc<dyn TimeProvider>,
    config: ExecutorConfig,
    channel: Option<Arc<RendezvousChannel>>,
    outstanding: HashMap<ProcessId, Outstanding>,
    longest_work_ms: f64,
}

impl BatchExecutor {
    pub fn new(
        launcher: Arc<dyn JobLauncher>,
        broker: Arc<ChannelBroker>,
        clock: Arc<dyn TimeProvider>,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            launcher,
            broker,
            clock,
            config,
            channel: None,
            outstanding: HashMap::new(),
            longest_work_ms: 0.0,
        }
    }

    pub fn channel_id(&self) -> Option<ChannelId> {
        self.channel.as_ref().map(|channel| channel.id())
    }

    pub fn outstanding(&self) -> usize {
        self.outstanding.len()
    }

    /// Acquire a channel from the broker and bind it to this executor
    pub fn bind_channel(&mut self, owner: &str, name: Option<&str>) -> Result<ChannelId> {
        let id = self.broker.acquire(owner, name)?;
        self.channel = Some(self.broker.channel(id)?);
        info!(channel = id, owner = %owner, "Executor bound to channel");
        Ok(id)
    }

    /// Return the bound channel to the broker
    pub fn release_channel(&mut self, name: Option<&str>) -> Result<()> {
        if let Some(channel) = self.channel.take() {
            self.broker.retire(channel.id(), name)?;
        }
        Ok(())
    }

    fn bound(&self) -> Result<Arc<RendezvousChannel>> {
        self.channel.clone().ok_or(AppError::ChannelUnassigned)
    }

    /// Launch every job of `batch`
    ///
    /// On a launch failure the jobs of this batch that already started are
    /// terminated before the error is returned.
    pub async fn deploy(
        &mut self,
        target: &TargetState,
        batch: &Batch,
        batch_index: usize,
    ) -> Result<Vec<ProcessId>> {
        let channel = self.bound()?;
        let mut pids = Vec::with_capacity(batch.jobs().len());

        for (job_index, job) in batch.jobs().iter().enumerate() {
            let spec = JobSpec {
                node_id: job.node_id.clone(),
                kind: job.kind,
                target: target.name.clone(),
                work_duration: JobCostModel::work_duration(job.kind, target.base_duration_ms),
                channel_id: Some(channel.id()),
                batch_index,
                job_index,
                spacing: self.config.spacing,
            };

            match self.launcher.launch(job, &spec).await {
                Ok(pid) => {
                    debug!(
                        pid = pid,
                        node = %job.node_id,
                        kind = %job.kind,
                        threads = job.threads,
                        batch_index = batch_index,
                        job_index = job_index,
                        "Job launched"
                    );
                    self.longest_work_ms = self.longest_work_ms.max(spec.work_duration);
                    self.outstanding.insert(
                        pid,
                        Outstanding {
                            kind: job.kind,
                            batch_index,
                            job_index,
                            end_offset: spec.end_moment(0.0),
                        },
                    );
                    pids.push(pid);
                }
                Err(e) => {
                    error!(
                        node = %job.node_id,
                        kind = %job.kind,
                        batch_index = batch_index,
                        error = %e,
                        "Launch failed, terminating the batch"
                    );
                    for pid in &pids {
                        self.terminate(*pid).await;
                    }
                    return Err(e.into());
                }
            }
        }

        Ok(pids)
    }

    /// Single start broadcast every launched worker anchors to
    pub fn broadcast_start(&self, end_time: f64) -> Result<()> {
        self.bound()?.broadcast_start(end_time)?;
        info!(end_time = %end_time, workers = self.outstanding.len(), "Start broadcast sent");
        Ok(())
    }

    /// Wait until every outstanding process reported, or `deadline` passes
    ///
    /// Returns the completion order. An unknown owner id, a timeout or a
    /// closed channel terminates every outstanding process and fails with
    /// `DesyncDetected`.
    pub async fn await_completion(&mut self, deadline: f64) -> Result<Vec<ProcessId>> {
        let channel = self.bound()?;
        let mut order = Vec::with_capacity(self.outstanding.len());

        while !self.outstanding.is_empty() {
            let remaining = (deadline - self.clock.now_millis()).max(0.0);
            let timeout = Duration::from_secs_f64(remaining / 1000.0);

            let reason = match channel.recv_done(timeout).await {
                Ok(pid) => match self.outstanding.remove(&pid) {
                    Some(done) => {
                        debug!(
                            pid = pid,
                            kind = %done.kind,
                            batch_index = done.batch_index,
                            job_index = done.job_index,
                            "Completion received"
                        );
                        order.push(pid);
                        continue;
                    }
                    None => format!("completion from unexpected process {}", pid),
                },
                Err(e) => e.to_string(),
            };

            return Err(self.desync(reason).await);
        }

        Ok(order)
    }

    /// Deploy, synchronize and await a whole plan
    pub async fn execute(&mut self, target: &TargetState, plan: &Plan) -> Result<ExecutionReport> {
        let channel = self.bound()?;
        if plan.is_empty() {
            return Ok(ExecutionReport::default());
        }

        self.longest_work_ms = 0.0;
        let mut launched = 0;
        for (batch_index, batch) in plan.batches().iter().enumerate() {
            match self.deploy(target, batch, batch_index).await {
                Ok(pids) => launched += pids.len(),
                Err(e) => {
                    self.terminate_all().await;
                    return Err(e);
                }
            }
        }

        let buffer = self.config.launch_buffer_ms;
        tokio::time::sleep(Duration::from_secs_f64(buffer / 1000.0)).await;

        let end_time = self.clock.now_millis() + self.longest_work_ms + buffer;
        let last_offset = self
            .outstanding
            .values()
            .map(|o| o.end_offset)
            .fold(0.0, f64::max);
        let deadline = end_time + last_offset + self.config.completion_grace_ms as f64;

        // planned end offset of every pid, kept for the ordering check
        let planned: HashMap<ProcessId, f64> = self
            .outstanding
            .iter()
            .map(|(pid, o)| (*pid, o.end_offset))
            .collect();

        if let Err(e) = self.broadcast_start(end_time) {
            self.terminate_all().await;
            return Err(e);
        }

        let result = self.await_completion(deadline).await;
        channel.reset().await;
        let completion_order = result?;

        let out_of_order = count_out_of_order(&completion_order, &planned);
        if out_of_order > 0 {
            warn!(out_of_order = out_of_order, "Completions landed out of planned order");
        }
        info!(
            batches = plan.len(),
            launched = launched,
            end_time = %end_time,
            "Plan executed"
        );

        Ok(ExecutionReport {
            batches: plan.len(),
            launched,
            end_time,
            completion_order,
            out_of_order,
        })
    }

    async fn desync(&mut self, reason: String) -> AppError {
        let outstanding = self.outstanding.len();
        error!(
            reason = %reason,
            outstanding = outstanding,
            "Desync detected, terminating outstanding processes"
        );
        self.terminate_all().await;
        AppError::DesyncDetected {
            reason,
            outstanding,
        }
    }

    async fn terminate_all(&mut self) {
        let pids: Vec<ProcessId> = self.outstanding.drain().map(|(pid, _)| pid).collect();
        for pid in pids {
            self.terminate(pid).await;
        }
    }

    async fn terminate(&mut self, pid: ProcessId) {
        self.outstanding.remove(&pid);
        if let Err(e) = self.launcher.kill(pid).await {
            warn!(pid = pid, error = %e, "Failed to terminate process");
        }
    }
}

/// Completions whose planned end precedes one that already arrived
fn count_out_of_order(order: &[ProcessId], planned: &HashMap<ProcessId, f64>) -> usize {
    let mut latest = f64::NEG_INFINITY;
    let mut count = 0;
    for pid in order {
        let Some(&end) = planned.get(pid) else {
            continue;
        };
        if end < latest {
            count += 1;
        } else {
            latest = end;
        }
    }
    count
}
