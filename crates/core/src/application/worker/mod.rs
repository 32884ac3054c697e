// Worker - protocol every launched job process runs

pub mod constants;
mod panic_guard;
mod shutdown;

pub use panic_guard::run_guarded;
pub use shutdown::{shutdown_channel, ShutdownSender, ShutdownToken};

use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::application::broker::ChannelBroker;
use crate::application::rendezvous::RendezvousChannel;
use crate::domain::{ChannelError, ChannelMessage, JobSpec, ProcessId};
use crate::port::{TargetOperation, TimeProvider};

/// How a worker process ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerOutcome {
    /// Operation performed and completion signalled
    Completed,
    /// Exited without (or without confirming) its operation
    Aborted(String),
}

impl WorkerOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, WorkerOutcome::Completed)
    }
}

/// One launched job: wait for the start broadcast, sleep until its moment,
/// perform the operation, signal completion
pub struct WorkerProtocol {
    pid: ProcessId,
    threads: u32,
    spec: JobSpec,
    broker: Arc<ChannelBroker>,
    operation: Arc<dyn TargetOperation>,
    clock: Arc<dyn TimeProvider>,
    shutdown: Option<ShutdownToken>,
}

impl WorkerProtocol {
    pub fn new(
        pid: ProcessId,
        threads: u32,
        spec: JobSpec,
        broker: Arc<ChannelBroker>,
        operation: Arc<dyn TargetOperation>,
        clock: Arc<dyn TimeProvider>,
    ) -> Self {
        Self {
            pid,
            threads,
            spec,
            broker,
            operation,
            clock,
            shutdown: None,
        }
    }

    /// Abort while still waiting if `shutdown` fires
    pub fn with_shutdown(mut self, shutdown: ShutdownToken) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Run to completion
    ///
    /// Holding the unassigned sentinel (no channel, unknown channel, or a
    /// channel closed before the broadcast) exits at once without touching
    /// the target.
    pub async fn run(self) -> WorkerOutcome {
        let Some(channel_id) = self.spec.channel_id else {
            return self.abort("no channel assigned");
        };
        let channel = match self.broker.channel(channel_id) {
            Ok(channel) => channel,
            Err(e) => return self.abort(&e.to_string()),
        };

        let end_time = match self.wait_for_moment(&channel).await {
            Ok(end_time) => end_time,
            Err(reason) => return self.abort(&reason),
        };

        let duration = Duration::from_secs_f64(self.spec.work_duration.max(0.0) / 1000.0);
        if let Err(e) = self
            .operation
            .perform(self.spec.kind, &self.spec.target, self.threads, duration)
            .await
        {
            return self.abort(&e.to_string());
        }

        // No await between signalling and returning: the launcher's cleanup
        // runs before the executor can observe the completion.
        if let Err(e) = channel.send(ChannelMessage::Done { owner_id: self.pid }) {
            return self.abort(&format!("completion not delivered: {}", e));
        }
        debug!(
            pid = self.pid,
            kind = %self.spec.kind,
            batch_index = self.spec.batch_index,
            job_index = self.spec.job_index,
            planned_end = %self.spec.end_moment(end_time),
            actual_end = %self.clock.now_millis(),
            "Job completed"
        );
        WorkerOutcome::Completed
    }

    /// Read the broadcast and sleep until this job's start moment
    async fn wait_for_moment(&self, channel: &RendezvousChannel) -> Result<f64, String> {
        let wait = async {
            let end_time = channel.await_start().await?;
            let delay = self.spec.start_moment(end_time) - self.clock.now_millis();
            if delay > 0.0 {
                sleep(Duration::from_secs_f64(delay / 1000.0)).await;
            } else if delay < 0.0 {
                warn!(pid = self.pid, late_ms = %(-delay), "Start moment already passed");
            }
            Ok::<f64, ChannelError>(end_time)
        };

        match self.shutdown.clone() {
            Some(mut shutdown) => {
                if shutdown.is_shutdown() {
                    return Err("shutdown requested".to_string());
                }
                tokio::select! {
                    result = wait => result.map_err(|e| e.to_string()),
                    _ = shutdown.wait() => Err("shutdown requested".to_string()),
                }
            }
            None => wait.await.map_err(|e| e.to_string()),
        }
    }

    fn abort(&self, reason: &str) -> WorkerOutcome {
        info!(
            pid = self.pid,
            kind = %self.spec.kind,
            reason = %reason,
            "Worker exiting without completing"
        );
        WorkerOutcome::Aborted(reason.to_string())
    }
}
