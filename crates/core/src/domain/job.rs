// Job Domain Model

use serde::{Deserialize, Serialize};

use super::channel::ChannelId;
use super::node::NodeId;

/// Identifier of a launched worker process
pub type ProcessId = u32;

/// Stage role of a job
///
/// Extraction batches use all four roles in declaration order; preparation
/// batches use a subsequence of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobKind {
    /// Extraction stage: removes a fraction of the target's value
    Primary,
    /// Restorative stage paired to extraction
    #[serde(rename = "RESTORE_1")]
    Restore1,
    /// Growth stage: raises the target's value
    Secondary,
    /// Restorative stage paired to growth
    #[serde(rename = "RESTORE_2")]
    Restore2,
}

impl JobKind {
    pub fn is_restorative(self) -> bool {
        matches!(self, JobKind::Restore1 | JobKind::Restore2)
    }
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobKind::Primary => write!(f, "PRIMARY"),
            JobKind::Restore1 => write!(f, "RESTORE_1"),
            JobKind::Secondary => write!(f, "SECONDARY"),
            JobKind::Restore2 => write!(f, "RESTORE_2"),
        }
    }
}

/// One stage of work placed on a node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub kind: JobKind,
    pub threads: u32,
    pub node_id: NodeId,
}

impl Job {
    pub fn new(kind: JobKind, threads: u32, node_id: impl Into<String>) -> Self {
        Self {
            kind,
            threads,
            node_id: node_id.into(),
        }
    }
}

/// Fixed spacing between the target completion times of stages
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageSpacing {
    pub between_batches_ms: f64,
    pub between_jobs_ms: f64,
}

impl Default for StageSpacing {
    fn default() -> Self {
        use crate::application::worker::constants::{
            TIME_BETWEEN_BATCHES_MS, TIME_BETWEEN_JOBS_MS,
        };
        Self {
            between_batches_ms: TIME_BETWEEN_BATCHES_MS,
            between_jobs_ms: TIME_BETWEEN_JOBS_MS,
        }
    }
}

/// Dispatch payload handed to a launched worker
///
/// Opaque to the launcher; consumed by the worker protocol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSpec {
    pub node_id: NodeId,
    pub kind: JobKind,
    pub target: String,
    /// How long the operation itself takes (ms)
    pub work_duration: f64,
    /// `None` is the unassigned sentinel: the worker must exit immediately
    pub channel_id: Option<ChannelId>,
    pub batch_index: usize,
    pub job_index: usize,
    #[serde(default)]
    pub spacing: StageSpacing,
}

impl JobSpec {
    /// Absolute moment this job must finish, given the broadcast end time
    pub fn end_moment(&self, end_time: f64) -> f64 {
        end_time
            + self.batch_index as f64 * self.spacing.between_batches_ms
            + self.job_index as f64 * self.spacing.between_jobs_ms
    }

    /// Absolute moment this job must start its operation
    pub fn start_moment(&self, end_time: f64) -> f64 {
        self.end_moment(end_time) - self.work_duration
    }
}
