// Batch & Plan Domain Model

use serde::{Deserialize, Serialize};

use super::job::{Job, JobKind};
use super::node::NodeId;

/// Where and how wide a single stage runs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placement {
    pub threads: u32,
    pub node_id: NodeId,
}

impl Placement {
    pub fn new(threads: u32, node_id: impl Into<String>) -> Self {
        Self {
            threads,
            node_id: node_id.into(),
        }
    }

    fn into_job(self, kind: JobKind) -> Job {
        Job::new(kind, self.threads, self.node_id)
    }
}

/// Shape of a batch (for logs and reports)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchShape {
    Restore,
    Grow,
    GrowRestore,
    Extraction,
}

/// An ordered, fixed-arity group of jobs executed together
///
/// Constructors fix the stage roles, so a batch can never hold jobs in the
/// wrong order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Batch {
    /// `[Restore1]`
    Restore(Job),
    /// `[Secondary]`
    Grow(Job),
    /// `[Secondary, Restore2]`
    GrowRestore([Job; 2]),
    /// `[Primary, Restore1, Secondary, Restore2]`
    Extraction([Job; 4]),
}

impl Batch {
    pub fn restore(placement: Placement) -> Self {
        Batch::Restore(placement.into_job(JobKind::Restore1))
    }

    pub fn grow(placement: Placement) -> Self {
        Batch::Grow(placement.into_job(JobKind::Secondary))
    }

    pub fn grow_restore(grow: Placement, restore: Placement) -> Self {
        Batch::GrowRestore([
            grow.into_job(JobKind::Secondary),
            restore.into_job(JobKind::Restore2),
        ])
    }

    pub fn extraction(
        primary: Placement,
        restore1: Placement,
        grow: Placement,
        restore2: Placement,
    ) -> Self {
        Batch::Extraction([
            primary.into_job(JobKind::Primary),
            restore1.into_job(JobKind::Restore1),
            grow.into_job(JobKind::Secondary),
            restore2.into_job(JobKind::Restore2),
        ])
    }

    /// Jobs in execution order
    pub fn jobs(&self) -> &[Job] {
        match self {
            Batch::Restore(job) | Batch::Grow(job) => std::slice::from_ref(job),
            Batch::GrowRestore(jobs) => jobs,
            Batch::Extraction(jobs) => jobs,
        }
    }

    pub fn shape(&self) -> BatchShape {
        match self {
            Batch::Restore(_) => BatchShape::Restore,
            Batch::Grow(_) => BatchShape::Grow,
            Batch::GrowRestore(_) => BatchShape::GrowRestore,
            Batch::Extraction(_) => BatchShape::Extraction,
        }
    }

    /// Thread count of the stage with the given role, if present
    pub fn threads_of(&self, kind: JobKind) -> Option<u32> {
        self.jobs()
            .iter()
            .find(|job| job.kind == kind)
            .map(|job| job.threads)
    }
}

/// Ordered sequence of batches produced by one planning pass
///
/// Immutable once built; the executor consumes it exactly once.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Plan {
    batches: Vec<Batch>,
}

impl Plan {
    pub fn new(batches: Vec<Batch>) -> Self {
        Self { batches }
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }

    pub fn len(&self) -> usize {
        self.batches.len()
    }

    pub fn batches(&self) -> &[Batch] {
        &self.batches
    }

    pub fn job_count(&self) -> usize {
        self.batches.iter().map(|b| b.jobs().len()).sum()
    }

    pub fn into_batches(self) -> Vec<Batch> {
        self.batches
    }
}

impl IntoIterator for Plan {
    type Item = Batch;
    type IntoIter = std::vec::IntoIter<Batch>;

    fn into_iter(self) -> Self::IntoIter {
        self.batches.into_iter()
    }
}
