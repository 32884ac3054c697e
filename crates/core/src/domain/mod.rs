// Domain Layer - Pure business logic and entities

pub mod batch;
pub mod channel;
pub mod error;
pub mod job;
pub mod node;
pub mod target;

// Re-exports
pub use batch::{Batch, BatchShape, Placement, Plan};
pub use channel::{ChannelError, ChannelId, ChannelMessage};
pub use error::DomainError;
pub use job::{Job, JobKind, JobSpec, ProcessId, StageSpacing};
pub use node::{Node, NodeId};
pub use target::{GrowthParams, TargetState};
