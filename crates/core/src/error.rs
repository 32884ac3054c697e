// Central Error Type for the Application

use thiserror::Error;

use crate::domain::{ChannelId, NodeId};

/// Application-level error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Domain error: {0}")]
    Domain(#[from] crate::domain::DomainError),

    /// Ledger operation on a node that is not part of the snapshot
    #[error("Unknown node: {0}")]
    UnknownNode(NodeId),

    /// No node (or pair of nodes) can satisfy a placement request
    #[error("Capacity exhausted: {0}")]
    CapacityExhausted(String),

    /// Executor method called before a channel was bound
    #[error("No channel assigned to this executor")]
    ChannelUnassigned,

    /// Unexpected or missing completion message
    #[error("Desync detected: {reason} ({outstanding} processes terminated)")]
    DesyncDetected { reason: String, outstanding: usize },

    #[error("Channel name already taken: {0}")]
    DuplicateName(String),

    #[error("Channel name is not defined: {0}")]
    UndefinedName(String),

    #[error("Channel broker is stopped")]
    BrokerStopped,

    #[error("Channel {0} is not allocated")]
    UnknownChannel(ChannelId),

    #[error("Channel error: {0}")]
    Channel(#[from] crate::domain::ChannelError),

    #[error("Launch error: {0}")]
    Launch(#[from] crate::port::LaunchError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Planning-time exhaustion is recoverable; everything else aborts the run
    pub fn is_recoverable(&self) -> bool {
        matches!(self, AppError::CapacityExhausted(_))
    }
}

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;
