// Rendezvous Channel Messages

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::job::ProcessId;

/// Channel number handed out by the broker
pub type ChannelId = u32;

/// Messages exchanged over the shared rendezvous channel
///
/// Wire format: `{"kind":"start","endTime":..}` and `{"kind":"done","ownerId":..}`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ChannelMessage {
    /// Broadcast by the executor: the common end time every worker anchors to
    Start {
        #[serde(rename = "endTime")]
        end_time: f64,
    },
    /// Written once by every worker when its operation finished
    Done {
        #[serde(rename = "ownerId")]
        owner_id: ProcessId,
    },
}

impl ChannelMessage {
    pub fn to_wire(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_wire(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw)
    }
}

/// Channel-level failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    /// The channel was closed (retired or cancelled) while waiting
    #[error("Channel closed")]
    Closed,

    #[error("Channel read timed out after {0}ms")]
    Timeout(u64),
}
