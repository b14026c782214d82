//! Events a shard reports to its owner

use std::time::Duration;

use serde_json::Value;

use crate::error::GatewayError;

/// A Dispatch frame, in arrival order for its shard
#[derive(Debug, Clone)]
pub struct DispatchEvent {
    pub shard_id: u32,
    pub sequence: Option<u64>,
    pub event_type: String,
    pub payload: Value,
}

#[derive(Debug, Clone)]
pub enum ShardEvent {
    Dispatch(DispatchEvent),
    LatencyUpdated { shard_id: u32, latency: Duration },
    /// The session was dropped; state keyed on it (dedup) must be reset
    SessionInvalidated { shard_id: u32 },
    Reconnecting { shard_id: u32, reason: GatewayError },
    /// The manager stopped; `error` is set when a critical fault stopped it
    Disconnected {
        shard_id: u32,
        error: Option<GatewayError>,
    },
}

impl ShardEvent {
    pub fn shard_id(&self) -> u32 {
        match self {
            Self::Dispatch(event) => event.shard_id,
            Self::LatencyUpdated { shard_id, .. }
            | Self::SessionInvalidated { shard_id }
            | Self::Reconnecting { shard_id, .. }
            | Self::Disconnected { shard_id, .. } => *shard_id,
        }
    }
}
