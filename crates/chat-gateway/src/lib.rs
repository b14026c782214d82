//! # chat-gateway
//!
//! Gateway client: one WebSocket per shard, heartbeating, session resume and
//! reconnect policy, plus the coordinator that runs a set of shards.
//!
//! Every outbound frame is sent through the shared
//! [`chat_dispatch::DispatchQueue`]; inbound dispatches are reported as
//! [`ShardEvent`]s in arrival order per shard.

pub mod connection;
mod error;
mod events;
pub mod heartbeat;
pub mod protocol;
mod sender;
pub mod shard;
pub mod transport;

pub use connection::{
    ConnectionConfig, ConnectionManager, ConnectionState, Handshake, SessionState, ShardInfo,
};
pub use error::{FaultSeverity, GatewayError};
pub use events::{DispatchEvent, ShardEvent};
pub use heartbeat::HeartbeatMonitor;
pub use sender::GatewaySender;
pub use shard::{CoordinatorConfig, IdentifyGate, ShardCoordinator};
