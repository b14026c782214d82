//! Shard set and identify concurrency

mod coordinator;
mod identify_gate;

pub use coordinator::{CoordinatorConfig, ShardCoordinator};
pub use identify_gate::{IdentifyGate, IdentifyPermit};
