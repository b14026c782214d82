//! Per-shard connection: lifecycle, session and reconnect policy

mod backoff;
mod manager;
mod session;
mod state;

pub use backoff::Backoff;
pub use manager::{ConnectionConfig, ConnectionManager, ShardInfo};
pub use session::{Handshake, SequenceCheck, SessionState};
pub use state::ConnectionState;
