//! Events delivered to the bot

use std::time::Duration;

use chat_cache::EntityEvent;
use chat_dispatch::RateLimitNotice;
use chat_gateway::GatewayError;

#[derive(Debug, Clone)]
pub enum BotEvent {
    /// Every hosted shard is ready and the startup population policy is met
    Ready,
    ShardReady { shard_id: u32 },
    ShardResumed { shard_id: u32 },
    /// Transient fault; the shard reconnects on its own
    Reconnecting { shard_id: u32, reason: GatewayError },
    /// The shard stopped; `error` is set when a critical fault stopped it
    Disconnected {
        shard_id: u32,
        error: Option<GatewayError>,
    },
    LatencyUpdated { shard_id: u32, latency: Duration },
    RateLimited(RateLimitNotice),
    /// Applied to the cache before delivery
    Entity(EntityEvent),
}

impl BotEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Ready => "ready",
            Self::ShardReady { .. } => "shard_ready",
            Self::ShardResumed { .. } => "shard_resumed",
            Self::Reconnecting { .. } => "reconnecting",
            Self::Disconnected { .. } => "disconnected",
            Self::LatencyUpdated { .. } => "latency_updated",
            Self::RateLimited(_) => "rate_limited",
            Self::Entity(_) => "entity",
        }
    }
}
