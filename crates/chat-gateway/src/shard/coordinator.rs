//! Shard coordinator
//!
//! Owns one connection manager per hosted shard, routes guilds to shards
//! and shares one identify gate between them.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};

use chat_core::Snowflake;
use chat_dispatch::DispatchQueue;

use super::IdentifyGate;
use crate::connection::{ConnectionConfig, ConnectionManager, ConnectionState, ShardInfo};
use crate::events::ShardEvent;

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub total_shards: u32,
    /// Shards hosted by this process; all of them when `None`
    pub shard_ids: Option<Vec<u32>>,
    pub max_concurrency: u32,
    pub identify_cooldown: Duration,
    pub connection: ConnectionConfig,
}

pub struct ShardCoordinator {
    total_shards: u32,
    managers: Vec<Arc<ConnectionManager>>,
    gate: Arc<IdentifyGate>,
}

impl ShardCoordinator {
    /// Build the managers; each returned receiver carries one shard's events
    pub fn new(
        config: CoordinatorConfig,
        queue: DispatchQueue,
        populated: watch::Receiver<bool>,
    ) -> (Self, Vec<mpsc::UnboundedReceiver<ShardEvent>>) {
        let total_shards = config.total_shards.max(1);
        let shard_ids: Vec<u32> = config
            .shard_ids
            .unwrap_or_else(|| (0..total_shards).collect())
            .into_iter()
            .filter(|id| *id < total_shards)
            .collect();

        let gate = Arc::new(IdentifyGate::new(
            config.max_concurrency,
            config.identify_cooldown,
        ));
        // A lone shard never contends for identify slots
        let shared_gate = (shard_ids.len() > 1).then(|| Arc::clone(&gate));
        let connection = Arc::new(config.connection);

        let (managers, receivers) = shard_ids
            .into_iter()
            .map(|id| {
                ConnectionManager::new(
                    ShardInfo {
                        id,
                        total: total_shards,
                    },
                    Arc::clone(&connection),
                    queue.clone(),
                    shared_gate.clone(),
                    populated.clone(),
                )
            })
            .unzip();

        tracing::debug!(
            total_shards,
            max_concurrency = gate.max_concurrency(),
            "Shard coordinator created"
        );

        (
            Self {
                total_shards,
                managers,
                gate,
            },
            receivers,
        )
    }

    pub fn total_shards(&self) -> u32 {
        self.total_shards
    }

    /// Shard that receives events for `guild_id`
    pub fn shard_for_guild(&self, guild_id: Snowflake) -> u32 {
        guild_id.shard_id(self.total_shards)
    }

    pub fn managers(&self) -> &[Arc<ConnectionManager>] {
        &self.managers
    }

    pub fn manager(&self, shard_id: u32) -> Option<&Arc<ConnectionManager>> {
        self.managers.iter().find(|m| m.shard().id == shard_id)
    }

    pub fn manager_for_guild(&self, guild_id: Snowflake) -> Option<&Arc<ConnectionManager>> {
        self.manager(self.shard_for_guild(guild_id))
    }

    pub fn set_max_concurrency(&self, max_concurrency: u32) {
        self.gate.set_max_concurrency(max_concurrency);
    }

    /// Start every shard; identify slots stagger the handshakes
    pub fn start(&self) {
        tracing::info!(shards = self.managers.len(), "Starting shards");
        for manager in &self.managers {
            manager.start();
        }
    }

    pub fn stop(&self) {
        tracing::info!(shards = self.managers.len(), "Stopping shards");
        for manager in &self.managers {
            manager.stop();
        }
    }

    /// Wait until every shard has finished tearing down
    pub async fn wait_stopped(&self) {
        for manager in &self.managers {
            manager.wait_stopped().await;
        }
    }

    pub fn states(&self) -> Vec<(u32, ConnectionState)> {
        self.managers
            .iter()
            .map(|m| (m.shard().id, m.state()))
            .collect()
    }

    /// Mean heartbeat latency over shards that have measured one
    pub fn average_latency(&self) -> Option<Duration> {
        let samples: Vec<Duration> = self.managers.iter().filter_map(|m| m.latency()).collect();
        if samples.is_empty() {
            return None;
        }
        let total: Duration = samples.iter().sum();
        Some(total / samples.len() as u32)
    }
}
