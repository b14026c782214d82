//! Startup population policy and the guild fetch seam

use async_trait::async_trait;

use chat_common::{CacheConfig, StartupFetchMode};
use chat_core::payloads::{ChannelPayload, GuildPayload};
use chat_core::Snowflake;

use crate::error::CacheResult;

/// How complete a cached guild is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GuildAvailability {
    /// Known only by id
    #[default]
    Unavailable,
    /// A fetch is in flight
    Fetching,
    /// Full data present
    Available,
}

impl GuildAvailability {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unavailable => "unavailable",
            Self::Fetching => "fetching",
            Self::Available => "available",
        }
    }
}

/// Loads guild data the gateway did not deliver
#[async_trait]
pub trait GuildFetcher: Send + Sync {
    async fn fetch_guild(&self, guild_id: Snowflake) -> CacheResult<GuildPayload>;

    async fn fetch_channels(&self, guild_id: Snowflake) -> CacheResult<Vec<ChannelPayload>>;
}

/// Resolve `Auto` against the number of guilds known after READY
#[must_use]
pub fn resolve_mode(config: &CacheConfig, guild_count: usize) -> StartupFetchMode {
    match config.startup_mode {
        StartupFetchMode::Auto if guild_count <= config.small_guild_threshold => {
            StartupFetchMode::Synchronous
        }
        StartupFetchMode::Auto if guild_count > config.large_guild_threshold => {
            StartupFetchMode::Lazy
        }
        StartupFetchMode::Auto => StartupFetchMode::Asynchronous,
        mode => mode,
    }
}
