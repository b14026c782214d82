//! Guild fetches for the session cache, served by the unary API

use async_trait::async_trait;

use chat_cache::{CacheError, CacheResult, GuildFetcher};
use chat_core::payloads::{ChannelPayload, GuildPayload};
use chat_core::Snowflake;
use chat_dispatch::DispatchError;
use chat_rest::RestClient;

pub struct RestGuildFetcher {
    rest: RestClient,
}

impl RestGuildFetcher {
    pub fn new(rest: RestClient) -> Self {
        Self { rest }
    }
}

#[async_trait]
impl GuildFetcher for RestGuildFetcher {
    async fn fetch_guild(&self, guild_id: Snowflake) -> CacheResult<GuildPayload> {
        self.rest
            .get_guild(guild_id)
            .await
            .map_err(|err| fetch_error(guild_id, &err))
    }

    async fn fetch_channels(&self, guild_id: Snowflake) -> CacheResult<Vec<ChannelPayload>> {
        self.rest
            .get_guild_channels(guild_id)
            .await
            .map_err(|err| fetch_error(guild_id, &err))
    }
}

fn fetch_error(guild_id: Snowflake, err: &DispatchError) -> CacheError {
    CacheError::Fetch {
        guild_id,
        reason: err.to_string(),
    }
}
