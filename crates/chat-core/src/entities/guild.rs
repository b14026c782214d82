//! Guild entity - a community the bot has joined

use crate::payloads::GuildPayload;
use crate::value_objects::Snowflake;

/// Guild entity as cached by the client
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Guild {
    pub id: Snowflake,
    pub name: String,
    pub icon: Option<String>,
    pub description: Option<String>,
    pub owner_id: Option<Snowflake>,
    pub member_count: u32,
}

impl Guild {
    /// Create a guild stub known only by id (e.g. from READY)
    pub fn stub(id: Snowflake) -> Self {
        Self {
            id,
            ..Default::default()
        }
    }

    /// Build from a (possibly partial) payload
    pub fn from_payload(payload: &GuildPayload) -> Self {
        let mut guild = Self::stub(payload.id);
        guild.merge(payload);
        guild
    }

    /// Overwrite only the fields present in `payload`
    pub fn merge(&mut self, payload: &GuildPayload) {
        if let Some(name) = &payload.name {
            self.name.clone_from(name);
        }
        if let Some(icon) = &payload.icon {
            self.icon = Some(icon.clone());
        }
        if let Some(description) = &payload.description {
            self.description = Some(description.clone());
        }
        if let Some(owner_id) = payload.owner_id {
            self.owner_id = Some(owner_id);
        }
        if let Some(member_count) = payload.member_count {
            self.member_count = member_count;
        }
    }

    /// Check if a user is the guild owner
    #[inline]
    pub fn is_owner(&self, user_id: Snowflake) -> bool {
        self.owner_id == Some(user_id)
    }

    /// Shard owning this guild for `total_shards`
    #[inline]
    pub fn shard_id(&self, total_shards: u32) -> u32 {
        self.id.shard_id(total_shards)
    }
}
