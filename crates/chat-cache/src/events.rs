//! Typed entity events produced by applying a dispatch to the cache

use serde_json::Value;

use chat_core::{Channel, Guild, GuildMember, Message, Snowflake, User};

#[derive(Debug, Clone)]
pub enum EntityEvent {
    /// A guild reached `Available`
    GuildAvailable(Guild),
    GuildUpdated {
        before: Option<Guild>,
        after: Guild,
    },
    /// Outage; the guild stays cached as a stub
    GuildUnavailable(Snowflake),
    /// The bot left or was removed
    GuildLeft(Guild),

    ChannelCreated(Channel),
    ChannelUpdated {
        before: Option<Channel>,
        after: Channel,
    },
    ChannelDeleted(Channel),

    MemberJoined {
        member: GuildMember,
        user: User,
    },
    MemberUpdated {
        before: Option<GuildMember>,
        after: GuildMember,
    },
    MemberLeft {
        guild_id: Snowflake,
        user_id: Snowflake,
        member: Option<GuildMember>,
    },

    MessageReceived {
        message: Message,
        author: Option<User>,
    },
    MessageUpdated {
        before: Option<Message>,
        after: Message,
    },
    MessageDeleted {
        id: Snowflake,
        channel_id: Snowflake,
        cached: Option<Message>,
    },

    CurrentUserUpdated {
        before: Option<User>,
        after: User,
    },

    /// Dispatch type this client does not model
    Unknown { event_type: String, payload: Value },
}

impl EntityEvent {
    /// Guild the event belongs to, if any
    pub fn guild_id(&self) -> Option<Snowflake> {
        match self {
            Self::GuildAvailable(guild) | Self::GuildLeft(guild) => Some(guild.id),
            Self::GuildUpdated { after, .. } => Some(after.id),
            Self::GuildUnavailable(id) => Some(*id),
            Self::ChannelCreated(channel) | Self::ChannelDeleted(channel) => channel.guild_id,
            Self::ChannelUpdated { after, .. } => after.guild_id,
            Self::MemberJoined { member, .. } => Some(member.guild_id),
            Self::MemberUpdated { after, .. } => Some(after.guild_id),
            Self::MemberLeft { guild_id, .. } => Some(*guild_id),
            Self::MessageReceived { message, .. } => message.guild_id,
            Self::MessageUpdated { after, .. } => after.guild_id,
            Self::MessageDeleted { cached, .. } => cached.as_ref().and_then(|m| m.guild_id),
            Self::CurrentUserUpdated { .. } | Self::Unknown { .. } => None,
        }
    }
}
