//! Member entity - a user's membership in a guild

use chrono::{DateTime, Utc};

use crate::payloads::MemberPayload;
use crate::value_objects::Snowflake;

/// Guild member entity (junction between User and Guild)
///
/// The user itself lives in the cache's shared user table; a member only
/// holds the id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuildMember {
    pub guild_id: Snowflake,
    pub user_id: Snowflake,
    pub nickname: Option<String>,
    pub role_ids: Vec<Snowflake>,
    pub joined_at: Option<DateTime<Utc>>,
}

impl GuildMember {
    /// Create a new GuildMember
    pub fn new(guild_id: Snowflake, user_id: Snowflake) -> Self {
        Self {
            guild_id,
            user_id,
            nickname: None,
            role_ids: Vec::new(),
            joined_at: None,
        }
    }

    /// Build from a payload for `guild_id`
    pub fn from_payload(guild_id: Snowflake, payload: &MemberPayload) -> Self {
        let mut member = Self::new(guild_id, payload.user.id);
        member.merge(payload);
        member
    }

    /// Overwrite only the fields present in `payload`
    pub fn merge(&mut self, payload: &MemberPayload) {
        if let Some(nick) = &payload.nick {
            self.nickname = Some(nick.clone());
        }
        if let Some(roles) = &payload.roles {
            self.role_ids.clone_from(roles);
        }
        if let Some(joined_at) = payload.joined_at.as_deref().and_then(parse_timestamp) {
            self.joined_at = Some(joined_at);
        }
    }

    /// Get display name (nickname if set, otherwise fallback)
    pub fn display_name<'a>(&'a self, username: &'a str) -> &'a str {
        self.nickname.as_deref().unwrap_or(username)
    }

    /// Check if member has a specific role
    #[inline]
    pub fn has_role(&self, role_id: Snowflake) -> bool {
        self.role_ids.contains(&role_id)
    }
}

/// Parse an RFC 3339 wire timestamp; malformed values are ignored
pub(crate) fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}
