//! User entity - a platform account seen by the bot

use crate::payloads::UserPayload;
use crate::value_objects::Snowflake;

/// User entity as cached by the client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: Snowflake,
    pub username: String,
    pub avatar: Option<String>,
    pub bot: bool,
}

impl User {
    /// Create a user with only an id and name
    pub fn new(id: Snowflake, username: impl Into<String>) -> Self {
        Self {
            id,
            username: username.into(),
            avatar: None,
            bot: false,
        }
    }

    /// Build from a (possibly partial) payload
    pub fn from_payload(payload: &UserPayload) -> Self {
        let mut user = Self::new(payload.id, String::new());
        user.merge(payload);
        user
    }

    /// Overwrite only the fields present in `payload`
    pub fn merge(&mut self, payload: &UserPayload) {
        if let Some(username) = &payload.username {
            self.username.clone_from(username);
        }
        if let Some(avatar) = &payload.avatar {
            self.avatar = Some(avatar.clone());
        }
        if let Some(bot) = payload.bot {
            self.bot = bot;
        }
    }

    /// Mention string for message content
    pub fn mention(&self) -> String {
        format!("<@{}>", self.id)
    }

    /// Check if user is a bot account
    #[inline]
    pub fn is_bot(&self) -> bool {
        self.bot
    }
}
