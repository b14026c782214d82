//! Message entity

use chrono::{DateTime, Utc};

use super::member::parse_timestamp;
use crate::payloads::MessagePayload;
use crate::value_objects::Snowflake;

/// Where a message was delivered from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MessageSource {
    /// Any message in a guild channel
    #[default]
    Guild,
    /// A guild message that mentions the bot
    Mention,
    /// A direct message
    Direct,
}

/// Message entity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: Snowflake,
    pub channel_id: Snowflake,
    pub guild_id: Option<Snowflake>,
    pub author_id: Option<Snowflake>,
    pub content: String,
    pub source: MessageSource,
    pub created_at: Option<DateTime<Utc>>,
    pub edited_at: Option<DateTime<Utc>>,
}

impl Message {
    /// Build from a payload delivered through `source`
    pub fn from_payload(payload: &MessagePayload, source: MessageSource) -> Self {
        let mut message = Self {
            id: payload.id,
            channel_id: payload.channel_id,
            guild_id: None,
            author_id: None,
            content: String::new(),
            source,
            created_at: None,
            edited_at: None,
        };
        message.merge(payload);
        message
    }

    /// Overwrite only the fields present in `payload`
    pub fn merge(&mut self, payload: &MessagePayload) {
        if let Some(guild_id) = payload.guild_id {
            self.guild_id = Some(guild_id);
        }
        if let Some(author) = &payload.author {
            self.author_id = Some(author.id);
        }
        if let Some(content) = &payload.content {
            self.content.clone_from(content);
        }
        if let Some(ts) = payload.timestamp.as_deref().and_then(parse_timestamp) {
            self.created_at = Some(ts);
        }
        if let Some(ts) = payload.edited_timestamp.as_deref().and_then(parse_timestamp) {
            self.edited_at = Some(ts);
        }
    }

    /// Check if message has been edited
    #[inline]
    pub fn is_edited(&self) -> bool {
        self.edited_at.is_some()
    }

    #[inline]
    pub fn is_direct(&self) -> bool {
        self.source == MessageSource::Direct
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payloads::UserPayload;

    #[test]
    fn test_message_from_payload() {
        let message = Message::from_payload(
            &MessagePayload {
                id: Snowflake::new(1),
                channel_id: Snowflake::new(2),
                author: Some(UserPayload {
                    id: Snowflake::new(3),
                    ..Default::default()
                }),
                content: Some("hi".to_string()),
                timestamp: Some("2022-01-01T00:00:00Z".to_string()),
                ..Default::default()
            },
            MessageSource::Direct,
        );

        assert_eq!(message.author_id, Some(Snowflake::new(3)));
        assert_eq!(message.content, "hi");
        assert!(message.created_at.is_some());
        assert!(!message.is_edited());
        assert!(message.is_direct());
    }

    #[test]
    fn test_edit_merge() {
        let mut message = Message::from_payload(
            &MessagePayload {
                id: Snowflake::new(1),
                channel_id: Snowflake::new(2),
                content: Some("old".to_string()),
                ..Default::default()
            },
            MessageSource::Guild,
        );

        message.merge(&MessagePayload {
            id: Snowflake::new(1),
            channel_id: Snowflake::new(2),
            edited_timestamp: Some("2022-01-01T00:00:05Z".to_string()),
            ..Default::default()
        });

        assert_eq!(message.content, "old");
        assert!(message.is_edited());
    }
}
