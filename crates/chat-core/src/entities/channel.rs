//! Channel entity - common fields plus a closed set of kind-specific variants

use crate::payloads::ChannelPayload;
use crate::value_objects::Snowflake;

/// Wire codes for channel kinds
pub mod kind_code {
    pub const TEXT: u32 = 0;
    pub const DM: u32 = 1;
    pub const VOICE: u32 = 2;
    pub const CATEGORY: u32 = 4;
    pub const THREAD: u32 = 11;
    pub const FORUM: u32 = 15;
    pub const LIVE: u32 = 10005;
    pub const APPLICATION: u32 = 10006;
}

/// Kind-specific channel data
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelKind {
    Text { topic: Option<String> },
    Dm,
    Voice { bitrate: Option<u32> },
    Category,
    Thread { owner_id: Option<Snowflake> },
    Forum { topic: Option<String> },
    Live,
    Application,
    /// A kind this client does not model; the raw code is kept
    Other(u32),
}

impl ChannelKind {
    /// Empty variant for a wire code
    pub fn from_code(code: u32) -> Self {
        match code {
            kind_code::TEXT => Self::Text { topic: None },
            kind_code::DM => Self::Dm,
            kind_code::VOICE => Self::Voice { bitrate: None },
            kind_code::CATEGORY => Self::Category,
            kind_code::THREAD => Self::Thread { owner_id: None },
            kind_code::FORUM => Self::Forum { topic: None },
            kind_code::LIVE => Self::Live,
            kind_code::APPLICATION => Self::Application,
            other => Self::Other(other),
        }
    }

    /// Wire code of this variant
    pub fn code(&self) -> u32 {
        match self {
            Self::Text { .. } => kind_code::TEXT,
            Self::Dm => kind_code::DM,
            Self::Voice { .. } => kind_code::VOICE,
            Self::Category => kind_code::CATEGORY,
            Self::Thread { .. } => kind_code::THREAD,
            Self::Forum { .. } => kind_code::FORUM,
            Self::Live => kind_code::LIVE,
            Self::Application => kind_code::APPLICATION,
            Self::Other(code) => *code,
        }
    }

    fn merge(&mut self, payload: &ChannelPayload) {
        match self {
            Self::Text { topic } | Self::Forum { topic } => {
                if let Some(new_topic) = &payload.topic {
                    *topic = Some(new_topic.clone());
                }
            }
            Self::Voice { bitrate } => {
                if payload.bitrate.is_some() {
                    *bitrate = payload.bitrate;
                }
            }
            Self::Thread { owner_id } => {
                if payload.owner_id.is_some() {
                    *owner_id = payload.owner_id;
                }
            }
            _ => {}
        }
    }
}

impl Default for ChannelKind {
    fn default() -> Self {
        Self::Text { topic: None }
    }
}

/// Channel entity
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Channel {
    pub id: Snowflake,
    pub guild_id: Option<Snowflake>,
    pub name: Option<String>,
    pub position: i32,
    pub parent_id: Option<Snowflake>,
    pub kind: ChannelKind,
}

impl Channel {
    /// Build from a (possibly partial) payload
    pub fn from_payload(payload: &ChannelPayload) -> Self {
        let mut channel = Self {
            id: payload.id,
            kind: ChannelKind::from_code(payload.kind.unwrap_or(kind_code::TEXT)),
            ..Default::default()
        };
        channel.merge(payload);
        channel
    }

    /// Overwrite only the fields present in `payload`
    ///
    /// A changed kind code replaces the variant; variant fields carried over
    /// from the old kind are dropped.
    pub fn merge(&mut self, payload: &ChannelPayload) {
        if let Some(guild_id) = payload.guild_id {
            self.guild_id = Some(guild_id);
        }
        if let Some(name) = &payload.name {
            self.name = Some(name.clone());
        }
        if let Some(position) = payload.position {
            self.position = position;
        }
        if let Some(parent_id) = payload.parent_id {
            self.parent_id = Some(parent_id);
        }
        if let Some(code) = payload.kind {
            if code != self.kind.code() {
                self.kind = ChannelKind::from_code(code);
            }
        }
        self.kind.merge(payload);
    }

    /// Messages can be sent here
    #[inline]
    pub fn is_text_capable(&self) -> bool {
        matches!(
            self.kind,
            ChannelKind::Text { .. } | ChannelKind::Dm | ChannelKind::Thread { .. }
        )
    }

    #[inline]
    pub fn is_voice(&self) -> bool {
        matches!(self.kind, ChannelKind::Voice { .. } | ChannelKind::Live)
    }

    #[inline]
    pub fn is_category(&self) -> bool {
        matches!(self.kind, ChannelKind::Category)
    }

    /// Check if this is a guild channel
    #[inline]
    pub fn is_guild_channel(&self) -> bool {
        self.guild_id.is_some()
    }

    /// Topic for kinds that carry one
    pub fn topic(&self) -> Option<&str> {
        match &self.kind {
            ChannelKind::Text { topic } | ChannelKind::Forum { topic } => topic.as_deref(),
            _ => None,
        }
    }

    /// Mention string for message content
    pub fn mention(&self) -> String {
        format!("<#{}>", self.id)
    }
}
