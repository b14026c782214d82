//! Gateway intents
//!
//! Bitflags sent with Identify to select which event groups the gateway pushes.

use bitflags::bitflags;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

bitflags! {
    /// Event groups a bot subscribes to
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Intents: u32 {
        /// Guild and channel lifecycle events
        const GUILDS                  = 1 << 0;
        /// Member join/update/remove events
        const GUILD_MEMBERS           = 1 << 1;
        /// All messages in guild channels (privileged)
        const GUILD_MESSAGES          = 1 << 9;
        /// Reaction add/remove
        const GUILD_MESSAGE_REACTIONS = 1 << 10;
        /// Direct messages
        const DIRECT_MESSAGE          = 1 << 12;
        /// Interactions (buttons, commands)
        const INTERACTION             = 1 << 26;
        /// Message audit results
        const MESSAGE_AUDIT           = 1 << 27;
        /// Messages that mention the bot
        const PUBLIC_GUILD_MESSAGES   = 1 << 30;

        /// Sensible default for a public bot
        const DEFAULT = Self::GUILDS.bits()
            | Self::GUILD_MEMBERS.bits()
            | Self::PUBLIC_GUILD_MESSAGES.bits()
            | Self::DIRECT_MESSAGE.bits();
    }
}

impl Default for Intents {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl Serialize for Intents {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u32(self.bits())
    }
}

impl<'de> Deserialize<'de> for Intents {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let bits = u32::deserialize(deserializer)?;
        Ok(Self::from_bits_truncate(bits))
    }
}
