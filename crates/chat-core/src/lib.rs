//! # chat-core
//!
//! Entities, value objects and wire payloads shared by the bot client crates.
//! This crate has no dependency on networking or runtime crates.

pub mod entities;
pub mod event_types;
pub mod payloads;
pub mod value_objects;

// Re-export commonly used types at crate root
pub use event_types::EventType;
pub use entities::{Channel, ChannelKind, Guild, GuildMember, Message, MessageSource, User};
pub use value_objects::{Intents, Snowflake, SnowflakeParseError};
