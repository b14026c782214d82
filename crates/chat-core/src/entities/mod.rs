//! Client-side entities built from gateway and REST payloads

mod channel;
mod guild;
mod member;
mod message;
mod user;

pub use channel::{kind_code, Channel, ChannelKind};
pub use guild::Guild;
pub use member::GuildMember;
pub use message::{Message, MessageSource};
pub use user::User;
