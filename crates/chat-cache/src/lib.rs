//! # chat-cache
//!
//! In-memory session cache for the bot client.
//!
//! ## Features
//!
//! - **Entities**: guilds, channels and memberships merged field by field
//! - **Users**: one shared record per user, evicted with its last membership
//! - **Messages**: bounded recent-message cache and duplicate suppression
//! - **Population**: synchronous, asynchronous or lazy guild fetching after READY
//!
//! ## Example
//!
//! ```ignore
//! use chat_cache::{EntityEvent, SessionCache};
//!
//! let cache = SessionCache::new(config.cache.clone(), shard_count).with_fetcher(fetcher);
//!
//! for event in cache.apply(&dispatch.event_type, &dispatch.payload).await? {
//!     publish(event);
//! }
//! ```

mod cache;
mod dedup;
mod error;
mod events;
mod messages;
mod population;
mod users;

pub use cache::SessionCache;
pub use dedup::RecentMessages;
pub use error::{CacheError, CacheResult};
pub use events::EntityEvent;
pub use messages::MessageCache;
pub use population::{resolve_mode, GuildAvailability, GuildFetcher};
pub use users::UserArena;
