//! # chat-client
//!
//! Bot client built on the gateway, dispatch, unary and cache crates.
//!
//! ## Example
//!
//! ```ignore
//! use chat_client::{BotClient, BotEvent};
//! use chat_common::{ClientConfig, TokenKind};
//!
//! let client = BotClient::new(ClientConfig::from_env()?);
//! client.on(|event| async move {
//!     if let BotEvent::Ready = event {
//!         tracing::info!("Bot is ready");
//!     }
//! });
//!
//! client.login("1234", TokenKind::Bot, "secret").await?;
//! client.start()?;
//! ```

mod bus;
mod client;
mod error;
mod events;
mod fetcher;

pub use bus::{EventBus, EventHandler};
pub use client::BotClient;
pub use error::{ClientError, ClientResult};
pub use events::BotEvent;
pub use fetcher::RestGuildFetcher;

pub use chat_cache::{EntityEvent, SessionCache};
