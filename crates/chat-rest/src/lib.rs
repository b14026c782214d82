//! # chat-rest
//!
//! Unary API client. Requests are bucketed by route and sent through the
//! shared [`chat_dispatch::DispatchQueue`]; a process-wide `governor` limiter
//! caps the total request rate.

mod client;
mod models;
mod route;

pub use client::RestClient;
pub use models::{GatewayBot, SessionStartLimit};
pub use route::{Route, MAJOR_PARAMS};
