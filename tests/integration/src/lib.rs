//! Integration test utilities for the bot client
//!
//! Runs the whole client against an in-process mock gateway and a mock
//! unary API server.

pub mod fixtures;
pub mod helpers;

pub use fixtures::*;
pub use helpers::*;
