//! # chat-common
//!
//! Shared utilities: configuration, credentials, error classification, and telemetry.

pub mod auth;
pub mod config;
pub mod error;
pub mod telemetry;

// Re-export commonly used types at crate root
pub use auth::{Credentials, TokenKind};
pub use config::{
    AppSettings, CacheConfig, ClientConfig, ConfigError, DispatchConfig, Environment, EventConfig,
    FetchScope, GatewayConfig, RestConfig, ShardConfig, StartupFetchMode,
};
pub use error::{Categorize, ErrorCategory};
pub use telemetry::{
    init_tracing, init_tracing_with_config, try_init_tracing, try_init_tracing_with_config,
    TracingConfig, TracingError,
};
