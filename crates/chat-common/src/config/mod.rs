//! Configuration structs

mod client_config;

pub use client_config::{
    AppSettings, CacheConfig, ClientConfig, ConfigError, DispatchConfig, Environment, EventConfig,
    FetchScope, GatewayConfig, RestConfig, ShardConfig, StartupFetchMode,
};
