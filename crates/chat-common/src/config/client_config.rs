//! Client configuration structs
//!
//! Loads configuration from environment variables or a config file.

use serde::Deserialize;
use std::env;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Top-level bot client configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub app: AppSettings,
    pub gateway: GatewayConfig,
    pub shards: ShardConfig,
    pub cache: CacheConfig,
    pub rest: RestConfig,
    pub dispatch: DispatchConfig,
    pub events: EventConfig,
}

/// General application settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    pub name: String,
    pub env: Environment,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            name: default_app_name(),
            env: Environment::default(),
        }
    }
}

/// Environment type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Staging,
    Production,
}

impl Environment {
    #[must_use]
    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }

    #[must_use]
    pub fn is_development(&self) -> bool {
        matches!(self, Self::Development)
    }
}

impl FromStr for Environment {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "production" => Ok(Self::Production),
            "staging" => Ok(Self::Staging),
            "development" => Ok(Self::Development),
            _ => Err(()),
        }
    }
}

/// Gateway connection settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Replaces the URL returned by the bootstrap call
    pub host_override: Option<String>,
    /// Bound on connect + Hello + handshake
    pub connect_timeout_ms: u64,
    /// Multiplier applied to the server heartbeat interval
    pub heartbeat_factor: f64,
    /// Extra silence tolerated past one interval before a socket is declared dead
    pub heartbeat_grace_ms: u64,
    /// Intent bits sent with Identify
    pub intents: u32,
    /// Request zlib-stream compressed frames
    pub compress: bool,
    pub reconnect_base_ms: u64,
    pub reconnect_max_ms: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host_override: None,
            connect_timeout_ms: default_connect_timeout_ms(),
            heartbeat_factor: default_heartbeat_factor(),
            heartbeat_grace_ms: default_heartbeat_grace_ms(),
            intents: default_intents(),
            compress: false,
            reconnect_base_ms: default_reconnect_base_ms(),
            reconnect_max_ms: default_reconnect_max_ms(),
        }
    }
}

impl GatewayConfig {
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    #[must_use]
    pub fn heartbeat_grace(&self) -> Duration {
        Duration::from_millis(self.heartbeat_grace_ms)
    }
}

/// Sharding settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ShardConfig {
    /// Explicit shard count; `None` uses the platform recommendation
    pub total_shards: Option<u32>,
    /// Shards hosted by this process; `None` hosts all of them
    pub shard_ids: Option<Vec<u32>>,
    /// Identify slots until the bootstrap advertises its own
    pub identify_max_concurrency: u32,
    /// Time a slot stays taken after an Identify
    pub identify_cooldown_ms: u64,
}

impl Default for ShardConfig {
    fn default() -> Self {
        Self {
            total_shards: None,
            shard_ids: None,
            identify_max_concurrency: 1,
            identify_cooldown_ms: default_identify_cooldown_ms(),
        }
    }
}

impl ShardConfig {
    #[must_use]
    pub fn identify_cooldown(&self) -> Duration {
        Duration::from_millis(self.identify_cooldown_ms)
    }
}

/// How the cache is filled after READY
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StartupFetchMode {
    /// Ready waits until every guild is available
    Synchronous,
    /// Ready fires at once, a background sweep fills the rest
    Asynchronous,
    /// Guilds are fetched only when an event needs them
    Lazy,
    /// Picked from the guild count at startup
    #[default]
    Auto,
}

impl FromStr for StartupFetchMode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "synchronous" | "sync" => Ok(Self::Synchronous),
            "asynchronous" | "async" => Ok(Self::Asynchronous),
            "lazy" => Ok(Self::Lazy),
            "auto" => Ok(Self::Auto),
            _ => Err(()),
        }
    }
}

/// What a guild fetch loads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FetchScope {
    Guild,
    #[default]
    GuildAndChannels,
}

impl FromStr for FetchScope {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "guild" => Ok(Self::Guild),
            "guild_and_channels" | "channels" => Ok(Self::GuildAndChannels),
            _ => Err(()),
        }
    }
}

/// Session cache settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Messages kept per shard; 0 disables the message cache
    pub message_cache_size: usize,
    pub startup_mode: StartupFetchMode,
    pub fetch_scope: FetchScope,
    /// Up to this many guilds, `Auto` behaves as `Synchronous`
    pub small_guild_threshold: usize,
    /// Above this many guilds, `Auto` behaves as `Lazy`
    pub large_guild_threshold: usize,
    pub dedup_window_ms: u64,
    pub dedup_capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            message_cache_size: default_message_cache_size(),
            startup_mode: StartupFetchMode::default(),
            fetch_scope: FetchScope::default(),
            small_guild_threshold: default_small_guild_threshold(),
            large_guild_threshold: default_large_guild_threshold(),
            dedup_window_ms: default_dedup_window_ms(),
            dedup_capacity: default_dedup_capacity(),
        }
    }
}

impl CacheConfig {
    #[must_use]
    pub fn dedup_window(&self) -> Duration {
        Duration::from_millis(self.dedup_window_ms)
    }
}

/// Unary (REST) call settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RestConfig {
    pub base_url: String,
    pub request_timeout_ms: u64,
    /// Process-wide ceiling on unary requests per second
    pub global_rate_per_second: u32,
    pub user_agent: String,
}

impl Default for RestConfig {
    fn default() -> Self {
        Self {
            base_url: default_rest_base_url(),
            request_timeout_ms: default_request_timeout_ms(),
            global_rate_per_second: default_global_rate_per_second(),
            user_agent: default_user_agent(),
        }
    }
}

impl RestConfig {
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Dispatch queue settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Quota-exceeded re-sends before the error reaches the caller
    pub max_retries: u32,
    /// Gateway frames allowed per window (heartbeats excluded)
    pub gateway_quota: u32,
    pub gateway_window_ms: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            gateway_quota: default_gateway_quota(),
            gateway_window_ms: default_gateway_window_ms(),
        }
    }
}

impl DispatchConfig {
    #[must_use]
    pub fn gateway_window(&self) -> Duration {
        Duration::from_millis(self.gateway_window_ms)
    }
}

/// Event delivery settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EventConfig {
    /// Handlers running longer than this are logged
    pub slow_handler_warn_ms: u64,
    /// Capacity of the subscriber broadcast channel
    pub channel_capacity: usize,
}

impl Default for EventConfig {
    fn default() -> Self {
        Self {
            slow_handler_warn_ms: default_slow_handler_warn_ms(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl EventConfig {
    #[must_use]
    pub fn slow_handler_warn(&self) -> Duration {
        Duration::from_millis(self.slow_handler_warn_ms)
    }
}

// Default value functions
fn default_app_name() -> String {
    "chat-bot".to_string()
}

fn default_connect_timeout_ms() -> u64 {
    15_000
}

fn default_heartbeat_factor() -> f64 {
    0.9
}

fn default_heartbeat_grace_ms() -> u64 {
    5_000
}

fn default_intents() -> u32 {
    chat_core::Intents::DEFAULT.bits()
}

fn default_reconnect_base_ms() -> u64 {
    1_000
}

fn default_reconnect_max_ms() -> u64 {
    60_000
}

fn default_identify_cooldown_ms() -> u64 {
    5_000
}

fn default_message_cache_size() -> usize {
    100
}

fn default_small_guild_threshold() -> usize {
    50
}

fn default_large_guild_threshold() -> usize {
    1_000
}

fn default_dedup_window_ms() -> u64 {
    60_000
}

fn default_dedup_capacity() -> usize {
    4_096
}

fn default_rest_base_url() -> String {
    "http://127.0.0.1:8080".to_string()
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_global_rate_per_second() -> u32 {
    50
}

fn default_user_agent() -> String {
    concat!("chat-bot/", env!("CARGO_PKG_VERSION")).to_string()
}

fn default_max_retries() -> u32 {
    3
}

fn default_gateway_quota() -> u32 {
    120
}

fn default_gateway_window_ms() -> u64 {
    60_000
}

fn default_slow_handler_warn_ms() -> u64 {
    1_000
}

fn default_channel_capacity() -> usize {
    1_024
}

/// Read `key`, falling back to `default` when unset
fn var_or<T: FromStr>(key: &'static str, default: impl FnOnce() -> T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(key, raw)),
        Err(_) => Ok(default()),
    }
}

/// Comma-separated shard ids, e.g. `0,2,4`
fn parse_shard_ids(raw: &str) -> Result<Vec<u32>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(|id| {
            id.parse()
                .map_err(|_| ConfigError::InvalidValue("BOT_SHARD_IDS", raw.to_string()))
        })
        .collect()
}

impl ClientConfig {
    /// Load configuration from `BOT_*` environment variables
    ///
    /// Every variable is optional; a variable that is set but unparsable is
    /// an error.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let config = Self {
            app: AppSettings {
                name: env::var("BOT_APP_NAME").unwrap_or_else(|_| default_app_name()),
                env: var_or("BOT_ENV", Environment::default)?,
            },
            gateway: GatewayConfig {
                host_override: env::var("BOT_GATEWAY_URL").ok().filter(|s| !s.is_empty()),
                connect_timeout_ms: var_or("BOT_CONNECT_TIMEOUT_MS", default_connect_timeout_ms)?,
                heartbeat_factor: var_or("BOT_HEARTBEAT_FACTOR", default_heartbeat_factor)?,
                heartbeat_grace_ms: var_or("BOT_HEARTBEAT_GRACE_MS", default_heartbeat_grace_ms)?,
                intents: var_or("BOT_INTENTS", default_intents)?,
                compress: var_or("BOT_GATEWAY_COMPRESS", || false)?,
                reconnect_base_ms: var_or("BOT_RECONNECT_BASE_MS", default_reconnect_base_ms)?,
                reconnect_max_ms: var_or("BOT_RECONNECT_MAX_MS", default_reconnect_max_ms)?,
            },
            shards: ShardConfig {
                total_shards: env::var("BOT_TOTAL_SHARDS")
                    .ok()
                    .map(|raw| {
                        raw.trim()
                            .parse()
                            .map_err(|_| ConfigError::InvalidValue("BOT_TOTAL_SHARDS", raw))
                    })
                    .transpose()?,
                shard_ids: env::var("BOT_SHARD_IDS")
                    .ok()
                    .map(|raw| parse_shard_ids(&raw))
                    .transpose()?,
                identify_max_concurrency: var_or("BOT_IDENTIFY_MAX_CONCURRENCY", || 1)?,
                identify_cooldown_ms: var_or(
                    "BOT_IDENTIFY_COOLDOWN_MS",
                    default_identify_cooldown_ms,
                )?,
            },
            cache: CacheConfig {
                message_cache_size: var_or("BOT_MESSAGE_CACHE_SIZE", default_message_cache_size)?,
                startup_mode: var_or("BOT_STARTUP_MODE", StartupFetchMode::default)?,
                fetch_scope: var_or("BOT_FETCH_SCOPE", FetchScope::default)?,
                small_guild_threshold: var_or(
                    "BOT_SMALL_GUILD_THRESHOLD",
                    default_small_guild_threshold,
                )?,
                large_guild_threshold: var_or(
                    "BOT_LARGE_GUILD_THRESHOLD",
                    default_large_guild_threshold,
                )?,
                dedup_window_ms: var_or("BOT_DEDUP_WINDOW_MS", default_dedup_window_ms)?,
                dedup_capacity: var_or("BOT_DEDUP_CAPACITY", default_dedup_capacity)?,
            },
            rest: RestConfig {
                base_url: env::var("BOT_API_URL").unwrap_or_else(|_| default_rest_base_url()),
                request_timeout_ms: var_or("BOT_REQUEST_TIMEOUT_MS", default_request_timeout_ms)?,
                global_rate_per_second: var_or(
                    "BOT_GLOBAL_RATE_PER_SECOND",
                    default_global_rate_per_second,
                )?,
                user_agent: env::var("BOT_USER_AGENT").unwrap_or_else(|_| default_user_agent()),
            },
            dispatch: DispatchConfig {
                max_retries: var_or("BOT_MAX_RETRIES", default_max_retries)?,
                gateway_quota: var_or("BOT_GATEWAY_QUOTA", default_gateway_quota)?,
                gateway_window_ms: var_or("BOT_GATEWAY_WINDOW_MS", default_gateway_window_ms)?,
            },
            events: EventConfig {
                slow_handler_warn_ms: var_or(
                    "BOT_SLOW_HANDLER_WARN_MS",
                    default_slow_handler_warn_ms,
                )?,
                channel_capacity: var_or("BOT_EVENT_CHANNEL_CAPACITY", default_channel_capacity)?,
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML/YAML/JSON file, overlaid with
    /// `BOT__SECTION__KEY` environment variables
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .add_source(
                config::Environment::with_prefix("BOT")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Self = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.gateway.heartbeat_factor > 0.0 && self.gateway.heartbeat_factor <= 1.0) {
            return Err(ConfigError::InvalidValue(
                "gateway.heartbeat_factor",
                self.gateway.heartbeat_factor.to_string(),
            ));
        }
        if self.shards.total_shards == Some(0) {
            return Err(ConfigError::InvalidValue(
                "shards.total_shards",
                "0".to_string(),
            ));
        }
        if let Some(ids) = &self.shards.shard_ids {
            if ids.is_empty() {
                return Err(ConfigError::InvalidValue(
                    "shards.shard_ids",
                    "empty".to_string(),
                ));
            }
            if let (Some(total), Some(id)) = (self.shards.total_shards, ids.iter().max()) {
                if *id >= total {
                    return Err(ConfigError::InvalidValue(
                        "shards.shard_ids",
                        format!("shard {id} is outside total_shards {total}"),
                    ));
                }
            }
        }
        if self.shards.identify_max_concurrency == 0 {
            return Err(ConfigError::InvalidValue(
                "shards.identify_max_concurrency",
                "0".to_string(),
            ));
        }
        if self.cache.small_guild_threshold > self.cache.large_guild_threshold {
            return Err(ConfigError::InvalidValue(
                "cache.small_guild_threshold",
                format!(
                    "{} exceeds large_guild_threshold {}",
                    self.cache.small_guild_threshold, self.cache.large_guild_threshold
                ),
            ));
        }
        if self.rest.global_rate_per_second == 0 {
            return Err(ConfigError::InvalidValue(
                "rest.global_rate_per_second",
                "0".to_string(),
            ));
        }
        if self.dispatch.gateway_quota == 0 {
            return Err(ConfigError::InvalidValue(
                "dispatch.gateway_quota",
                "0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(&'static str),

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(&'static str, String),

    #[error("Failed to load configuration file: {0}")]
    File(#[from] config::ConfigError),
}
