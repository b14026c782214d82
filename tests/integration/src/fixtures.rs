//! Gateway frames and client configuration used by the scenarios

use serde_json::{json, Value};

use chat_common::{ClientConfig, StartupFetchMode};

pub const APP_ID: &str = "101";
pub const TOKEN: &str = "secret";
pub const HEARTBEAT_INTERVAL_MS: u64 = 45_000;

/// Guild id that routes to `shard` out of `total` shards
pub fn guild_on_shard(n: u64, shard: u64, total: u64) -> u64 {
    (n * total + shard) << 22
}

pub fn hello() -> Value {
    json!({"op": 10, "d": {"heartbeat_interval": HEARTBEAT_INTERVAL_MS}})
}

pub fn heartbeat_ack() -> Value {
    json!({"op": 11})
}

/// READY carries no sequence number
pub fn ready(session_id: &str, guilds: &[u64], resume_url: &str) -> Value {
    json!({
        "op": 0,
        "t": "READY",
        "d": {
            "v": 1,
            "session_id": session_id,
            "user": {"id": "1", "username": "bot", "bot": true},
            "guilds": guilds
                .iter()
                .map(|id| json!({"id": id.to_string(), "unavailable": true}))
                .collect::<Vec<_>>(),
            "resume_gateway_url": resume_url,
        }
    })
}

pub fn resumed(sequence: u64) -> Value {
    json!({"op": 0, "t": "RESUMED", "s": sequence, "d": {}})
}

pub fn reconnect() -> Value {
    json!({"op": 7, "d": null})
}

pub fn dispatch(event_type: &str, sequence: u64, data: Value) -> Value {
    json!({"op": 0, "t": event_type, "s": sequence, "d": data})
}

pub fn message(id: u64, channel_id: u64, guild_id: Option<u64>, content: &str) -> Value {
    let mut data = json!({
        "id": id.to_string(),
        "channel_id": channel_id.to_string(),
        "author": {"id": "500", "username": "someone"},
        "content": content,
    });
    if let Some(guild_id) = guild_id {
        data["guild_id"] = json!(guild_id.to_string());
    }
    data
}

/// Client settings pointed at the mock servers, with short timers
pub fn client_config(
    rest_url: &str,
    mode: StartupFetchMode,
    total_shards: Option<u32>,
) -> ClientConfig {
    let mut config = ClientConfig::default();
    config.rest.base_url = rest_url.to_string();
    config.gateway.compress = false;
    config.gateway.connect_timeout_ms = 5_000;
    config.gateway.reconnect_base_ms = 10;
    config.gateway.reconnect_max_ms = 100;
    config.shards.total_shards = total_shards;
    config.shards.identify_cooldown_ms = 50;
    config.cache.startup_mode = mode;
    config
}
