//! Handshake payloads

use serde::{Deserialize, Serialize};

/// `d` of op 10
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct HelloPayload {
    /// Milliseconds
    pub heartbeat_interval: u64,
}

/// `d` of op 2
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentifyPayload {
    pub token: String,
    pub intents: u32,
    /// `[shard_id, total_shards]`
    pub shard: [u32; 2],
    pub properties: IdentifyProperties,
}

/// Client description sent with Identify
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentifyProperties {
    pub os: String,
    pub browser: String,
    pub device: String,
}

impl IdentifyProperties {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            os: std::env::consts::OS.to_string(),
            browser: name.clone(),
            device: name,
        }
    }
}

impl Default for IdentifyProperties {
    fn default() -> Self {
        Self::new(env!("CARGO_PKG_NAME"))
    }
}

/// `d` of op 6
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResumePayload {
    pub token: String,
    pub session_id: String,
    pub seq: u64,
}
