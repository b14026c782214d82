//! Response bodies of the bootstrap endpoint

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// `GET /gateway/bot`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayBot {
    /// WebSocket URL to connect to
    pub url: String,
    /// Recommended shard count
    #[serde(default = "default_shards")]
    pub shards: u32,
    pub session_start_limit: SessionStartLimit,
}

/// Identify budget of the application
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SessionStartLimit {
    pub total: u32,
    pub remaining: u32,
    /// Milliseconds until `remaining` resets to `total`
    pub reset_after: u64,
    /// Identify slots; `None` when the platform does not advertise them
    #[serde(default)]
    pub max_concurrency: Option<u32>,
}

impl SessionStartLimit {
    #[must_use]
    pub fn reset_after(&self) -> Duration {
        Duration::from_millis(self.reset_after)
    }

    /// No identifies left before the reset
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.remaining == 0
    }
}

fn default_shards() -> u32 {
    1
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_gateway_bot_defaults() {
        let bot: GatewayBot = serde_json::from_value(json!({
            "url": "wss://gateway.example",
            "session_start_limit": {"total": 1000, "remaining": 0, "reset_after": 14_400_000}
        }))
        .unwrap();

        assert_eq!(bot.shards, 1);
        assert_eq!(bot.session_start_limit.max_concurrency, None);
        assert!(bot.session_start_limit.is_exhausted());
        assert_eq!(bot.session_start_limit.reset_after(), Duration::from_secs(14_400));
    }
}
