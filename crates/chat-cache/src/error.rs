//! Cache errors

use chat_common::{Categorize, ErrorCategory};
use chat_core::Snowflake;

#[derive(Debug, Clone, thiserror::Error)]
pub enum CacheError {
    /// Payload did not match the event's shape; the event is dropped
    #[error("Failed to decode {event_type}: {reason}")]
    Decode { event_type: String, reason: String },

    #[error("Failed to fetch guild {guild_id}: {reason}")]
    Fetch { guild_id: Snowflake, reason: String },
}

impl CacheError {
    pub(crate) fn decode(event_type: &str, err: &serde_json::Error) -> Self {
        Self::Decode {
            event_type: event_type.to_string(),
            reason: err.to_string(),
        }
    }
}

impl Categorize for CacheError {
    fn category(&self) -> ErrorCategory {
        match self {
            Self::Decode { .. } => ErrorCategory::DecodeSkip,
            Self::Fetch { .. } => ErrorCategory::Request,
        }
    }
}

pub type CacheResult<T> = Result<T, CacheError>;
