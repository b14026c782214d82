//! Dispatch error types

use std::time::Duration;

use chat_common::{Categorize, ErrorCategory};

/// Errors returned by the dispatch queue and by unary calls
#[derive(Debug, Clone, thiserror::Error)]
pub enum DispatchError {
    #[error("Quota exceeded, retry after {retry_after:?} (global: {global})")]
    QuotaExceeded { retry_after: Duration, global: bool },

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Not found")]
    NotFound,

    #[error("Unexpected status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Malformed response: {0}")]
    Protocol(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Request cancelled")]
    Cancelled,

    #[error("Dispatch queue closed")]
    Closed,
}

impl DispatchError {
    /// Map a non-success status code
    #[must_use]
    pub fn from_status(status: u16, body: impl Into<String>) -> Self {
        match status {
            401 => Self::Unauthorized,
            404 => Self::NotFound,
            _ => Self::Status {
                status,
                body: body.into(),
            },
        }
    }
}

impl Categorize for DispatchError {
    fn category(&self) -> ErrorCategory {
        match self {
            Self::QuotaExceeded { .. } => ErrorCategory::Quota,
            Self::Unauthorized | Self::NotFound | Self::Status { .. } | Self::Protocol(_) => {
                ErrorCategory::Request
            }
            Self::Transport(_) => ErrorCategory::TransientConnection,
            Self::Cancelled | Self::Closed => ErrorCategory::Cancelled,
        }
    }
}
