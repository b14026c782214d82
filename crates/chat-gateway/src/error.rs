//! Gateway faults

use chat_common::{Categorize, ErrorCategory};
use chat_dispatch::DispatchError;

use crate::protocol::CloseCode;

/// How a connection manager reacts to a fault
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultSeverity {
    /// Reconnect with backoff
    Transient,
    /// Stop the shard and surface the error
    Critical,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum GatewayError {
    #[error("Connect failed: {0}")]
    Connect(String),

    #[error("Connect timed out")]
    ConnectTimeout,

    #[error("Socket closed (code: {code:?}, reason: {reason})")]
    Closed { code: Option<u16>, reason: String },

    #[error("Heartbeat not acknowledged")]
    HeartbeatTimeout,

    #[error("Server requested reconnect")]
    ReconnectRequested,

    #[error("Session invalidated (resumable: {resumable})")]
    InvalidSession { resumable: bool },

    #[error("Handshake failed: {0}")]
    Handshake(String),

    #[error("Send failed: {0}")]
    Send(#[from] DispatchError),

    #[error("Connection cancelled")]
    Cancelled,
}

impl GatewayError {
    #[must_use]
    pub fn severity(&self) -> FaultSeverity {
        match self {
            Self::Handshake(_) => FaultSeverity::Critical,
            Self::Closed {
                code: Some(code), ..
            } if CloseCode::from_u16(*code).is_some_and(CloseCode::is_critical) => {
                FaultSeverity::Critical
            }
            Self::Send(DispatchError::Unauthorized) => FaultSeverity::Critical,
            // Identify budget exhausted past the retry policy
            Self::Send(DispatchError::QuotaExceeded { .. }) => FaultSeverity::Critical,
            _ => FaultSeverity::Transient,
        }
    }

    /// Whether the stored session must be dropped before reconnecting
    #[must_use]
    pub fn clears_session(&self) -> bool {
        match self {
            Self::InvalidSession { .. } => true,
            Self::Closed {
                code: Some(code), ..
            } => CloseCode::from_u16(*code).is_some_and(CloseCode::clears_session),
            _ => false,
        }
    }

    #[must_use]
    pub fn is_critical(&self) -> bool {
        self.severity() == FaultSeverity::Critical
    }
}

impl Categorize for GatewayError {
    fn category(&self) -> ErrorCategory {
        match self {
            Self::Cancelled => ErrorCategory::Cancelled,
            _ if self.is_critical() => ErrorCategory::CriticalProtocol,
            _ => ErrorCategory::TransientConnection,
        }
    }
}
