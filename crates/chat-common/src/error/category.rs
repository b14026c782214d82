//! Error categories
//!
//! Every error type in the client maps onto one category, which decides who
//! recovers from it and at what level it is logged.

use tracing::Level;

/// Recovery class of an error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Socket closed, stale heartbeat, reconnect requested, invalid session.
    /// The connection manager reconnects on its own.
    TransientConnection,
    /// A quota bucket is exhausted; the dispatch queue re-sends later.
    Quota,
    /// The peer broke the protocol in a way retrying cannot fix.
    CriticalProtocol,
    /// A single event could not be decoded and was dropped.
    DecodeSkip,
    /// The platform rejected a unary call (auth, missing resource, bad status).
    Request,
    /// Local shutdown or cancellation.
    Cancelled,
}

impl ErrorCategory {
    /// Stable code for logs and metrics labels
    #[must_use]
    pub fn code(self) -> &'static str {
        match self {
            Self::TransientConnection => "TRANSIENT_CONNECTION",
            Self::Quota => "QUOTA",
            Self::CriticalProtocol => "CRITICAL_PROTOCOL",
            Self::DecodeSkip => "DECODE_SKIP",
            Self::Request => "REQUEST",
            Self::Cancelled => "CANCELLED",
        }
    }

    /// Recovered without caller involvement
    #[must_use]
    pub fn is_recoverable(self) -> bool {
        matches!(self, Self::TransientConnection | Self::Quota | Self::DecodeSkip)
    }

    /// Level used when logging an error of this category
    #[must_use]
    pub fn log_level(self) -> Level {
        match self {
            Self::CriticalProtocol => Level::ERROR,
            Self::TransientConnection | Self::Quota | Self::DecodeSkip | Self::Request => {
                Level::WARN
            }
            Self::Cancelled => Level::DEBUG,
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// Implemented by every client error enum
pub trait Categorize {
    fn category(&self) -> ErrorCategory;

    fn is_recoverable(&self) -> bool {
        self.category().is_recoverable()
    }
}
