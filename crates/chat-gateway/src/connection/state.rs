//! Connection lifecycle states

use std::fmt;

/// `Disconnected -> Connecting -> Connected -> Disconnecting -> Disconnected`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    /// Socket opening, waiting for Hello, or handshake in flight
    Connecting,
    /// READY or RESUMED received
    Connected,
    /// Tearing down after a fault or stop
    Disconnecting,
}

impl ConnectionState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnecting => "disconnecting",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
