//! Connection lifecycle state

use serde::Serialize;

/// Lifecycle of the sync socket
///
/// Owned by the transport client. `Connected` is only entered once the
/// server's `Connected` handshake message arrives, not when the socket opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// Socket opening or awaiting the application handshake
    Connecting,
    /// Handshake completed; messages flow
    Connected,
    /// Idle; no reconnect scheduled
    #[default]
    Disconnected,
    /// Waiting for (or performing) a backoff reconnect attempt
    Reconnecting,
}

impl ConnectionState {
    /// Connecting or connected; a further `connect` call is a no-op
    pub fn is_active(&self) -> bool {
        matches!(self, ConnectionState::Connecting | ConnectionState::Connected)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Reconnecting => write!(f, "reconnecting"),
        }
    }
}
