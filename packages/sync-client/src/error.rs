//! Sync client error types

use std::time::Duration;

use thiserror::Error;

/// Failures of the physical socket connection
///
/// None of these are fatal: every variant either schedules a reconnect
/// or is logged and dropped.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Server URL could not be parsed
    #[error("invalid server URL: {0}")]
    InvalidUrl(String),

    /// No token has been supplied yet
    #[error("no access token available")]
    MissingToken,

    /// Socket could not be opened
    #[error("connection failed: {0}")]
    Connect(String),

    /// Socket did not open in time
    #[error("connection timed out after {0:?}")]
    ConnectTimeout(Duration),

    /// Socket-level failure on an open connection
    #[error("socket error: {0}")]
    Socket(String),

    /// Remote end closed the connection
    #[error("connection closed: {}", .0.as_deref().unwrap_or("no reason given"))]
    Closed(Option<String>),

    /// No pong arrived within two heartbeat intervals
    #[error("heartbeat timed out after {0:?}")]
    HeartbeatTimeout(Duration),
}

impl TransportError {
    /// Check if a reconnect attempt could succeed after this error
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            TransportError::InvalidUrl(_) | TransportError::MissingToken
        )
    }
}

/// Frame encoding and decoding errors
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Inbound frame was not a known message
    #[error("malformed frame: {0}")]
    Decode(#[source] serde_json::Error),

    /// Outbound message could not be serialized
    #[error("failed to encode message: {0}")]
    Encode(#[source] serde_json::Error),
}

/// Errors surfaced by the [`SyncHandle`](crate::SyncHandle)
#[derive(Error, Debug)]
pub enum SyncError {
    /// The sync service task has stopped
    #[error("sync service is not running")]
    ServiceStopped,
}

/// Result type for transport operations
pub type TransportResult<T> = Result<T, TransportError>;

/// Result type for sync handle operations
pub type SyncResult<T> = Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_error_display() {
        let err = TransportError::Closed(None);
        assert_eq!(err.to_string(), "connection closed: no reason given");

        let err = TransportError::Closed(Some("going away".into()));
        assert_eq!(err.to_string(), "connection closed: going away");

        let err = TransportError::HeartbeatTimeout(Duration::from_secs(60));
        assert!(err.to_string().contains("heartbeat timed out"));
    }

    #[test]
    fn test_retryable_classification() {
        assert!(TransportError::Connect("refused".into()).is_retryable());
        assert!(TransportError::ConnectTimeout(Duration::from_secs(10)).is_retryable());
        assert!(TransportError::Socket("reset".into()).is_retryable());
        assert!(!TransportError::InvalidUrl("nope".into()).is_retryable());
        assert!(!TransportError::MissingToken.is_retryable());
    }
}
