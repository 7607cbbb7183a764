//! Event notifier
//!
//! Derives user-facing notifications from connection-state transitions and
//! server events. This is a derivation layer only: it reads transitions and
//! never writes back into the registry or the transport.

use serde::Serialize;

use crate::protocol::ErrorPayload;
use crate::registry::ActiveChange;
use crate::transport::ConnectionState;

/// Keywords that mark a server error as authentication-related
const AUTH_KEYWORDS: &[&str] = &["auth", "unauthorized", "token", "401"];

/// Codes for a permission denial on one action; the session itself stays valid
const PERMISSION_CODES: &[&str] = &["NOT_AUTHORIZED", "NOT_ACTIVE_DEVICE", "FORBIDDEN"];

/// Coarse classification of a server-reported error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    /// Token rejected or expired; reconnecting with it would fail again
    Auth,
    Generic,
}

impl ErrorKind {
    /// Keyword match, case-insensitive, against the error text
    pub fn classify(text: &str) -> Self {
        let text = text.to_lowercase();
        if AUTH_KEYWORDS.iter().any(|keyword| text.contains(keyword)) {
            ErrorKind::Auth
        } else {
            ErrorKind::Generic
        }
    }

    /// Classify a server `Error` payload by its code and message
    ///
    /// Permission denials such as `NOT_AUTHORIZED` are generic: the server
    /// refused one request, not the credentials.
    pub fn of(payload: &ErrorPayload) -> Self {
        if PERMISSION_CODES
            .iter()
            .any(|code| payload.code.eq_ignore_ascii_case(code))
        {
            return ErrorKind::Generic;
        }
        ErrorKind::classify(&format!("{} {}", payload.code, payload.message))
    }
}

/// A user-facing event
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    /// Handshake completed; `is_reconnect` once any earlier connect succeeded
    Connected { is_reconnect: bool },
    /// A previously established connection was lost or closed
    Disconnected,
    /// Waiting to retry the connection
    Reconnecting,
    /// Server-reported error
    Error { kind: ErrorKind, message: String },
    /// Another device asked to hand playback to this one
    TransferRequested { from_device_id: String },
    /// The single writer changed
    ActiveDeviceChanged {
        device_id: Option<String>,
        is_self: bool,
    },
}

/// Turns transitions into [`Notification`]s
#[derive(Debug, Clone, Default)]
pub struct EventNotifier {
    previous: ConnectionState,
    has_connected: bool,
}

impl EventNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a handshake has ever completed in this notifier's lifetime
    pub fn has_connected(&self) -> bool {
        self.has_connected
    }

    /// Derive notifications for a connection-state transition
    ///
    /// Repeated reports of the same state produce nothing.
    pub fn on_state_change(&mut self, state: ConnectionState) -> Vec<Notification> {
        let previous = std::mem::replace(&mut self.previous, state);
        if previous == state {
            return Vec::new();
        }

        let mut notifications = Vec::new();
        match state {
            ConnectionState::Connected => {
                notifications.push(Notification::Connected {
                    is_reconnect: self.has_connected,
                });
                self.has_connected = true;
            }
            ConnectionState::Disconnected => {
                if previous == ConnectionState::Connected {
                    notifications.push(Notification::Disconnected);
                }
            }
            ConnectionState::Reconnecting => {
                if previous == ConnectionState::Connected {
                    notifications.push(Notification::Disconnected);
                }
                notifications.push(Notification::Reconnecting);
            }
            ConnectionState::Connecting => {}
        }
        notifications
    }

    pub fn on_server_error(&self, payload: &ErrorPayload) -> Notification {
        Notification::Error {
            kind: ErrorKind::of(payload),
            message: payload.sanitized(),
        }
    }

    pub fn on_transfer_requested(&self, from_device_id: &str) -> Notification {
        Notification::TransferRequested {
            from_device_id: from_device_id.to_string(),
        }
    }

    pub fn on_active_change(&self, change: &ActiveChange, self_id: &str) -> Notification {
        Notification::ActiveDeviceChanged {
            device_id: change.current.clone(),
            is_self: change.current.as_deref() == Some(self_id),
        }
    }
}
