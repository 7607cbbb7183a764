//! WebSocket message types for real-time synchronization
//!
//! This module defines the message protocol spoken with the Resonance sync
//! server. Every frame carries exactly one JSON message tagged by `type`,
//! with the message body under `payload`.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ProtocolError;

// =============================================================================
// Client -> Server Messages
// =============================================================================

/// Messages sent from this device to the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum ClientMessage {
    /// Update playback state (from active device)
    PlaybackStateUpdate(PlaybackState),

    /// Seek to position (from active device)
    Seek { position_ms: u64 },

    /// Update queue state (from active device)
    QueueUpdate(QueueState),

    /// Request to transfer playback to another device
    TransferPlayback { target_device_id: String },

    /// Request list of connected devices
    RequestDeviceList,

    /// Heartbeat to keep connection alive
    Heartbeat,

    /// Update synced settings
    SettingsUpdate(SyncedSettings),
}

impl ClientMessage {
    /// Serialize this message into a single text frame
    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(ProtocolError::Encode)
    }

    /// Heartbeats bypass rate limiting and are never queued
    pub fn is_heartbeat(&self) -> bool {
        matches!(self, ClientMessage::Heartbeat)
    }

    /// Message type name, for logging
    pub fn kind(&self) -> &'static str {
        match self {
            ClientMessage::PlaybackStateUpdate(_) => "PlaybackStateUpdate",
            ClientMessage::Seek { .. } => "Seek",
            ClientMessage::QueueUpdate(_) => "QueueUpdate",
            ClientMessage::TransferPlayback { .. } => "TransferPlayback",
            ClientMessage::RequestDeviceList => "RequestDeviceList",
            ClientMessage::Heartbeat => "Heartbeat",
            ClientMessage::SettingsUpdate(_) => "SettingsUpdate",
        }
    }
}

// =============================================================================
// Server -> Client Messages
// =============================================================================

/// Messages received from the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum ServerMessage {
    /// Application-level handshake completed
    Connected(ConnectedPayload),

    /// Error reported by the server
    Error(ErrorPayload),

    /// Playback state sync (from the active device)
    PlaybackSync(PlaybackState),

    /// Seek sync (from the active device)
    SeekSync { position_ms: u64, timestamp: i64 },

    /// Queue state sync
    QueueSync(QueueState),

    /// Full list of connected devices
    DeviceList(Vec<DevicePresence>),

    /// A device connected
    DeviceConnected(DevicePresence),

    /// A device disconnected
    DeviceDisconnected { device_id: String },

    /// Playback transfer requested to this device
    TransferRequested { from_device_id: String },

    /// Playback transfer accepted
    TransferAccepted { to_device_id: String },

    /// Active device changed (new_device_id is None when the active device disconnects)
    ActiveDeviceChanged {
        previous_device_id: Option<String>,
        new_device_id: Option<String>,
    },

    /// Heartbeat response
    Pong { server_time: i64 },

    /// Settings sync
    SettingsSync(SyncedSettings),
}

impl ServerMessage {
    /// Decode a single text frame
    pub fn decode(frame: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(frame).map_err(ProtocolError::Decode)
    }

    /// Message type name, for logging
    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::Connected(_) => "Connected",
            ServerMessage::Error(_) => "Error",
            ServerMessage::PlaybackSync(_) => "PlaybackSync",
            ServerMessage::SeekSync { .. } => "SeekSync",
            ServerMessage::QueueSync(_) => "QueueSync",
            ServerMessage::DeviceList(_) => "DeviceList",
            ServerMessage::DeviceConnected(_) => "DeviceConnected",
            ServerMessage::DeviceDisconnected { .. } => "DeviceDisconnected",
            ServerMessage::TransferRequested { .. } => "TransferRequested",
            ServerMessage::TransferAccepted { .. } => "TransferAccepted",
            ServerMessage::ActiveDeviceChanged { .. } => "ActiveDeviceChanged",
            ServerMessage::Pong { .. } => "Pong",
            ServerMessage::SettingsSync(_) => "SettingsSync",
        }
    }
}

// =============================================================================
// Payload Types
// =============================================================================

/// Payload for Connected message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectedPayload {
    pub device_id: String,
    pub session_id: Uuid,
    /// Current active device (if any)
    pub active_device_id: Option<String>,
}

/// Payload for Error message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub code: String,
    pub message: String,
}

impl ErrorPayload {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Code and message joined, with line breaks removed for logging
    pub fn sanitized(&self) -> String {
        sanitize_log_text(&format!("{}: {}", self.code, self.message))
    }
}

/// Strip line breaks from server-provided text before it reaches a log line
pub fn sanitize_log_text(text: &str) -> String {
    text.chars()
        .map(|c| if c == '\n' || c == '\r' { ' ' } else { c })
        .collect()
}

/// Playback state for synchronization
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct PlaybackState {
    /// Currently playing track ID (null if nothing playing)
    pub track_id: Option<String>,

    /// Whether playback is active
    pub is_playing: bool,

    /// Position in milliseconds at `timestamp`
    pub position_ms: u64,

    /// Unix timestamp (ms) when this state was captured
    /// Used for clock drift correction
    pub timestamp: i64,

    /// Volume level (0.0 - 1.0)
    pub volume: f32,

    /// Whether audio is muted
    pub is_muted: bool,

    /// Shuffle mode enabled
    pub shuffle: bool,

    /// Repeat mode
    pub repeat: RepeatMode,
}

/// Repeat mode options
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RepeatMode {
    #[default]
    Off,
    Track,
    Queue,
}

/// Queue state for synchronization
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct QueueState {
    /// Tracks in queue
    pub tracks: Vec<QueueTrack>,

    /// Current position in queue (index)
    pub current_index: usize,
}

/// Minimal track info for queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueTrack {
    pub id: String,
    pub title: String,
    pub artist: String,
    pub album_id: Option<String>,
    pub album_title: String,
    pub duration_ms: u64,
    pub cover_url: Option<String>,
}

/// Device presence information
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DevicePresence {
    /// Unique device identifier
    pub device_id: String,

    /// Human-readable device name
    pub device_name: String,

    /// Type of device
    pub device_type: DeviceType,

    /// Whether this device is currently controlling playback
    pub is_active: bool,

    /// Current track (if playing)
    pub current_track: Option<TrackSummary>,

    /// Volume level
    pub volume: f32,

    /// Last activity timestamp (Unix ms)
    pub last_seen: i64,
}

impl DevicePresence {
    pub fn new(device_id: String, device_name: String, device_type: DeviceType) -> Self {
        Self {
            device_id,
            device_name,
            device_type,
            is_active: false,
            current_track: None,
            volume: 1.0,
            last_seen: chrono::Utc::now().timestamp_millis(),
        }
    }
}

/// Device type categories
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    #[default]
    Web,
    Desktop,
    Mobile,
    Tablet,
    Speaker,
    Unknown,
}

impl std::fmt::Display for DeviceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceType::Web => write!(f, "web"),
            DeviceType::Desktop => write!(f, "desktop"),
            DeviceType::Mobile => write!(f, "mobile"),
            DeviceType::Tablet => write!(f, "tablet"),
            DeviceType::Speaker => write!(f, "speaker"),
            DeviceType::Unknown => write!(f, "unknown"),
        }
    }
}

impl std::str::FromStr for DeviceType {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_lowercase().as_str() {
            "web" => DeviceType::Web,
            "desktop" => DeviceType::Desktop,
            "mobile" => DeviceType::Mobile,
            "tablet" => DeviceType::Tablet,
            "speaker" => DeviceType::Speaker,
            _ => DeviceType::Unknown,
        })
    }
}

/// Minimal track info for presence
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackSummary {
    pub id: String,
    pub title: String,
    pub artist: String,
}

/// Settings that are synced across devices
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SyncedSettings {
    /// Crossfade enabled
    pub crossfade_enabled: Option<bool>,

    /// Crossfade duration in seconds
    pub crossfade_duration: Option<f32>,

    /// Gapless playback enabled
    pub gapless_enabled: Option<bool>,

    /// Volume normalization enabled
    pub normalize_volume: Option<bool>,
}
