//! Local player boundary
//!
//! The audio engine and the local queue live outside this crate. The sync
//! layer reads them as snapshots and drives them through the [`Player`]
//! trait; the adapters here convert between local snapshots and wire
//! state.

use crate::protocol::{PlaybackState, QueueState, QueueTrack, RepeatMode};

/// Snapshot of the local player
#[derive(Debug, Clone, PartialEq)]
pub struct LocalPlayback {
    pub track_id: Option<String>,
    pub is_playing: bool,
    pub position_ms: u64,
    pub volume: f32,
    pub is_muted: bool,
    pub shuffle: bool,
    pub repeat: RepeatMode,
}

impl Default for LocalPlayback {
    fn default() -> Self {
        Self {
            track_id: None,
            is_playing: false,
            position_ms: 0,
            volume: 1.0,
            is_muted: false,
            shuffle: false,
            repeat: RepeatMode::Off,
        }
    }
}

impl LocalPlayback {
    /// Wire state captured at `now_ms`
    pub fn to_sync(&self, now_ms: i64) -> PlaybackState {
        PlaybackState {
            track_id: self.track_id.clone(),
            is_playing: self.is_playing,
            position_ms: self.position_ms,
            timestamp: now_ms,
            volume: self.volume.clamp(0.0, 1.0),
            is_muted: self.is_muted,
            shuffle: self.shuffle,
            repeat: self.repeat,
        }
    }

    /// Local view of a wire state, without drift correction
    pub fn from_sync(state: &PlaybackState) -> Self {
        Self {
            track_id: state.track_id.clone(),
            is_playing: state.is_playing,
            position_ms: state.position_ms,
            volume: state.volume,
            is_muted: state.is_muted,
            shuffle: state.shuffle,
            repeat: state.repeat,
        }
    }
}

/// Snapshot of the local play queue
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LocalQueue {
    pub tracks: Vec<QueueTrack>,
    pub current_index: usize,
}

impl LocalQueue {
    pub fn new(tracks: Vec<QueueTrack>, current_index: usize) -> Self {
        Self {
            tracks,
            current_index,
        }
    }

    pub fn current(&self) -> Option<&QueueTrack> {
        self.tracks.get(self.current_index)
    }

    pub fn to_sync(&self) -> QueueState {
        QueueState {
            tracks: self.tracks.clone(),
            current_index: self.current_index,
        }
    }

    /// Local queue from wire state; an out-of-range index is clamped to the
    /// last track, or 0 for an empty queue
    pub fn from_sync(state: &QueueState) -> Self {
        let current_index = state
            .current_index
            .min(state.tracks.len().saturating_sub(1));

        Self {
            tracks: state.tracks.clone(),
            current_index,
        }
    }
}

/// The audio engine and queue this device plays from
///
/// Implementations report their own changes back to the sync service
/// through a [`LocalChangeSender`](crate::LocalChangeSender), including
/// changes made by the setters below.
pub trait Player: Send + 'static {
    fn playback(&self) -> LocalPlayback;

    fn queue(&self) -> LocalQueue;

    fn set_playing(&mut self, playing: bool);

    fn set_volume(&mut self, volume: f32);

    fn set_muted(&mut self, muted: bool);

    fn seek(&mut self, position_ms: u64);

    fn set_shuffle(&mut self, shuffle: bool);

    fn set_repeat(&mut self, repeat: RepeatMode);

    /// Load a track by id (metadata comes from the catalog) and start at
    /// `position_ms`
    fn load_track(&mut self, track_id: &str, position_ms: u64, play: bool);

    fn replace_queue(&mut self, queue: LocalQueue);
}
