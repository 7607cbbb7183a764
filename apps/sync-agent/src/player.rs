//! Headless player
//!
//! Keeps playback state without producing audio. The position advances on
//! a monotonic clock while playing, so the agent reports realistic
//! positions when it becomes the active device.

use std::time::Instant;

use resonance_sync_client::{LocalChangeSender, LocalPlayback, LocalQueue, Player, RepeatMode};

pub struct HeadlessPlayer {
    playback: LocalPlayback,
    /// When `playback.position_ms` was last pinned
    anchored_at: Instant,
    queue: LocalQueue,
    changes: LocalChangeSender,
}

impl HeadlessPlayer {
    pub fn new(changes: LocalChangeSender) -> Self {
        Self {
            playback: LocalPlayback::default(),
            anchored_at: Instant::now(),
            queue: LocalQueue::default(),
            changes,
        }
    }

    fn position_now(&self) -> u64 {
        if self.playback.is_playing {
            let elapsed = self.anchored_at.elapsed().as_millis() as u64;
            self.playback.position_ms.saturating_add(elapsed)
        } else {
            self.playback.position_ms
        }
    }

    /// Pin the running position before changing what drives it
    fn anchor(&mut self) {
        self.playback.position_ms = self.position_now();
        self.anchored_at = Instant::now();
    }

    fn playback_changed(&self) {
        if let Err(e) = self.changes.playback_changed() {
            tracing::debug!(error = %e, "Could not report playback change");
        }
    }
}

impl Player for HeadlessPlayer {
    fn playback(&self) -> LocalPlayback {
        LocalPlayback {
            position_ms: self.position_now(),
            ..self.playback.clone()
        }
    }

    fn queue(&self) -> LocalQueue {
        self.queue.clone()
    }

    fn set_playing(&mut self, playing: bool) {
        self.anchor();
        self.playback.is_playing = playing;
        tracing::info!(playing, "Playback toggled");
        self.playback_changed();
    }

    fn set_volume(&mut self, volume: f32) {
        self.playback.volume = volume.clamp(0.0, 1.0);
        self.playback_changed();
    }

    fn set_muted(&mut self, muted: bool) {
        self.playback.is_muted = muted;
        self.playback_changed();
    }

    fn seek(&mut self, position_ms: u64) {
        self.playback.position_ms = position_ms;
        self.anchored_at = Instant::now();
        tracing::debug!(position_ms, "Seeked");
        self.playback_changed();
    }

    fn set_shuffle(&mut self, shuffle: bool) {
        self.playback.shuffle = shuffle;
        self.playback_changed();
    }

    fn set_repeat(&mut self, repeat: RepeatMode) {
        self.playback.repeat = repeat;
        self.playback_changed();
    }

    fn load_track(&mut self, track_id: &str, position_ms: u64, play: bool) {
        let title = self
            .queue
            .tracks
            .iter()
            .find(|t| t.id == track_id)
            .map(|t| format!("{} - {}", t.artist, t.title));
        tracing::info!(track_id, title = ?title, position_ms, play, "Now playing");

        self.playback.track_id = Some(track_id.to_string());
        self.playback.position_ms = position_ms;
        self.playback.is_playing = play;
        self.anchored_at = Instant::now();
        self.playback_changed();
    }

    fn replace_queue(&mut self, queue: LocalQueue) {
        tracing::info!(
            tracks = queue.tracks.len(),
            current_index = queue.current_index,
            "Queue replaced"
        );
        self.queue = queue;
        if let Err(e) = self.changes.queue_changed() {
            tracing::debug!(error = %e, "Could not report queue change");
        }
    }
}
