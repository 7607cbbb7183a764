//! Mock local player
//!
//! Provides a [`MockPlayer`] that keeps playback and queue state in memory,
//! records every call the sync layer makes, and reports each change to the
//! sync service the way a real audio engine would.
//!
//! # Lock Poisoning Recovery
//!
//! Locks are taken with `unwrap_or_else(|e| e.into_inner())` so a panicking
//! test does not poison the player for the assertions that follow.

use std::sync::{Arc, RwLock, RwLockWriteGuard};

use resonance_sync_client::{LocalChangeSender, LocalPlayback, LocalQueue, Player, RepeatMode};

/// In-memory player for sync tests
///
/// Clones share state: hand one clone to the sync service and keep another
/// in the test to drive "user" actions and inspect what the service did.
///
/// # Example
///
/// ```rust
/// use resonance_sync_client::Player;
/// use resonance_test_utils::MockPlayer;
///
/// let player = MockPlayer::new();
/// let mut service_side = player.clone();
///
/// service_side.set_volume(0.5);
/// assert_eq!(player.playback().volume, 0.5);
/// assert_eq!(player.calls(), vec!["set_volume(0.5)".to_string()]);
/// ```
#[derive(Debug, Clone, Default)]
pub struct MockPlayer {
    state: Arc<RwLock<MockPlayerState>>,
    changes: Option<LocalChangeSender>,
}

#[derive(Debug, Default)]
struct MockPlayerState {
    playback: LocalPlayback,
    queue: LocalQueue,
    calls: Vec<String>,
}

impl MockPlayer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report every change to a running sync service
    pub fn reporting_to(mut self, changes: LocalChangeSender) -> Self {
        self.changes = Some(changes);
        self
    }

    /// Start from a given playback state without reporting it
    pub fn with_playback(self, playback: LocalPlayback) -> Self {
        self.write().playback = playback;
        self
    }

    /// Calls made through the [`Player`] trait, in order
    pub fn calls(&self) -> Vec<String> {
        self.state
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .calls
            .clone()
    }

    pub fn clear_calls(&self) {
        self.write().calls.clear();
    }

    /// Simulate the user changing playback on this device
    pub fn user_playback(&self, update: impl FnOnce(&mut LocalPlayback)) {
        update(&mut self.write().playback);
        self.report_playback();
    }

    /// Simulate the user editing the queue on this device
    pub fn user_queue(&self, queue: LocalQueue) {
        self.write().queue = queue;
        self.report_queue();
    }

    fn write(&self) -> RwLockWriteGuard<'_, MockPlayerState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    fn record(&self, call: String, update: impl FnOnce(&mut MockPlayerState)) {
        let mut state = self.write();
        state.calls.push(call);
        update(&mut state);
    }

    fn report_playback(&self) {
        if let Some(changes) = &self.changes {
            let _ = changes.playback_changed();
        }
    }

    fn report_queue(&self) {
        if let Some(changes) = &self.changes {
            let _ = changes.queue_changed();
        }
    }
}

impl Player for MockPlayer {
    fn playback(&self) -> LocalPlayback {
        self.state
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .playback
            .clone()
    }

    fn queue(&self) -> LocalQueue {
        self.state
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .queue
            .clone()
    }

    fn set_playing(&mut self, playing: bool) {
        self.record(format!("set_playing({playing})"), |s| {
            s.playback.is_playing = playing
        });
        self.report_playback();
    }

    fn set_volume(&mut self, volume: f32) {
        self.record(format!("set_volume({volume})"), |s| s.playback.volume = volume);
        self.report_playback();
    }

    fn set_muted(&mut self, muted: bool) {
        self.record(format!("set_muted({muted})"), |s| s.playback.is_muted = muted);
        self.report_playback();
    }

    fn seek(&mut self, position_ms: u64) {
        self.record(format!("seek({position_ms})"), |s| {
            s.playback.position_ms = position_ms
        });
        self.report_playback();
    }

    fn set_shuffle(&mut self, shuffle: bool) {
        self.record(format!("set_shuffle({shuffle})"), |s| {
            s.playback.shuffle = shuffle
        });
        self.report_playback();
    }

    fn set_repeat(&mut self, repeat: RepeatMode) {
        self.record(format!("set_repeat({repeat:?})"), |s| {
            s.playback.repeat = repeat
        });
        self.report_playback();
    }

    fn load_track(&mut self, track_id: &str, position_ms: u64, play: bool) {
        self.record(
            format!("load_track({track_id}, {position_ms}, {play})"),
            |s| {
                s.playback.track_id = Some(track_id.to_string());
                s.playback.position_ms = position_ms;
                s.playback.is_playing = play;
            },
        );
        self.report_playback();
    }

    fn replace_queue(&mut self, queue: LocalQueue) {
        self.record(format!("replace_queue({})", queue.tracks.len()), |s| {
            s.queue = queue
        });
        self.report_queue();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_state() {
        let player = MockPlayer::new();
        let mut other = player.clone();

        other.load_track("t1", 1_000, true);

        let playback = player.playback();
        assert_eq!(playback.track_id.as_deref(), Some("t1"));
        assert_eq!(playback.position_ms, 1_000);
        assert!(playback.is_playing);
        assert_eq!(player.calls(), vec!["load_track(t1, 1000, true)".to_string()]);
    }

    #[test]
    fn test_user_actions_are_not_recorded_as_calls() {
        let player = MockPlayer::new();

        player.user_playback(|p| p.is_playing = true);
        player.user_queue(LocalQueue::default());

        assert!(player.playback().is_playing);
        assert!(player.calls().is_empty());
    }

    #[test]
    fn test_clear_calls() {
        let mut player = MockPlayer::new();
        player.set_muted(true);
        player.clear_calls();

        assert!(player.calls().is_empty());
        assert!(player.playback().is_muted);
    }
}
