//! Playback synchronizer
//!
//! Replicates play/pause, volume, mute, shuffle, repeat, track and position
//! between the active device and every passive one.
//!
//! - Passive devices apply inbound `PlaybackSync` / `SeekSync` with
//!   drift correction and tolerances.
//! - The active device broadcasts local changes: throttled in general,
//!   immediately on a track change or a seek, and periodically while
//!   playing.
//! - Nothing is broadcast while the [`SyncGuard`] reads remote.

use resonance_shared_config::PlaybackSyncConfig;

use super::guard::SyncGuard;
use crate::player::{LocalPlayback, Player};
use crate::protocol::{ClientMessage, PlaybackState};
use crate::transport::{Outbound, SendOutcome};

/// Where the synchronizer is in its current turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaybackPhase {
    #[default]
    Idle,
    ApplyingRemote,
    Broadcasting,
}

/// Why a broadcast was sent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BroadcastReason {
    /// Generic change, subject to the throttle
    StateChanged,
    TrackChanged,
    Seek,
    Periodic,
    /// Trailing edge of a throttled burst
    Throttled,
    /// This device just became active
    Takeover,
}

/// Position adjusted for the time elapsed since `timestamp`
///
/// Only a playing state advances. An elapsed time beyond `max_drift_ms` in
/// either direction is treated as clock desync and the raw position is
/// returned unchanged.
pub fn drift_adjusted(
    position_ms: u64,
    timestamp: i64,
    is_playing: bool,
    now_ms: i64,
    max_drift_ms: i64,
) -> u64 {
    if !is_playing {
        return position_ms;
    }

    let elapsed = now_ms.saturating_sub(timestamp);
    if elapsed.abs() > max_drift_ms {
        tracing::debug!(elapsed_ms = elapsed, "Sync timestamp out of range, using raw position");
        return position_ms;
    }

    (position_ms as i64).saturating_add(elapsed).max(0) as u64
}

/// Loop-free playback replication for one device
#[derive(Debug, Clone)]
pub struct PlaybackSynchronizer {
    config: PlaybackSyncConfig,
    phase: PlaybackPhase,
    /// Last local snapshot and when it was observed
    last_observed: Option<(LocalPlayback, i64)>,
    last_broadcast_at: Option<i64>,
    next_periodic_at: Option<i64>,
    trailing_pending: bool,
}

impl PlaybackSynchronizer {
    pub fn new(config: PlaybackSyncConfig) -> Self {
        Self {
            config,
            phase: PlaybackPhase::Idle,
            last_observed: None,
            last_broadcast_at: None,
            next_periodic_at: None,
            trailing_pending: false,
        }
    }

    pub fn phase(&self) -> PlaybackPhase {
        self.phase
    }

    pub fn has_pending_broadcast(&self) -> bool {
        self.trailing_pending
    }

    // =========================================================================
    // Inbound
    // =========================================================================

    /// Apply an inbound `PlaybackSync`
    ///
    /// Returns `false` without touching the player when this device is the
    /// active one.
    pub fn apply_remote_state<P: Player>(
        &mut self,
        state: &PlaybackState,
        is_active: bool,
        guard: &mut SyncGuard,
        player: &mut P,
        now_ms: i64,
    ) -> bool {
        if is_active {
            tracing::debug!("Ignoring PlaybackSync on the active device");
            return false;
        }

        guard.begin_remote();
        self.phase = PlaybackPhase::ApplyingRemote;

        let local = player.playback();
        let target = drift_adjusted(
            state.position_ms,
            state.timestamp,
            state.is_playing,
            now_ms,
            self.config.max_drift_ms,
        );

        match state.track_id.as_deref() {
            Some(track_id) if state.track_id != local.track_id => {
                tracing::debug!(track_id, position_ms = target, "Loading remote track");
                player.load_track(track_id, target, state.is_playing);
            }
            _ => {
                if state.is_playing != local.is_playing {
                    player.set_playing(state.is_playing);
                }
                if target.abs_diff(local.position_ms) > self.config.seek_threshold_ms {
                    player.seek(target);
                }
            }
        }

        if (state.volume - local.volume).abs() > self.config.volume_tolerance {
            player.set_volume(state.volume);
        }
        if state.is_muted != local.is_muted {
            player.set_muted(state.is_muted);
        }
        if state.shuffle != local.shuffle {
            player.set_shuffle(state.shuffle);
        }
        if state.repeat != local.repeat {
            player.set_repeat(state.repeat);
        }

        self.last_observed = None;
        true
    }

    /// Apply an inbound `SeekSync`
    ///
    /// The local play state decides whether drift correction applies.
    pub fn apply_remote_seek<P: Player>(
        &mut self,
        position_ms: u64,
        timestamp: i64,
        is_active: bool,
        guard: &mut SyncGuard,
        player: &mut P,
        now_ms: i64,
    ) -> bool {
        if is_active {
            tracing::debug!("Ignoring SeekSync on the active device");
            return false;
        }

        guard.begin_remote();
        self.phase = PlaybackPhase::ApplyingRemote;

        let local = player.playback();
        let target = drift_adjusted(
            position_ms,
            timestamp,
            local.is_playing,
            now_ms,
            self.config.max_drift_ms,
        );

        if target.abs_diff(local.position_ms) > self.config.seek_threshold_ms {
            player.seek(target);
        }

        self.last_observed = None;
        true
    }

    // =========================================================================
    // Outbound
    // =========================================================================

    /// React to a change reported by the local player
    ///
    /// Plain state changes go through a leading and trailing edge throttle:
    /// the first change in a window is sent at once and the latest one is
    /// sent by [`tick`](Self::tick) when the window closes.
    pub fn on_local_change<O: Outbound>(
        &mut self,
        snapshot: LocalPlayback,
        is_active: bool,
        guard: &mut SyncGuard,
        out: &mut O,
        now_ms: i64,
    ) -> Option<BroadcastReason> {
        let previous = self.last_observed.replace((snapshot.clone(), now_ms));

        if guard.is_remote() {
            tracing::trace!("Local change during remote apply, not broadcasting");
            return None;
        }
        if !is_active || !out.is_connected() {
            return None;
        }
        if !guard.mark_local() {
            return None;
        }

        let Some((previous, observed_at)) = previous else {
            return self.broadcast(&snapshot, BroadcastReason::StateChanged, out, now_ms);
        };

        if snapshot.track_id != previous.track_id {
            return self.broadcast(&snapshot, BroadcastReason::TrackChanged, out, now_ms);
        }

        let expected = if previous.is_playing {
            previous
                .position_ms
                .saturating_add(now_ms.saturating_sub(observed_at).max(0) as u64)
        } else {
            previous.position_ms
        };
        if snapshot.position_ms.abs_diff(expected) >= self.config.seek_threshold_ms {
            return self.send_seek(snapshot.position_ms, out, now_ms);
        }

        if self.throttle_open(now_ms) {
            self.broadcast(&snapshot, BroadcastReason::StateChanged, out, now_ms)
        } else {
            self.trailing_pending = true;
            None
        }
    }

    /// Timer step: throttled trailing edge and periodic re-broadcast
    pub fn tick<P: Player, O: Outbound>(
        &mut self,
        is_active: bool,
        guard: &SyncGuard,
        player: &P,
        out: &mut O,
        now_ms: i64,
    ) -> Option<BroadcastReason> {
        if !is_active || !out.is_connected() {
            self.trailing_pending = false;
            self.next_periodic_at = None;
            return None;
        }
        if guard.is_remote() {
            return None;
        }

        if self.trailing_pending && self.throttle_open(now_ms) {
            let snapshot = player.playback();
            return self.broadcast(&snapshot, BroadcastReason::Throttled, out, now_ms);
        }

        let periodic = self.config.periodic_broadcast.as_millis() as i64;
        match self.next_periodic_at {
            None => {
                self.next_periodic_at = Some(now_ms + periodic);
                None
            }
            Some(at) if now_ms >= at => {
                self.next_periodic_at = Some(now_ms + periodic);
                let snapshot = player.playback();
                if snapshot.is_playing {
                    self.broadcast(&snapshot, BroadcastReason::Periodic, out, now_ms)
                } else {
                    None
                }
            }
            Some(_) => None,
        }
    }

    /// Broadcast the current state right away, bypassing the throttle
    pub fn publish_now<P: Player, O: Outbound>(
        &mut self,
        guard: &SyncGuard,
        player: &P,
        out: &mut O,
        now_ms: i64,
    ) -> Option<BroadcastReason> {
        if guard.is_remote() || !out.is_connected() {
            return None;
        }

        let snapshot = player.playback();
        self.last_observed = Some((snapshot.clone(), now_ms));
        self.broadcast(&snapshot, BroadcastReason::Takeover, out, now_ms)
    }

    /// Forget broadcast bookkeeping, e.g. after losing the active role
    pub fn reset(&mut self) {
        self.phase = PlaybackPhase::Idle;
        self.last_observed = None;
        self.last_broadcast_at = None;
        self.next_periodic_at = None;
        self.trailing_pending = false;
    }

    pub fn end_turn(&mut self) {
        self.phase = PlaybackPhase::Idle;
    }

    fn throttle_open(&self, now_ms: i64) -> bool {
        let throttle = self.config.broadcast_throttle.as_millis() as i64;
        self.last_broadcast_at
            .map_or(true, |at| now_ms.saturating_sub(at) >= throttle)
    }

    fn broadcast<O: Outbound>(
        &mut self,
        snapshot: &LocalPlayback,
        reason: BroadcastReason,
        out: &mut O,
        now_ms: i64,
    ) -> Option<BroadcastReason> {
        self.phase = PlaybackPhase::Broadcasting;
        tracing::trace!(reason = ?reason, "Broadcasting playback state");

        let outcome = out.send(ClientMessage::PlaybackStateUpdate(snapshot.to_sync(now_ms)));
        self.phase = PlaybackPhase::Idle;
        if !self.record_send(outcome, now_ms) {
            return None;
        }
        self.trailing_pending = false;
        Some(reason)
    }

    fn send_seek<O: Outbound>(
        &mut self,
        position_ms: u64,
        out: &mut O,
        now_ms: i64,
    ) -> Option<BroadcastReason> {
        self.phase = PlaybackPhase::Broadcasting;
        tracing::trace!(position_ms, "Broadcasting seek");

        let outcome = out.send(ClientMessage::Seek { position_ms });
        self.phase = PlaybackPhase::Idle;
        self.record_send(outcome, now_ms)
            .then_some(BroadcastReason::Seek)
    }

    /// Start a throttle window; a dropped send is retried on its trailing edge
    fn record_send(&mut self, outcome: SendOutcome, now_ms: i64) -> bool {
        self.last_broadcast_at = Some(now_ms);
        if outcome == SendOutcome::Dropped {
            tracing::debug!("Playback broadcast dropped, retrying on the trailing edge");
            self.trailing_pending = true;
            return false;
        }
        true
    }
}
