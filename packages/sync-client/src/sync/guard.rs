//! Loop-prevention flag
//!
//! Marks whether the changes observed during the current turn originate
//! from this device or from an inbound sync. The owner clears it with
//! [`SyncGuard::end_turn`] once every synchronous reaction to an inbound
//! message has been observed, never while that message is still being
//! applied.

/// Origin of the state changes in the current turn
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateChangeSource {
    Local,
    Remote,
}

/// Shared loop-prevention flag for the playback and queue synchronizers
#[derive(Debug, Clone, Default)]
pub struct SyncGuard {
    source: Option<StateChangeSource>,
}

impl SyncGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn source(&self) -> Option<StateChangeSource> {
        self.source
    }

    /// An inbound message is being applied
    pub fn begin_remote(&mut self) {
        self.source = Some(StateChangeSource::Remote);
    }

    /// Claim the turn for a local change
    ///
    /// Returns `false`, leaving the flag untouched, when the turn already
    /// belongs to a remote apply.
    pub fn mark_local(&mut self) -> bool {
        match self.source {
            Some(StateChangeSource::Remote) => false,
            _ => {
                self.source = Some(StateChangeSource::Local);
                true
            }
        }
    }

    pub fn is_remote(&self) -> bool {
        self.source == Some(StateChangeSource::Remote)
    }

    /// Deferred reset at the end of a turn
    pub fn end_turn(&mut self) {
        self.source = None;
    }
}
