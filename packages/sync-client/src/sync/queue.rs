//! Queue synchronizer
//!
//! Whole-queue replication: the active device sends its full queue on every
//! change, passive devices replace theirs on every `QueueSync`. No throttle,
//! no threshold, same loop-prevention flag as playback.

use super::guard::SyncGuard;
use crate::player::{LocalQueue, Player};
use crate::protocol::{ClientMessage, QueueState};
use crate::transport::Outbound;

#[derive(Debug, Clone, Default)]
pub struct QueueSynchronizer {
    broadcasts: u64,
}

impl QueueSynchronizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `QueueUpdate` messages handed to the transport
    pub fn broadcasts(&self) -> u64 {
        self.broadcasts
    }

    /// Replace the local queue with an inbound `QueueSync`
    pub fn apply_remote<P: Player>(
        &mut self,
        queue: &QueueState,
        is_active: bool,
        guard: &mut SyncGuard,
        player: &mut P,
    ) -> bool {
        if is_active {
            tracing::debug!("Ignoring QueueSync on the active device");
            return false;
        }

        guard.begin_remote();
        let local = LocalQueue::from_sync(queue);
        if local.current_index != queue.current_index {
            tracing::debug!(
                index = queue.current_index,
                tracks = queue.tracks.len(),
                "Clamping out-of-range queue index"
            );
        }
        player.replace_queue(local);
        true
    }

    /// Broadcast the local queue after a local change
    pub fn on_local_change<O: Outbound>(
        &mut self,
        queue: &LocalQueue,
        is_active: bool,
        guard: &mut SyncGuard,
        out: &mut O,
    ) -> bool {
        if guard.is_remote() {
            tracing::trace!("Queue change during remote apply, not broadcasting");
            return false;
        }
        if !is_active || !out.is_connected() || !guard.mark_local() {
            return false;
        }

        self.send(queue, out);
        true
    }

    /// Broadcast the current queue unconditionally (takeover)
    pub fn publish_now<P: Player, O: Outbound>(
        &mut self,
        guard: &SyncGuard,
        player: &P,
        out: &mut O,
    ) -> bool {
        if guard.is_remote() || !out.is_connected() {
            return false;
        }

        self.send(&player.queue(), out);
        true
    }

    fn send<O: Outbound>(&mut self, queue: &LocalQueue, out: &mut O) {
        tracing::trace!(tracks = queue.tracks.len(), "Broadcasting queue");
        out.send(ClientMessage::QueueUpdate(queue.to_sync()));
        self.broadcasts += 1;
    }
}
