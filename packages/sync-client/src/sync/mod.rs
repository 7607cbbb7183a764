//! State replication between devices
//!
//! - [`PlaybackSynchronizer`]: play state, volume, position with drift
//!   correction and a broadcast throttle
//! - [`QueueSynchronizer`]: whole-queue replacement
//! - [`TransferController`]: active-device handoff requests
//! - [`SyncGuard`]: the loop-prevention flag both synchronizers share

mod guard;
mod playback;
mod queue;
mod transfer;

pub use guard::{StateChangeSource, SyncGuard};
pub use playback::{drift_adjusted, BroadcastReason, PlaybackPhase, PlaybackSynchronizer};
pub use queue::QueueSynchronizer;
pub use transfer::{TransferController, TransferOutcome};
