//! Heartbeat liveness tracking
//!
//! Detects half-open connections that never deliver a close event: if two
//! heartbeat intervals pass without a pong, the connection is considered dead.

use std::time::Duration;

use tokio::time::Instant;

/// What the transport should do when the heartbeat timer fires
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatAction {
    /// Not due yet
    Idle,
    /// Send a `Heartbeat` message now
    Send,
    /// No pong within two intervals; force-close the socket
    TimedOut,
}

/// Heartbeat schedule and pong bookkeeping for one connection
#[derive(Debug, Clone)]
pub struct HeartbeatMonitor {
    interval: Duration,
    next_due: Instant,
    last_pong: Instant,
}

impl HeartbeatMonitor {
    /// Start monitoring a connection established at `now`
    pub fn new(interval: Duration, now: Instant) -> Self {
        Self {
            interval,
            next_due: now + interval,
            last_pong: now,
        }
    }

    pub fn next_due(&self) -> Instant {
        self.next_due
    }

    /// Time without a pong after which the connection is declared dead
    pub fn timeout(&self) -> Duration {
        self.interval * 2
    }

    pub fn poll(&mut self, now: Instant) -> HeartbeatAction {
        if now < self.next_due {
            return HeartbeatAction::Idle;
        }

        if now.saturating_duration_since(self.last_pong) >= self.timeout() {
            return HeartbeatAction::TimedOut;
        }

        self.next_due = now + self.interval;
        HeartbeatAction::Send
    }

    pub fn record_pong(&mut self, now: Instant) {
        self.last_pong = now;
    }
}
