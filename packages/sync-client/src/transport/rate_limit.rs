//! Outbound send rate limiting
//!
//! Sliding one-second window over send timestamps. Heartbeats never pass
//! through here; the transport sends them unconditionally.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;

/// Sliding window used by the in-memory limiter
const WINDOW: Duration = Duration::from_secs(1);

/// Sliding-window limiter for outbound messages
#[derive(Debug, Clone)]
pub struct SendRateLimiter {
    max_per_window: u32,
    window: Duration,
    timestamps: VecDeque<Instant>,
}

impl SendRateLimiter {
    /// Allow `max_per_second` sends in any one-second window
    pub fn new(max_per_second: u32) -> Self {
        Self {
            max_per_window: max_per_second,
            window: WINDOW,
            timestamps: VecDeque::with_capacity(max_per_second as usize),
        }
    }

    /// Record a send at `now` if the window has room
    pub fn try_acquire(&mut self, now: Instant) -> bool {
        self.evict_expired(now);

        if (self.timestamps.len() as u32) < self.max_per_window {
            self.timestamps.push_back(now);
            true
        } else {
            false
        }
    }

    /// Time until the oldest send leaves the window
    pub fn retry_after(&self, now: Instant) -> Duration {
        match self.timestamps.front() {
            Some(&oldest) if self.timestamps.len() as u32 >= self.max_per_window => {
                self.window.saturating_sub(now.saturating_duration_since(oldest))
            }
            _ => Duration::ZERO,
        }
    }

    /// Sends recorded in the current window
    pub fn in_window(&mut self, now: Instant) -> usize {
        self.evict_expired(now);
        self.timestamps.len()
    }

    fn evict_expired(&mut self, now: Instant) {
        while let Some(&oldest) = self.timestamps.front() {
            if now.saturating_duration_since(oldest) >= self.window {
                self.timestamps.pop_front();
            } else {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allows_up_to_cap() {
        let mut limiter = SendRateLimiter::new(4);
        let now = Instant::now();

        for _ in 0..4 {
            assert!(limiter.try_acquire(now));
        }
        assert!(!limiter.try_acquire(now));
        assert_eq!(limiter.in_window(now), 4);
    }

    #[test]
    fn test_window_slides() {
        let mut limiter = SendRateLimiter::new(2);
        let start = Instant::now();

        assert!(limiter.try_acquire(start));
        assert!(limiter.try_acquire(start + Duration::from_millis(600)));
        assert!(!limiter.try_acquire(start + Duration::from_millis(900)));

        // First send has left the window, second has not
        assert!(limiter.try_acquire(start + Duration::from_millis(1_000)));
        assert!(!limiter.try_acquire(start + Duration::from_millis(1_100)));
        assert!(limiter.try_acquire(start + Duration::from_millis(1_600)));
    }

    #[test]
    fn test_retry_after() {
        let mut limiter = SendRateLimiter::new(1);
        let start = Instant::now();

        assert_eq!(limiter.retry_after(start), Duration::ZERO);
        assert!(limiter.try_acquire(start));
        assert_eq!(
            limiter.retry_after(start + Duration::from_millis(300)),
            Duration::from_millis(700)
        );
    }

    #[test]
    fn test_rejected_sends_are_not_recorded() {
        let mut limiter = SendRateLimiter::new(1);
        let start = Instant::now();

        assert!(limiter.try_acquire(start));
        for offset in [100, 200, 300] {
            assert!(!limiter.try_acquire(start + Duration::from_millis(offset)));
        }
        assert!(limiter.try_acquire(start + Duration::from_secs(1)));
    }
}
