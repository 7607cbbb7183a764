//! Exponential reconnect backoff with jitter

use std::time::Duration;

use rand::Rng;

/// Jitter is added on top of the base delay, up to this fraction of it
const JITTER_DIVISOR: u32 = 10;

/// Tracks reconnect attempts and computes their delays
///
/// The attempt counter only goes back to zero through [`reset`](Self::reset),
/// which the transport calls on an explicit `connect`, never on a retry.
#[derive(Debug, Clone)]
pub struct ReconnectBackoff {
    initial: Duration,
    max: Duration,
    attempt: u32,
}

impl ReconnectBackoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            attempt: 0,
        }
    }

    /// Number of attempts scheduled since the last reset
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Advance to the next attempt and return its jittered delay
    pub fn next_delay(&mut self) -> Duration {
        self.next_delay_with(&mut rand::thread_rng())
    }

    /// [`next_delay`](Self::next_delay) with a caller-provided RNG
    pub fn next_delay_with<R: Rng>(&mut self, rng: &mut R) -> Duration {
        self.attempt = self.attempt.saturating_add(1);
        let base = self.base_delay(self.attempt);
        base + jitter(base, rng)
    }

    /// `min(initial * 2^(attempt-1), max)` without jitter
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.max(1) - 1;
        let factor = 2u32.saturating_pow(exponent);
        self.initial.saturating_mul(factor).min(self.max)
    }
}

fn jitter<R: Rng>(base: Duration, rng: &mut R) -> Duration {
    let bound_ms = (base / JITTER_DIVISOR).as_millis() as u64;
    Duration::from_millis(rng.gen_range(0..=bound_ms))
}
