//! Sync transport configuration types

use std::time::Duration;

use crate::{parse_env, ConfigError, ConfigResult};

/// Persistent-connection behaviour of the sync client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    /// Reconnect automatically after a non-intentional close
    pub reconnect_enabled: bool,

    /// Delay before the first reconnect attempt
    pub initial_reconnect_delay: Duration,

    /// Upper bound for the exponential backoff delay
    pub max_reconnect_delay: Duration,

    /// Give up after this many consecutive attempts (None = never)
    pub max_reconnect_attempts: Option<u32>,

    /// Interval between heartbeats on an established connection
    pub heartbeat_interval: Duration,

    /// Outbound messages allowed per one-second window (heartbeats excluded)
    pub max_messages_per_second: u32,

    /// Messages held while disconnected; the oldest is dropped on overflow
    pub max_queue_size: usize,

    /// Delay before resuming a queue flush that hit the rate limit
    pub flush_retry_delay: Duration,

    /// Time allowed for the socket to open
    pub connect_timeout: Duration,
}

impl TransportConfig {
    /// Load transport configuration from environment variables
    pub fn from_env() -> ConfigResult<Self> {
        let defaults = Self::default();
        let max_attempts: u32 = parse_env("RESONANCE_RECONNECT_MAX_ATTEMPTS", 0)?;

        let config = Self {
            reconnect_enabled: parse_env("RESONANCE_RECONNECT_ENABLED", defaults.reconnect_enabled)?,
            initial_reconnect_delay: Duration::from_millis(parse_env(
                "RESONANCE_RECONNECT_INITIAL_DELAY_MS",
                1_000,
            )?),
            max_reconnect_delay: Duration::from_millis(parse_env(
                "RESONANCE_RECONNECT_MAX_DELAY_MS",
                30_000,
            )?),
            max_reconnect_attempts: (max_attempts > 0).then_some(max_attempts),
            heartbeat_interval: Duration::from_millis(parse_env(
                "RESONANCE_HEARTBEAT_INTERVAL_MS",
                30_000,
            )?),
            max_messages_per_second: parse_env(
                "RESONANCE_RATE_LIMIT_PER_SEC",
                defaults.max_messages_per_second,
            )?,
            max_queue_size: parse_env("RESONANCE_OUTBOUND_QUEUE_SIZE", defaults.max_queue_size)?,
            flush_retry_delay: defaults.flush_retry_delay,
            connect_timeout: Duration::from_millis(parse_env(
                "RESONANCE_CONNECT_TIMEOUT_MS",
                10_000,
            )?),
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the transport cannot run with
    pub fn validate(&self) -> ConfigResult<()> {
        if self.heartbeat_interval.is_zero() {
            return Err(ConfigError::ValidationError(
                "heartbeat interval must be greater than zero".to_string(),
            ));
        }
        if self.max_messages_per_second == 0 {
            return Err(ConfigError::ValidationError(
                "rate limit must allow at least one message per second".to_string(),
            ));
        }
        if self.initial_reconnect_delay > self.max_reconnect_delay {
            return Err(ConfigError::ValidationError(format!(
                "initial reconnect delay ({:?}) exceeds maximum ({:?})",
                self.initial_reconnect_delay, self.max_reconnect_delay
            )));
        }
        Ok(())
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            reconnect_enabled: true,
            initial_reconnect_delay: Duration::from_secs(1),
            max_reconnect_delay: Duration::from_secs(30),
            max_reconnect_attempts: None,
            heartbeat_interval: Duration::from_secs(30),
            max_messages_per_second: 4,
            max_queue_size: 100,
            flush_retry_delay: Duration::from_secs(1),
            connect_timeout: Duration::from_secs(10),
        }
    }
}
