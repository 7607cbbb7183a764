//! Playback synchronization tuning

use std::time::Duration;

use crate::{parse_env, ConfigResult};

/// Thresholds and timers used when replicating playback state
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackSyncConfig {
    /// Minimum spacing of throttled state broadcasts
    pub broadcast_throttle: Duration,

    /// Position differences at or below this are treated as drift, not seeks
    pub seek_threshold_ms: u64,

    /// Position re-broadcast interval while playing
    pub periodic_broadcast: Duration,

    /// Timestamps older or newer than this are treated as clock desync
    pub max_drift_ms: i64,

    /// Volume differences at or below this are ignored
    pub volume_tolerance: f32,
}

impl PlaybackSyncConfig {
    /// Load playback sync tuning from environment variables
    pub fn from_env() -> ConfigResult<Self> {
        Ok(Self {
            broadcast_throttle: Duration::from_millis(parse_env(
                "RESONANCE_BROADCAST_THROTTLE_MS",
                250,
            )?),
            seek_threshold_ms: parse_env("RESONANCE_SEEK_THRESHOLD_MS", 1_000)?,
            periodic_broadcast: Duration::from_millis(parse_env(
                "RESONANCE_PERIODIC_BROADCAST_MS",
                5_000,
            )?),
            max_drift_ms: parse_env("RESONANCE_MAX_DRIFT_MS", 5_000)?,
            volume_tolerance: 0.01,
        })
    }
}

impl Default for PlaybackSyncConfig {
    fn default() -> Self {
        Self {
            broadcast_throttle: Duration::from_millis(250),
            seek_threshold_ms: 1_000,
            periodic_broadcast: Duration::from_secs(5),
            max_drift_ms: 5_000,
            volume_tolerance: 0.01,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PlaybackSyncConfig::default();
        assert_eq!(config.broadcast_throttle, Duration::from_millis(250));
        assert_eq!(config.seek_threshold_ms, 1000);
        assert_eq!(config.periodic_broadcast, Duration::from_secs(5));
        assert_eq!(config.max_drift_ms, 5000);
    }

    #[test]
    fn test_from_env_uses_defaults() {
        temp_env::with_vars_unset(
            [
                "RESONANCE_BROADCAST_THROTTLE_MS",
                "RESONANCE_SEEK_THRESHOLD_MS",
                "RESONANCE_PERIODIC_BROADCAST_MS",
                "RESONANCE_MAX_DRIFT_MS",
            ],
            || {
                let config = PlaybackSyncConfig::from_env().unwrap();
                assert_eq!(config, PlaybackSyncConfig::default());
            },
        );
    }
}
