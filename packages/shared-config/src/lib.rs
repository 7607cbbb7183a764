//! Shared configuration types for the Resonance sync client
//!
//! This crate provides the configuration consumed by the sync client
//! library and the agent binary: server endpoint, device identity,
//! transport behaviour and playback sync tuning.

mod device;
mod error;
mod playback;
mod server;
mod transport;

pub use device::{validate_device_id, DeviceConfig};
pub use error::{ConfigError, ConfigResult};
pub use playback::PlaybackSyncConfig;
pub use server::SyncServerConfig;
pub use transport::TransportConfig;

use std::env;

/// Complete sync client configuration
#[derive(Debug, Clone)]
pub struct SyncClientConfig {
    /// Sync server endpoint and token
    pub server: SyncServerConfig,

    /// Identity of this device
    pub device: DeviceConfig,

    /// Connection, heartbeat, rate limit and queue settings
    pub transport: TransportConfig,

    /// Playback replication thresholds
    pub playback: PlaybackSyncConfig,

    /// Environment mode (development, staging, production)
    pub environment: Environment,

    /// Log level or filter directives (from RUST_LOG or LOG_LEVEL)
    ///
    /// Defaults to `info` in production and `debug` elsewhere.
    pub log_level: String,
}

/// Application environment mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    #[default]
    Development,
    Staging,
    Production,
}

impl std::str::FromStr for Environment {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_lowercase().as_str() {
            "production" | "prod" => Self::Production,
            "staging" | "stage" => Self::Staging,
            _ => Self::Development,
        })
    }
}

impl Environment {
    /// Check if this is a production environment
    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }

    /// Log level used when neither RUST_LOG nor LOG_LEVEL is set
    pub fn default_log_level(&self) -> &'static str {
        if self.is_production() {
            "info"
        } else {
            "debug"
        }
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Development => write!(f, "development"),
            Self::Staging => write!(f, "staging"),
            Self::Production => write!(f, "production"),
        }
    }
}

impl SyncClientConfig {
    /// Load the full configuration from environment variables
    ///
    /// A `.env` file in the working directory is honoured if present.
    pub fn from_env() -> ConfigResult<Self> {
        dotenvy::dotenv().ok();

        let environment: Environment = env::var("ENVIRONMENT")
            .unwrap_or_else(|_| "development".to_string())
            .parse()
            .unwrap_or_default();

        Ok(Self {
            server: SyncServerConfig::from_env()?,
            device: DeviceConfig::from_env()?,
            transport: TransportConfig::from_env()?,
            playback: PlaybackSyncConfig::from_env()?,
            log_level: env::var("RUST_LOG")
                .or_else(|_| env::var("LOG_LEVEL"))
                .unwrap_or_else(|_| environment.default_log_level().to_string()),
            environment,
        })
    }

    /// Check that a token is available before the first connect
    pub fn require_token(&self) -> ConfigResult<&str> {
        self.server
            .token
            .as_deref()
            .ok_or_else(|| ConfigError::MissingEnvVar("RESONANCE_TOKEN".to_string()))
    }
}

/// Helper function to get an optional environment variable with a default
pub fn get_env_or_default(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

/// Helper function to parse an environment variable into a specific type
pub fn parse_env<T>(name: &str, default: T) -> ConfigResult<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(val) => val
            .parse()
            .map_err(|e| ConfigError::InvalidValue(name.to_string(), format!("{}", e))),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_environment_parsing() {
        assert_eq!(
            "production".parse::<Environment>().unwrap(),
            Environment::Production
        );
        assert_eq!(
            "prod".parse::<Environment>().unwrap(),
            Environment::Production
        );
        assert_eq!(
            "staging".parse::<Environment>().unwrap(),
            Environment::Staging
        );
        assert_eq!(
            "stage".parse::<Environment>().unwrap(),
            Environment::Staging
        );
        assert_eq!(
            "development".parse::<Environment>().unwrap(),
            Environment::Development
        );
        assert_eq!(
            "dev".parse::<Environment>().unwrap(),
            Environment::Development
        );
        assert_eq!(
            "anything".parse::<Environment>().unwrap(),
            Environment::Development
        );
    }

    #[test]
    fn test_environment_display() {
        assert_eq!(format!("{}", Environment::Production), "production");
        assert_eq!(format!("{}", Environment::Staging), "staging");
        assert_eq!(format!("{}", Environment::Development), "development");
    }

    #[test]
    fn test_default_log_level_follows_environment() {
        temp_env::with_vars(
            [
                ("RUST_LOG", None),
                ("LOG_LEVEL", None),
                ("ENVIRONMENT", Some("production")),
            ],
            || {
                let config = SyncClientConfig::from_env().unwrap();
                assert!(config.environment.is_production());
                assert_eq!(config.log_level, "info");
            },
        );

        temp_env::with_vars(
            [
                ("RUST_LOG", None),
                ("LOG_LEVEL", None),
                ("ENVIRONMENT", Some("staging")),
            ],
            || {
                let config = SyncClientConfig::from_env().unwrap();
                assert_eq!(config.log_level, "debug");
            },
        );
    }

    #[test]
    fn test_log_level_prefers_rust_log() {
        temp_env::with_vars(
            [
                ("RUST_LOG", Some("resonance_sync_client=trace")),
                ("LOG_LEVEL", Some("warn")),
            ],
            || {
                let config = SyncClientConfig::from_env().unwrap();
                assert_eq!(config.log_level, "resonance_sync_client=trace");
            },
        );

        temp_env::with_vars([("RUST_LOG", None), ("LOG_LEVEL", Some("warn"))], || {
            let config = SyncClientConfig::from_env().unwrap();
            assert_eq!(config.log_level, "warn");
        });
    }

    #[test]
    fn test_require_token() {
        temp_env::with_var("RESONANCE_TOKEN", Some("access-token"), || {
            let config = SyncClientConfig::from_env().unwrap();
            assert_eq!(config.require_token().unwrap(), "access-token");
        });

        temp_env::with_var_unset("RESONANCE_TOKEN", || {
            let config = SyncClientConfig::from_env().unwrap();
            assert!(matches!(
                config.require_token(),
                Err(ConfigError::MissingEnvVar(_))
            ));
        });
    }
}
