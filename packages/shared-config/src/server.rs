//! Sync server endpoint configuration

use crate::{get_env_or_default, ConfigError, ConfigResult};

/// Where the sync socket connects and with which credentials
#[derive(Clone)]
pub struct SyncServerConfig {
    /// WebSocket endpoint (ws:// or wss://)
    pub ws_url: String,

    /// Pre-issued bearer token, if one is available at startup
    pub token: Option<String>,
}

impl std::fmt::Debug for SyncServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncServerConfig")
            .field("ws_url", &self.ws_url)
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl SyncServerConfig {
    /// Load server configuration from environment variables
    pub fn from_env() -> ConfigResult<Self> {
        let config = Self {
            ws_url: get_env_or_default("RESONANCE_WS_URL", "ws://localhost:8080/ws"),
            token: std::env::var("RESONANCE_TOKEN").ok().filter(|s| !s.is_empty()),
        };
        config.validate()?;
        Ok(config)
    }

    /// Create a configuration with a custom URL (useful for testing)
    pub fn with_url(ws_url: impl Into<String>) -> Self {
        Self {
            ws_url: ws_url.into(),
            token: None,
        }
    }

    /// Check the URL uses a WebSocket scheme
    pub fn validate(&self) -> ConfigResult<()> {
        if self.ws_url.starts_with("ws://") || self.ws_url.starts_with("wss://") {
            Ok(())
        } else {
            Err(ConfigError::InvalidUrl(
                "RESONANCE_WS_URL".to_string(),
                "expected a ws:// or wss:// URL".to_string(),
            ))
        }
    }
}

impl Default for SyncServerConfig {
    fn default() -> Self {
        Self::with_url("ws://localhost:8080/ws")
    }
}
