//! Device identity configuration

use crate::{get_env_or_default, ConfigError, ConfigResult};

/// Maximum accepted device ID length
const MAX_DEVICE_ID_LENGTH: usize = 128;

/// Identity this installation announces to the sync server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceConfig {
    /// Stable device identifier
    pub device_id: String,

    /// Human-readable device name
    pub device_name: String,

    /// Device type hint (web, desktop, mobile, tablet, speaker)
    pub device_type: String,
}

impl DeviceConfig {
    /// Load device identity from environment variables
    ///
    /// `RESONANCE_DEVICE_ID` should be persisted by the caller; when it is
    /// missing a fresh UUID is generated for this process only.
    pub fn from_env() -> ConfigResult<Self> {
        let device_id = match std::env::var("RESONANCE_DEVICE_ID") {
            Ok(id) if !id.is_empty() => id,
            _ => uuid::Uuid::new_v4().to_string(),
        };
        validate_device_id(&device_id)?;

        Ok(Self {
            device_id,
            device_name: get_env_or_default("RESONANCE_DEVICE_NAME", "Resonance Sync Agent"),
            device_type: get_env_or_default("RESONANCE_DEVICE_TYPE", "desktop"),
        })
    }

    /// Create an identity with explicit values (useful for testing)
    pub fn new(
        device_id: impl Into<String>,
        device_name: impl Into<String>,
        device_type: impl Into<String>,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            device_name: device_name.into(),
            device_type: device_type.into(),
        }
    }
}

/// Validate device ID format
pub fn validate_device_id(device_id: &str) -> ConfigResult<()> {
    let invalid = |reason: &str| {
        Err(ConfigError::InvalidValue(
            "RESONANCE_DEVICE_ID".to_string(),
            reason.to_string(),
        ))
    };

    if device_id.is_empty() {
        return invalid("device_id cannot be empty");
    }
    if device_id.len() > MAX_DEVICE_ID_LENGTH {
        return invalid("device_id must be at most 128 characters");
    }
    if !device_id
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '_')
    {
        return invalid("device_id contains invalid characters");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_device_id_when_unset() {
        temp_env::with_var_unset("RESONANCE_DEVICE_ID", || {
            let first = DeviceConfig::from_env().unwrap();
            let second = DeviceConfig::from_env().unwrap();
            assert_ne!(first.device_id, second.device_id);
            assert_eq!(first.device_type, "desktop");
        });
    }

    #[test]
    fn test_device_id_from_env() {
        temp_env::with_var("RESONANCE_DEVICE_ID", Some("living-room_1"), || {
            let config = DeviceConfig::from_env().unwrap();
            assert_eq!(config.device_id, "living-room_1");
        });
    }

    #[test]
    fn test_validate_device_id() {
        assert!(validate_device_id("device-1").is_ok());
        assert!(validate_device_id("").is_err());
        assert!(validate_device_id("has space").is_err());
        assert!(validate_device_id(&"x".repeat(129)).is_err());
    }
}
