//! Device registry
//!
//! Holds this device's identity, the presence list of every known device,
//! the mirrored connection state, and which device is active. The active
//! device id is never stored on its own: it is re-derived from the presence
//! list after every mutation, so at most one entry can ever be reported
//! as active.

use resonance_shared_config::DeviceConfig;
use uuid::Uuid;

use crate::protocol::{DevicePresence, DeviceType, ServerMessage};
use crate::transport::ConnectionState;

/// Stable identity of this installation
///
/// Survives reconnects and [`DeviceRegistry::reset`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub device_id: String,
    pub device_name: String,
    pub device_type: DeviceType,
}

impl DeviceIdentity {
    pub fn new(
        device_id: impl Into<String>,
        device_name: impl Into<String>,
        device_type: DeviceType,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            device_name: device_name.into(),
            device_type,
        }
    }

    pub fn from_config(config: &DeviceConfig) -> Self {
        Self {
            device_id: config.device_id.clone(),
            device_name: config.device_name.clone(),
            device_type: config.device_type.parse().unwrap_or(DeviceType::Unknown),
        }
    }
}

/// Change of the active device caused by one registry mutation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveChange {
    pub previous: Option<String>,
    pub current: Option<String>,
}

/// Connection, session and presence state for one sync client
#[derive(Debug, Clone)]
pub struct DeviceRegistry {
    identity: DeviceIdentity,
    connection_state: ConnectionState,
    session_id: Option<Uuid>,
    devices: Vec<DevicePresence>,
    active_device_id: Option<String>,
}

impl DeviceRegistry {
    pub fn new(identity: DeviceIdentity) -> Self {
        Self {
            identity,
            connection_state: ConnectionState::Disconnected,
            session_id: None,
            devices: Vec::new(),
            active_device_id: None,
        }
    }

    // =========================================================================
    // Identity
    // =========================================================================

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    pub fn device_id(&self) -> &str {
        &self.identity.device_id
    }

    // =========================================================================
    // Connection / session
    // =========================================================================

    /// Mirror the transport's connection state
    pub fn set_connection_state(&mut self, state: ConnectionState) {
        self.connection_state = state;
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection_state
    }

    pub fn is_connected(&self) -> bool {
        self.connection_state == ConnectionState::Connected
    }

    pub fn session_id(&self) -> Option<Uuid> {
        self.session_id
    }

    /// Clear connection, session and device state, keeping identity
    pub fn reset(&mut self) {
        self.connection_state = ConnectionState::Disconnected;
        self.session_id = None;
        self.devices.clear();
        self.active_device_id = None;
    }

    // =========================================================================
    // Presence mutations
    // =========================================================================

    /// Apply the registry-relevant part of an inbound message
    ///
    /// Returns the active-device change, if the message caused one.
    pub fn apply(&mut self, message: &ServerMessage) -> Option<ActiveChange> {
        let previous = self.active_device_id.clone();

        match message {
            ServerMessage::Connected(payload) => {
                self.session_id = Some(payload.session_id);
                self.set_active_device(payload.active_device_id.as_deref());
            }
            ServerMessage::DeviceList(devices) => self.replace_devices(devices.clone()),
            ServerMessage::DeviceConnected(presence) => self.upsert_device(presence.clone()),
            ServerMessage::DeviceDisconnected { device_id } => self.remove_device(device_id),
            ServerMessage::ActiveDeviceChanged { new_device_id, .. } => {
                self.set_active_device(new_device_id.as_deref())
            }
            ServerMessage::TransferAccepted { to_device_id } => {
                self.set_active_device(Some(to_device_id))
            }
            _ => return None,
        }

        if previous != self.active_device_id {
            Some(ActiveChange {
                previous,
                current: self.active_device_id.clone(),
            })
        } else {
            None
        }
    }

    /// Replace the whole presence list
    ///
    /// If several entries claim to be active, the first one in list order
    /// keeps the flag.
    pub fn replace_devices(&mut self, devices: Vec<DevicePresence>) {
        self.devices = devices;

        let mut seen_active = false;
        for device in &mut self.devices {
            if device.is_active {
                if seen_active {
                    tracing::debug!(
                        device_id = %device.device_id,
                        "Multiple devices marked active, clearing duplicate"
                    );
                    device.is_active = false;
                }
                seen_active = true;
            }
        }

        self.recompute_active();
    }

    /// Insert or refresh one device, keeping its position in the list
    pub fn upsert_device(&mut self, presence: DevicePresence) {
        if presence.is_active {
            for device in &mut self.devices {
                device.is_active = false;
            }
        }

        match self
            .devices
            .iter_mut()
            .find(|d| d.device_id == presence.device_id)
        {
            Some(existing) => *existing = presence,
            None => self.devices.push(presence),
        }

        self.recompute_active();
    }

    pub fn remove_device(&mut self, device_id: &str) {
        self.devices.retain(|d| d.device_id != device_id);
        self.recompute_active();
    }

    /// Mark exactly one known device active, or none
    ///
    /// An id that is not in the presence list clears the active device.
    pub fn set_active_device(&mut self, device_id: Option<&str>) {
        for device in &mut self.devices {
            device.is_active = Some(device.device_id.as_str()) == device_id;
        }
        self.recompute_active();
    }

    fn recompute_active(&mut self) {
        self.active_device_id = self
            .devices
            .iter()
            .find(|d| d.is_active)
            .map(|d| d.device_id.clone());
    }

    // =========================================================================
    // Selectors
    // =========================================================================

    pub fn devices(&self) -> &[DevicePresence] {
        &self.devices
    }

    pub fn active_device_id(&self) -> Option<&str> {
        self.active_device_id.as_deref()
    }

    /// Check if this device is the single writer
    pub fn is_active_device(&self) -> bool {
        self.active_device_id.as_deref() == Some(self.identity.device_id.as_str())
    }

    pub fn is_device_active(&self, device_id: &str) -> bool {
        self.active_device_id.as_deref() == Some(device_id)
    }

    /// Every known device except this one
    pub fn other_devices(&self) -> impl Iterator<Item = &DevicePresence> {
        self.devices
            .iter()
            .filter(move |d| d.device_id != self.identity.device_id)
    }

    /// Presence of this device, once the server has acknowledged it
    pub fn this_device(&self) -> Option<&DevicePresence> {
        self.device(&self.identity.device_id)
    }

    pub fn active_device(&self) -> Option<&DevicePresence> {
        self.active_device_id
            .as_deref()
            .and_then(|id| self.device(id))
    }

    pub fn device(&self, device_id: &str) -> Option<&DevicePresence> {
        self.devices.iter().find(|d| d.device_id == device_id)
    }
}
