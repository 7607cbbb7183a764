//! Transfer controller
//!
//! Thin guards around the single `TransferPlayback` request. The server is
//! the arbiter: the registry only changes once it confirms the handoff.

use serde::Serialize;

use crate::protocol::ClientMessage;
use crate::registry::{ActiveChange, DeviceRegistry};
use crate::transport::{Outbound, SendOutcome};

/// What a transfer request did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferOutcome {
    /// `TransferPlayback` handed to the transport
    Requested,
    /// Target is already the active device
    AlreadyActive,
    /// Not connected; nothing sent
    NotConnected,
    /// Transport dropped the request (rate limited)
    Dropped,
}

#[derive(Debug, Clone, Default)]
pub struct TransferController {
    pending_target: Option<String>,
}

impl TransferController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Target of a request the server has not answered yet
    pub fn pending_target(&self) -> Option<&str> {
        self.pending_target.as_deref()
    }

    /// Ask the server to make `target_device_id` the active device
    pub fn transfer_to_device<O: Outbound>(
        &mut self,
        target_device_id: &str,
        registry: &DeviceRegistry,
        out: &mut O,
    ) -> TransferOutcome {
        if !out.is_connected() {
            return TransferOutcome::NotConnected;
        }
        if registry.is_device_active(target_device_id) {
            return TransferOutcome::AlreadyActive;
        }

        tracing::info!(target_device_id, "Requesting playback transfer");
        let outcome = out.send(ClientMessage::TransferPlayback {
            target_device_id: target_device_id.to_string(),
        });

        if outcome == SendOutcome::Dropped {
            return TransferOutcome::Dropped;
        }
        self.pending_target = Some(target_device_id.to_string());
        TransferOutcome::Requested
    }

    /// Ask the server to make this device the active one
    pub fn request_control<O: Outbound>(
        &mut self,
        registry: &DeviceRegistry,
        out: &mut O,
    ) -> TransferOutcome {
        let self_id = registry.device_id().to_string();
        self.transfer_to_device(&self_id, registry, out)
    }

    /// Settle the pending request once the active device changes
    pub fn on_active_change(&mut self, change: &ActiveChange) {
        if let Some(target) = self.pending_target.take() {
            if change.current.as_deref() != Some(target.as_str()) {
                tracing::debug!(
                    target_device_id = %target,
                    "Active device changed to a different device than requested"
                );
            }
        }
    }

    pub fn reset(&mut self) {
        self.pending_target = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{DevicePresence, DeviceType};
    use crate::registry::DeviceIdentity;
    use crate::sync::testing::RecordingOutbound;

    fn registry(active: &str) -> DeviceRegistry {
        let mut registry =
            DeviceRegistry::new(DeviceIdentity::new("me", "Desk", DeviceType::Desktop));
        let devices = ["me", "phone"]
            .iter()
            .map(|id| {
                let mut d = DevicePresence::new(id.to_string(), id.to_string(), DeviceType::Web);
                d.is_active = *id == active;
                d
            })
            .collect();
        registry.replace_devices(devices);
        registry
    }

    #[test]
    fn test_transfer_sends_request() {
        let mut transfer = TransferController::new();
        let mut out = RecordingOutbound::connected();

        assert_eq!(
            transfer.transfer_to_device("phone", &registry("me"), &mut out),
            TransferOutcome::Requested
        );
        assert_eq!(
            out.sent,
            vec![ClientMessage::TransferPlayback {
                target_device_id: "phone".to_string()
            }]
        );
        assert_eq!(transfer.pending_target(), Some("phone"));
    }

    #[test]
    fn test_transfer_to_active_is_noop() {
        let mut transfer = TransferController::new();
        let mut out = RecordingOutbound::connected();

        assert_eq!(
            transfer.transfer_to_device("phone", &registry("phone"), &mut out),
            TransferOutcome::AlreadyActive
        );
        assert!(out.sent.is_empty());
    }

    #[test]
    fn test_disconnected_is_noop() {
        let mut transfer = TransferController::new();
        let mut out = RecordingOutbound::disconnected();

        assert_eq!(
            transfer.request_control(&registry("phone"), &mut out),
            TransferOutcome::NotConnected
        );
        assert!(out.sent.is_empty());
    }

    #[test]
    fn test_request_control_targets_self() {
        let mut transfer = TransferController::new();
        let mut out = RecordingOutbound::connected();

        assert_eq!(
            transfer.request_control(&registry("phone"), &mut out),
            TransferOutcome::Requested
        );
        assert_eq!(
            out.sent,
            vec![ClientMessage::TransferPlayback {
                target_device_id: "me".to_string()
            }]
        );

        assert_eq!(
            transfer.request_control(&registry("me"), &mut out),
            TransferOutcome::AlreadyActive
        );
    }

    #[test]
    fn test_pending_settles_on_active_change() {
        let mut transfer = TransferController::new();
        let mut out = RecordingOutbound::connected();
        transfer.transfer_to_device("phone", &registry("me"), &mut out);

        transfer.on_active_change(&ActiveChange {
            previous: Some("me".to_string()),
            current: Some("phone".to_string()),
        });
        assert!(transfer.pending_target().is_none());
    }
}
