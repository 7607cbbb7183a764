//! Sync engine
//!
//! Routes transport events and local player changes through the registry,
//! the synchronizers, the transfer controller and the notifier. The engine
//! does no I/O and holds no clock: the service passes in the transport (as
//! [`Outbound`]) and the current wall-clock time for every call.

use resonance_shared_config::PlaybackSyncConfig;
use serde::Serialize;
use tokio::sync::broadcast;

use crate::notifier::{EventNotifier, Notification};
use crate::player::Player;
use crate::protocol::{ClientMessage, DevicePresence, ServerMessage, SyncedSettings};
use crate::registry::{ActiveChange, DeviceIdentity, DeviceRegistry};
use crate::sync::{
    PlaybackSynchronizer, QueueSynchronizer, SyncGuard, TransferController, TransferOutcome,
};
use crate::transport::{ConnectionState, Outbound, TransportEvent};

/// Capacity of the client event broadcast channel
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Events published to subscribers of the sync client
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "payload")]
pub enum ClientEvent {
    ConnectionStateChanged(ConnectionState),
    Notification(Notification),
    /// The presence list changed
    DevicesChanged(Vec<DevicePresence>),
    /// Settings pushed by another device
    SettingsChanged(SyncedSettings),
}

/// Which part of the local player changed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalChange {
    Playback,
    Queue,
}

/// Point-in-time view of the engine, for callers outside the service task
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncSnapshot {
    pub connection_state: ConnectionState,
    pub device_id: String,
    pub active_device_id: Option<String>,
    pub is_active_device: bool,
    pub devices: Vec<DevicePresence>,
}

pub struct SyncEngine<P: Player> {
    registry: DeviceRegistry,
    guard: SyncGuard,
    playback: PlaybackSynchronizer,
    queue: QueueSynchronizer,
    transfer: TransferController,
    notifier: EventNotifier,
    player: P,
    last_remote_settings: Option<SyncedSettings>,
    events: broadcast::Sender<ClientEvent>,
}

impl<P: Player> SyncEngine<P> {
    pub fn new(
        identity: DeviceIdentity,
        config: PlaybackSyncConfig,
        player: P,
        events: broadcast::Sender<ClientEvent>,
    ) -> Self {
        Self {
            registry: DeviceRegistry::new(identity),
            guard: SyncGuard::new(),
            playback: PlaybackSynchronizer::new(config),
            queue: QueueSynchronizer::new(),
            transfer: TransferController::new(),
            notifier: EventNotifier::new(),
            player,
            last_remote_settings: None,
            events,
        }
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    pub fn guard(&self) -> &SyncGuard {
        &self.guard
    }

    pub fn player(&self) -> &P {
        &self.player
    }

    pub fn player_mut(&mut self) -> &mut P {
        &mut self.player
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    pub fn snapshot(&self) -> SyncSnapshot {
        SyncSnapshot {
            connection_state: self.registry.connection_state(),
            device_id: self.registry.device_id().to_string(),
            active_device_id: self.registry.active_device_id().map(str::to_string),
            is_active_device: self.registry.is_active_device(),
            devices: self.registry.devices().to_vec(),
        }
    }

    // =========================================================================
    // Transport events
    // =========================================================================

    pub fn handle_transport_event<O: Outbound>(
        &mut self,
        event: TransportEvent,
        out: &mut O,
        now_ms: i64,
    ) {
        match event {
            TransportEvent::StateChanged { current, .. } => {
                self.registry.set_connection_state(current);
                if current != ConnectionState::Connected {
                    self.playback.reset();
                }

                self.emit(ClientEvent::ConnectionStateChanged(current));
                for notification in self.notifier.on_state_change(current) {
                    self.emit(ClientEvent::Notification(notification));
                }
            }
            TransportEvent::Message(message) => self.handle_message(message, out, now_ms),
            TransportEvent::Reconnecting { attempt, delay } => {
                tracing::debug!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Reconnect scheduled"
                );
            }
            TransportEvent::Error(error) => {
                tracing::debug!(error = %error, "Transport error");
            }
        }
    }

    /// Apply one inbound message
    pub fn handle_message<O: Outbound>(&mut self, message: ServerMessage, out: &mut O, now_ms: i64) {
        tracing::trace!(kind = message.kind(), "Handling server message");

        let change = self.registry.apply(&message);
        let is_active = self.registry.is_active_device();

        match message {
            ServerMessage::Connected(_) | ServerMessage::Pong { .. } => {}
            ServerMessage::Error(payload) => {
                let notification = self.notifier.on_server_error(&payload);
                self.emit(ClientEvent::Notification(notification));
            }
            ServerMessage::PlaybackSync(state) => {
                self.playback.apply_remote_state(
                    &state,
                    is_active,
                    &mut self.guard,
                    &mut self.player,
                    now_ms,
                );
            }
            ServerMessage::SeekSync {
                position_ms,
                timestamp,
            } => {
                self.playback.apply_remote_seek(
                    position_ms,
                    timestamp,
                    is_active,
                    &mut self.guard,
                    &mut self.player,
                    now_ms,
                );
            }
            ServerMessage::QueueSync(queue) => {
                self.queue
                    .apply_remote(&queue, is_active, &mut self.guard, &mut self.player);
            }
            ServerMessage::DeviceList(_)
            | ServerMessage::DeviceConnected(_)
            | ServerMessage::DeviceDisconnected { .. } => {
                self.emit(ClientEvent::DevicesChanged(self.registry.devices().to_vec()));
            }
            ServerMessage::TransferRequested { from_device_id } => {
                tracing::info!(from_device_id = %from_device_id, "Playback transfer requested");
                let notification = self.notifier.on_transfer_requested(&from_device_id);
                self.emit(ClientEvent::Notification(notification));
            }
            ServerMessage::TransferAccepted { .. } | ServerMessage::ActiveDeviceChanged { .. } => {}
            ServerMessage::SettingsSync(settings) => {
                self.guard.begin_remote();
                self.last_remote_settings = Some(settings.clone());
                self.emit(ClientEvent::SettingsChanged(settings));
            }
        }

        if let Some(change) = change {
            self.on_active_change(&change, out, now_ms);
        }
    }

    fn on_active_change<O: Outbound>(&mut self, change: &ActiveChange, out: &mut O, now_ms: i64) {
        let self_id = self.registry.device_id().to_string();
        tracing::info!(
            previous = ?change.previous,
            current = ?change.current,
            "Active device changed"
        );

        self.transfer.on_active_change(change);
        let notification = self.notifier.on_active_change(change, &self_id);
        self.emit(ClientEvent::Notification(notification));
        self.emit(ClientEvent::DevicesChanged(self.registry.devices().to_vec()));

        let became_active = change.current.as_deref() == Some(self_id.as_str());
        let was_active = change.previous.as_deref() == Some(self_id.as_str());

        if became_active {
            // Peers converge on the new source of truth right away
            self.playback
                .publish_now(&self.guard, &self.player, out, now_ms);
            self.queue.publish_now(&self.guard, &self.player, out);
        } else if was_active {
            self.playback.reset();
        }
    }

    // =========================================================================
    // Local changes and timers
    // =========================================================================

    pub fn on_local_change<O: Outbound>(&mut self, change: LocalChange, out: &mut O, now_ms: i64) {
        let is_active = self.registry.is_active_device();

        match change {
            LocalChange::Playback => {
                let snapshot = self.player.playback();
                self.playback
                    .on_local_change(snapshot, is_active, &mut self.guard, out, now_ms);
            }
            LocalChange::Queue => {
                let queue = self.player.queue();
                self.queue
                    .on_local_change(&queue, is_active, &mut self.guard, out);
            }
        }
    }

    pub fn tick<O: Outbound>(&mut self, out: &mut O, now_ms: i64) {
        let is_active = self.registry.is_active_device();
        self.playback
            .tick(is_active, &self.guard, &self.player, out, now_ms);
    }

    /// Deferred clear of the loop-prevention flag
    pub fn end_turn(&mut self) {
        self.playback.end_turn();
        self.guard.end_turn();
    }

    // =========================================================================
    // Commands
    // =========================================================================

    pub fn transfer_to_device<O: Outbound>(
        &mut self,
        target_device_id: &str,
        out: &mut O,
    ) -> TransferOutcome {
        self.transfer
            .transfer_to_device(target_device_id, &self.registry, out)
    }

    pub fn request_control<O: Outbound>(&mut self, out: &mut O) -> TransferOutcome {
        self.transfer.request_control(&self.registry, out)
    }

    /// Share settings changed on this device
    ///
    /// Settings identical to the last ones received from a peer are not sent
    /// back.
    pub fn update_settings<O: Outbound>(&mut self, settings: SyncedSettings, out: &mut O) -> bool {
        if self.guard.is_remote() || self.last_remote_settings.as_ref() == Some(&settings) {
            tracing::trace!("Settings match the last remote update, not sending");
            return false;
        }

        out.send(ClientMessage::SettingsUpdate(settings));
        true
    }

    pub fn refresh_devices<O: Outbound>(&mut self, out: &mut O) {
        out.send(ClientMessage::RequestDeviceList);
    }

    /// Forget session and device state after an explicit disconnect
    pub fn reset(&mut self) {
        self.registry.reset();
        self.playback.reset();
        self.transfer.reset();
        self.guard.end_turn();
        self.emit(ClientEvent::DevicesChanged(Vec::new()));
    }

    fn emit(&self, event: ClientEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}
