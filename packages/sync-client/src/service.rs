//! Sync service
//!
//! One tokio task owns the transport and the engine and processes every
//! event to completion before taking the next one:
//! - socket I/O and connect results
//! - commands from [`SyncHandle`]s
//! - change reports from the local player
//! - transport deadlines (heartbeat, reconnect, flush retry)
//! - a short sync tick (throttle trailing edge, periodic broadcast)
//!
//! After each inbound message the service drains the change reports the
//! player queued while that message was applied, then ends the turn, which
//! clears the loop-prevention flag.

use std::time::Duration;

use resonance_shared_config::{PlaybackSyncConfig, SyncClientConfig, TransportConfig};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::{Instant, MissedTickBehavior};

use crate::engine::{ClientEvent, LocalChange, SyncEngine, SyncSnapshot, EVENT_CHANNEL_CAPACITY};
use crate::error::{SyncError, SyncResult};
use crate::player::Player;
use crate::protocol::SyncedSettings;
use crate::registry::DeviceIdentity;
use crate::sync::TransferOutcome;
use crate::transport::{Connector, TransportClient};

/// Interval of the sync tick
const SYNC_TICK: Duration = Duration::from_millis(50);

/// Commands accepted by the service task
#[derive(Debug)]
pub enum SyncCommand {
    Connect(String),
    Disconnect,
    UpdateToken(String),
    TransferToDevice {
        target_device_id: String,
        reply: oneshot::Sender<TransferOutcome>,
    },
    RequestControl {
        reply: oneshot::Sender<TransferOutcome>,
    },
    UpdateSettings(SyncedSettings),
    RefreshDevices,
    Snapshot(oneshot::Sender<SyncSnapshot>),
    Shutdown,
}

/// Reports local player changes to the service
///
/// Hand one to the [`Player`] implementation; it should report every change,
/// including those the sync layer itself makes through the player.
#[derive(Debug, Clone)]
pub struct LocalChangeSender {
    tx: mpsc::UnboundedSender<LocalChange>,
}

impl LocalChangeSender {
    pub fn playback_changed(&self) -> SyncResult<()> {
        self.send(LocalChange::Playback)
    }

    pub fn queue_changed(&self) -> SyncResult<()> {
        self.send(LocalChange::Queue)
    }

    fn send(&self, change: LocalChange) -> SyncResult<()> {
        self.tx.send(change).map_err(|_| SyncError::ServiceStopped)
    }
}

/// Cloneable handle to a running [`SyncService`]
#[derive(Debug, Clone)]
pub struct SyncHandle {
    commands: mpsc::UnboundedSender<SyncCommand>,
    local: LocalChangeSender,
    events: broadcast::Sender<ClientEvent>,
}

impl SyncHandle {
    pub fn connect(&self, token: impl Into<String>) -> SyncResult<()> {
        self.command(SyncCommand::Connect(token.into()))
    }

    pub fn disconnect(&self) -> SyncResult<()> {
        self.command(SyncCommand::Disconnect)
    }

    pub fn update_token(&self, token: impl Into<String>) -> SyncResult<()> {
        self.command(SyncCommand::UpdateToken(token.into()))
    }

    pub async fn transfer_to_device(
        &self,
        target_device_id: impl Into<String>,
    ) -> SyncResult<TransferOutcome> {
        let (reply, rx) = oneshot::channel();
        self.command(SyncCommand::TransferToDevice {
            target_device_id: target_device_id.into(),
            reply,
        })?;
        rx.await.map_err(|_| SyncError::ServiceStopped)
    }

    pub async fn request_control(&self) -> SyncResult<TransferOutcome> {
        let (reply, rx) = oneshot::channel();
        self.command(SyncCommand::RequestControl { reply })?;
        rx.await.map_err(|_| SyncError::ServiceStopped)
    }

    pub fn notify_playback_changed(&self) -> SyncResult<()> {
        self.local.playback_changed()
    }

    pub fn notify_queue_changed(&self) -> SyncResult<()> {
        self.local.queue_changed()
    }

    pub fn update_settings(&self, settings: SyncedSettings) -> SyncResult<()> {
        self.command(SyncCommand::UpdateSettings(settings))
    }

    pub fn refresh_devices(&self) -> SyncResult<()> {
        self.command(SyncCommand::RefreshDevices)
    }

    pub async fn snapshot(&self) -> SyncResult<SyncSnapshot> {
        let (reply, rx) = oneshot::channel();
        self.command(SyncCommand::Snapshot(reply))?;
        rx.await.map_err(|_| SyncError::ServiceStopped)
    }

    /// Disconnect and stop the service task
    pub fn shutdown(&self) -> SyncResult<()> {
        self.command(SyncCommand::Shutdown)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    /// Sender for the player implementation
    pub fn local_changes(&self) -> LocalChangeSender {
        self.local.clone()
    }

    fn command(&self, command: SyncCommand) -> SyncResult<()> {
        self.commands
            .send(command)
            .map_err(|_| SyncError::ServiceStopped)
    }
}

/// The sync client's single task
pub struct SyncService<C: Connector> {
    transport: TransportClient<C>,
    identity: DeviceIdentity,
    playback_config: PlaybackSyncConfig,
    commands: mpsc::UnboundedReceiver<SyncCommand>,
    local_rx: mpsc::UnboundedReceiver<LocalChange>,
    /// Keeps the local change channel open for the service's lifetime
    _local_tx: mpsc::UnboundedSender<LocalChange>,
    events: broadcast::Sender<ClientEvent>,
}

impl<C: Connector> SyncService<C> {
    pub fn new(
        connector: C,
        server_url: impl Into<String>,
        identity: DeviceIdentity,
        transport_config: TransportConfig,
        playback_config: PlaybackSyncConfig,
    ) -> (Self, SyncHandle) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (local_tx, local_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        let handle = SyncHandle {
            commands: command_tx,
            local: LocalChangeSender {
                tx: local_tx.clone(),
            },
            events: events.clone(),
        };

        let service = Self {
            transport: TransportClient::new(
                connector,
                server_url,
                identity.clone(),
                transport_config,
            ),
            identity,
            playback_config,
            commands: command_rx,
            local_rx,
            _local_tx: local_tx,
            events,
        };

        (service, handle)
    }

    /// Build from the environment-driven client configuration
    pub fn from_config(connector: C, config: &SyncClientConfig) -> (Self, SyncHandle) {
        Self::new(
            connector,
            config.server.ws_url.clone(),
            DeviceIdentity::from_config(&config.device),
            config.transport.clone(),
            config.playback.clone(),
        )
    }

    /// Run until shutdown or until every handle is dropped
    pub async fn run<P: Player>(mut self, player: P) {
        let mut engine = SyncEngine::new(
            self.identity.clone(),
            self.playback_config.clone(),
            player,
            self.events.clone(),
        );

        let mut tick = tokio::time::interval(SYNC_TICK);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(device_id = %self.identity.device_id, "Sync service started");

        loop {
            let deadline = self.transport.next_deadline();

            tokio::select! {
                io = self.transport.next_io() => {
                    self.transport.handle_io(io, Instant::now());
                }
                command = self.commands.recv() => {
                    let Some(command) = command else {
                        tracing::debug!("All sync handles dropped");
                        break;
                    };
                    if !self.handle_command(command, &mut engine) {
                        break;
                    }
                }
                Some(change) = self.local_rx.recv() => {
                    engine.on_local_change(change, &mut self.transport, now_ms());
                }
                _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.transport.poll_timers(Instant::now());
                }
                _ = tick.tick() => {
                    engine.tick(&mut self.transport, now_ms());
                }
            }

            self.finish_turn(&mut engine);
        }

        self.transport.disconnect();
        self.finish_turn(&mut engine);
        tracing::info!(device_id = %self.identity.device_id, "Sync service stopped");
    }

    /// Returns `false` when the service should stop
    fn handle_command<P: Player>(&mut self, command: SyncCommand, engine: &mut SyncEngine<P>) -> bool {
        match command {
            SyncCommand::Connect(token) => self.transport.connect(token, Instant::now()),
            SyncCommand::Disconnect => {
                self.transport.disconnect();
                engine.reset();
            }
            SyncCommand::UpdateToken(token) => self.transport.update_token(token, Instant::now()),
            SyncCommand::TransferToDevice {
                target_device_id,
                reply,
            } => {
                let outcome = engine.transfer_to_device(&target_device_id, &mut self.transport);
                let _ = reply.send(outcome);
            }
            SyncCommand::RequestControl { reply } => {
                let outcome = engine.request_control(&mut self.transport);
                let _ = reply.send(outcome);
            }
            SyncCommand::UpdateSettings(settings) => {
                engine.update_settings(settings, &mut self.transport);
            }
            SyncCommand::RefreshDevices => engine.refresh_devices(&mut self.transport),
            SyncCommand::Snapshot(reply) => {
                let _ = reply.send(engine.snapshot());
            }
            SyncCommand::Shutdown => {
                tracing::info!("Sync service shutting down");
                return false;
            }
        }
        true
    }

    /// Run everything the current event caused, then end the turn
    fn finish_turn<P: Player>(&mut self, engine: &mut SyncEngine<P>) {
        let now = now_ms();

        self.drain_local_changes(engine, now);
        engine.end_turn();

        while let Some(event) = self.transport.poll_event() {
            engine.handle_transport_event(event, &mut self.transport, now);
            // Reports caused by applying this event are seen while the
            // flag still reads remote
            self.drain_local_changes(engine, now);
            engine.end_turn();
        }
    }

    fn drain_local_changes<P: Player>(&mut self, engine: &mut SyncEngine<P>, now: i64) {
        while let Ok(change) = self.local_rx.try_recv() {
            engine.on_local_change(change, &mut self.transport, now);
        }
    }
}

/// Wall-clock time in Unix milliseconds
fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
