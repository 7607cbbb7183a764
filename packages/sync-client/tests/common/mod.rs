//! Common test utilities for sync client integration tests
//!
//! Spawns a [`SyncService`] against the mock server and mock player from
//! `resonance-test-utils`, and provides fixtures and wait helpers.

#![allow(dead_code)]

use std::time::Duration;

use resonance_shared_config::{PlaybackSyncConfig, TransportConfig};
use resonance_sync_client::{
    ClientEvent, ConnectionState, DeviceIdentity, DevicePresence, DeviceType, QueueTrack,
    SyncHandle, SyncService,
};
use resonance_test_utils::{MockPlayer, MockServer, MockSession};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Device id of the client under test
pub const SELF_ID: &str = "desk-1";

/// Device id of the other device in fixtures
pub const PEER_ID: &str = "phone-1";

pub const TOKEN: &str = "access-token";

const SERVER_URL: &str = "ws://sync.test/ws";

/// How long wait helpers poll before failing the test
const WAIT_TIMEOUT: Duration = Duration::from_secs(5);

// =============================================================================
// Harness
// =============================================================================

/// A running sync service wired to mocks
pub struct TestClient {
    pub server: MockServer,
    pub handle: SyncHandle,
    pub player: MockPlayer,
    pub events: broadcast::Receiver<ClientEvent>,
    pub task: JoinHandle<()>,
}

/// Transport settings scaled down so reconnect paths finish quickly
pub fn fast_transport() -> TransportConfig {
    TransportConfig {
        initial_reconnect_delay: Duration::from_millis(20),
        max_reconnect_delay: Duration::from_millis(100),
        max_messages_per_second: 50,
        flush_retry_delay: Duration::from_millis(50),
        connect_timeout: Duration::from_secs(1),
        ..TransportConfig::default()
    }
}

pub fn identity() -> DeviceIdentity {
    DeviceIdentity::new(SELF_ID, "Test Desk", DeviceType::Desktop)
}

/// Spawn a service with the default player state
pub fn spawn_client(transport: TransportConfig) -> TestClient {
    spawn_client_with(transport, MockPlayer::new())
}

/// Spawn a service around a prepared player
pub fn spawn_client_with(transport: TransportConfig, player: MockPlayer) -> TestClient {
    let (server, connector) = MockServer::new();
    let (service, handle) = SyncService::new(
        connector,
        SERVER_URL,
        identity(),
        transport,
        PlaybackSyncConfig::default(),
    );

    let player = player.reporting_to(handle.local_changes());
    let events = handle.subscribe();
    let task = tokio::spawn(service.run(player.clone()));

    TestClient {
        server,
        handle,
        player,
        events,
        task,
    }
}

impl TestClient {
    /// Connect and complete the handshake; returns the server side
    pub async fn connect(&mut self) -> MockSession {
        self.handle.connect(TOKEN).expect("service running");
        let session = self.server.accept().await;
        session.handshake(SELF_ID, None);

        wait_for_event(&mut self.events, |event| {
            *event == ClientEvent::ConnectionStateChanged(ConnectionState::Connected)
        })
        .await;

        session
    }

    /// Connect and make `active` the active device
    pub async fn connect_with_active(&mut self, active: &str) -> MockSession {
        let session = self.connect().await;
        session.send_devices(devices(active));

        wait_for_event(&mut self.events, |event| {
            matches!(event, ClientEvent::DevicesChanged(_))
        })
        .await;

        session
    }
}

// =============================================================================
// Wait helpers
// =============================================================================

/// Receive events until one matches, and return it
pub async fn wait_for_event(
    events: &mut broadcast::Receiver<ClientEvent>,
    mut matches: impl FnMut(&ClientEvent) -> bool,
) -> ClientEvent {
    let next = async {
        loop {
            match events.recv().await {
                Ok(event) if matches(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event channel closed"),
            }
        }
    };

    tokio::time::timeout(WAIT_TIMEOUT, next)
        .await
        .expect("timed out waiting for a client event")
}

/// Poll until `condition` holds
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    let poll = async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    };

    tokio::time::timeout(WAIT_TIMEOUT, poll)
        .await
        .expect("condition never became true");
}

/// Let the service run for a moment
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(150)).await;
}

// =============================================================================
// Fixtures
// =============================================================================

/// This device and one peer, with `active` marked active
pub fn devices(active: &str) -> Vec<DevicePresence> {
    [
        (SELF_ID, "Test Desk", DeviceType::Desktop),
        (PEER_ID, "Phone", DeviceType::Mobile),
    ]
    .into_iter()
    .map(|(id, name, device_type)| {
        let mut device = DevicePresence::new(id.to_string(), name.to_string(), device_type);
        device.is_active = id == active;
        device
    })
    .collect()
}

pub fn track(id: &str) -> QueueTrack {
    QueueTrack {
        id: id.to_string(),
        title: format!("Track {id}"),
        artist: "Test Artist".to_string(),
        album_id: Some("album-1".to_string()),
        album_title: "Test Album".to_string(),
        duration_ms: 180_000,
        cover_url: None,
    }
}

/// Current wall-clock time in Unix milliseconds
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
