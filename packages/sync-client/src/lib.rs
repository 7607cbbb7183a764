//! Cross-device playback synchronization client for Resonance
//!
//! Keeps playback and queue state in step across every device signed in to
//! the same account, through one persistent WebSocket connection to the
//! sync server. Exactly one device is "active" at a time; it broadcasts its
//! state and all others follow.
//!
//! # Components
//!
//! - [`transport`]: connection lifecycle, reconnect backoff, heartbeat,
//!   rate limiting and offline queueing
//! - [`registry`]: device identity, presence list and the active device
//! - [`sync`]: playback and queue synchronizers, transfer controller and the
//!   loop-prevention flag
//! - [`notifier`]: user-facing notifications derived from transitions
//! - [`SyncService`] / [`SyncHandle`]: the task that drives all of the above
//!
//! # Example
//!
//! ```no_run
//! use resonance_shared_config::SyncClientConfig;
//! use resonance_sync_client::{Player, SyncService, WsConnector};
//!
//! # async fn example<P: Player>(player: P) -> Result<(), Box<dyn std::error::Error>> {
//! let config = SyncClientConfig::from_env()?;
//! let (service, handle) = SyncService::from_config(WsConnector, &config);
//! tokio::spawn(service.run(player));
//!
//! handle.connect(config.require_token()?)?;
//! let mut events = handle.subscribe();
//! while let Ok(event) = events.recv().await {
//!     println!("{event:?}");
//! }
//! # Ok(())
//! # }
//! ```

pub mod engine;
pub mod error;
pub mod notifier;
pub mod player;
pub mod protocol;
pub mod registry;
pub mod service;
pub mod sync;
pub mod transport;

pub use engine::{ClientEvent, LocalChange, SyncEngine, SyncSnapshot};
pub use error::{ProtocolError, SyncError, SyncResult, TransportError, TransportResult};
pub use notifier::{ErrorKind, EventNotifier, Notification};
pub use player::{LocalPlayback, LocalQueue, Player};
pub use protocol::{
    ClientMessage, DevicePresence, DeviceType, PlaybackState, QueueState, QueueTrack, RepeatMode,
    ServerMessage, SyncedSettings,
};
pub use registry::{DeviceIdentity, DeviceRegistry};
pub use service::{LocalChangeSender, SyncCommand, SyncHandle, SyncService};
pub use sync::TransferOutcome;
pub use transport::{ConnectionState, Connector, Socket, SocketEvent, WsConnector};
