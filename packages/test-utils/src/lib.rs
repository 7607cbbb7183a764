//! Shared test utilities for the Resonance sync client
//!
//! This crate provides in-memory stand-ins for the two things the sync
//! client talks to, so integration tests run without a network or an audio
//! engine.
//!
//! # Mocks
//!
//! - [`MockServer`] / [`MockConnector`] - scripted sync server reached through
//!   channel-backed sockets
//! - [`MockPlayer`] - local player that records every call and reports its
//!   own changes like a real player would
//!
//! # Example
//!
//! ```rust,ignore
//! use resonance_test_utils::{MockPlayer, MockServer};
//!
//! #[tokio::test]
//! async fn test_with_mocks() {
//!     let (mut server, connector) = MockServer::new();
//!     let (service, handle) = SyncService::new(connector, "ws://mock/ws", identity, transport, playback);
//!     tokio::spawn(service.run(MockPlayer::new().reporting_to(handle.local_changes())));
//!
//!     handle.connect("token").unwrap();
//!     let mut session = server.accept().await;
//!     session.handshake("device-1", None);
//! }
//! ```

mod player;
mod server;

pub use player::MockPlayer;
pub use server::{MockConnector, MockServer, MockSession};
