//! Persistent-connection transport
//!
//! This module handles the single socket to the sync server:
//! - Connect / reconnect with exponential backoff
//! - Heartbeat liveness checks
//! - Outbound rate limiting and offline queueing
//! - Inbound frame decoding

mod backoff;
mod client;
mod heartbeat;
mod outbox;
mod rate_limit;
mod socket;
mod state;

pub use backoff::ReconnectBackoff;
pub use client::{
    connection_url, Outbound, SendOutcome, TransportClient, TransportEvent, TransportIo,
};
pub use heartbeat::{HeartbeatAction, HeartbeatMonitor};
pub use outbox::Outbox;
pub use rate_limit::SendRateLimiter;
pub use socket::{Connector, Socket, SocketEvent, WsConnector};
pub use state::ConnectionState;
