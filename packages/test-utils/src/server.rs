//! Mock sync server for transport and service tests
//!
//! Provides a [`MockConnector`] the sync client dials and a [`MockServer`]
//! the test drives. Every successful connect hands the server a
//! [`MockSession`] holding the server side of a channel-backed socket.
//!
//! # Example
//!
//! ```rust
//! use resonance_test_utils::MockServer;
//!
//! let (server, connector) = MockServer::new();
//! server.refuse_next(2);
//! assert_eq!(server.refusals_left(), 2);
//! # drop(connector);
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::{self, BoxFuture, FutureExt};
use resonance_sync_client::protocol::{ConnectedPayload, ErrorPayload};
use resonance_sync_client::{
    ClientMessage, Connector, DevicePresence, ServerMessage, Socket, SocketEvent, TransportError,
    TransportResult,
};
use tokio::sync::mpsc;
use url::Url;

/// How long the `expect_*` helpers wait before failing the test
const EXPECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Connector handed to the client under test
#[derive(Debug, Clone)]
pub struct MockConnector {
    sessions: mpsc::UnboundedSender<MockSession>,
    refusals: Arc<AtomicUsize>,
    attempts: Arc<AtomicUsize>,
}

impl Connector for MockConnector {
    fn connect(&self, url: &Url) -> BoxFuture<'static, TransportResult<Socket>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        let refused = self
            .refusals
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return future::ready(Err(TransportError::Connect(
                "connection refused".to_string(),
            )))
            .boxed();
        }

        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let session = MockSession {
            url: url.clone(),
            to_client: in_tx,
            from_client: out_rx,
        };

        if self.sessions.send(session).is_err() {
            return future::ready(Err(TransportError::Connect(
                "mock server is gone".to_string(),
            )))
            .boxed();
        }

        future::ready(Ok(Socket::new(out_tx, in_rx))).boxed()
    }
}

/// Test-side view of every connection the client opens
#[derive(Debug)]
pub struct MockServer {
    sessions: mpsc::UnboundedReceiver<MockSession>,
    refusals: Arc<AtomicUsize>,
    attempts: Arc<AtomicUsize>,
}

impl MockServer {
    /// Create a server and the connector that reaches it
    pub fn new() -> (Self, MockConnector) {
        let (tx, rx) = mpsc::unbounded_channel();
        let refusals = Arc::new(AtomicUsize::new(0));
        let attempts = Arc::new(AtomicUsize::new(0));

        let connector = MockConnector {
            sessions: tx,
            refusals: Arc::clone(&refusals),
            attempts: Arc::clone(&attempts),
        };
        let server = Self {
            sessions: rx,
            refusals,
            attempts,
        };

        (server, connector)
    }

    /// Fail the next `count` connect attempts
    pub fn refuse_next(&self, count: usize) {
        self.refusals.store(count, Ordering::SeqCst);
    }

    pub fn refusals_left(&self) -> usize {
        self.refusals.load(Ordering::SeqCst)
    }

    /// Connect attempts seen so far, refused ones included
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Wait for the client's next successful connect
    ///
    /// # Panics
    ///
    /// Panics if no connection arrives within five seconds.
    pub async fn accept(&mut self) -> MockSession {
        tokio::time::timeout(EXPECT_TIMEOUT, self.sessions.recv())
            .await
            .expect("timed out waiting for the client to connect")
            .expect("mock connector dropped")
    }
}

/// Server side of one client connection
#[derive(Debug)]
pub struct MockSession {
    url: Url,
    to_client: mpsc::UnboundedSender<SocketEvent>,
    from_client: mpsc::UnboundedReceiver<String>,
}

impl MockSession {
    /// URL the client dialed, query string included
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Value of one query parameter on the dialed URL
    pub fn query_param(&self, name: &str) -> Option<String> {
        self.url
            .query_pairs()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.into_owned())
    }

    pub fn send(&self, message: &ServerMessage) {
        let frame = serde_json::to_string(message).expect("server message serializes");
        self.send_raw(frame);
    }

    /// Deliver a frame as-is, for malformed input tests
    pub fn send_raw(&self, frame: impl Into<String>) {
        let _ = self.to_client.send(SocketEvent::Frame(frame.into()));
    }

    /// Complete the application handshake
    pub fn handshake(&self, device_id: &str, active_device_id: Option<&str>) {
        self.send(&ServerMessage::Connected(ConnectedPayload {
            device_id: device_id.to_string(),
            session_id: uuid::Uuid::new_v4(),
            active_device_id: active_device_id.map(str::to_string),
        }));
    }

    pub fn send_devices(&self, devices: Vec<DevicePresence>) {
        self.send(&ServerMessage::DeviceList(devices));
    }

    pub fn send_error(&self, code: &str, message: &str) {
        self.send(&ServerMessage::Error(ErrorPayload::new(code, message)));
    }

    pub fn pong(&self) {
        self.send(&ServerMessage::Pong { server_time: 0 });
    }

    /// Close the connection from the server side
    pub fn close(&self, reason: Option<&str>) {
        let _ = self.to_client.send(SocketEvent::Closed {
            reason: reason.map(str::to_string),
        });
    }

    /// Next message from the client, heartbeats included
    ///
    /// `None` once the client has dropped the socket.
    pub async fn recv(&mut self) -> Option<ClientMessage> {
        let frame = self.from_client.recv().await?;
        Some(serde_json::from_str(&frame).expect("client sent a valid message"))
    }

    /// Next non-heartbeat message from the client
    ///
    /// # Panics
    ///
    /// Panics if nothing arrives within five seconds or the socket closes.
    pub async fn expect_message(&mut self) -> ClientMessage {
        let next = async {
            loop {
                match self.recv().await {
                    Some(ClientMessage::Heartbeat) => continue,
                    other => return other,
                }
            }
        };

        tokio::time::timeout(EXPECT_TIMEOUT, next)
            .await
            .expect("timed out waiting for a client message")
            .expect("client closed the socket")
    }

    /// Wait for the next heartbeat, skipping anything else
    ///
    /// # Panics
    ///
    /// Panics if none arrives within five seconds or the socket closes.
    pub async fn expect_heartbeat(&mut self) {
        let next = async {
            loop {
                match self.recv().await {
                    Some(ClientMessage::Heartbeat) => return true,
                    Some(_) => continue,
                    None => return false,
                }
            }
        };

        let received = tokio::time::timeout(EXPECT_TIMEOUT, next)
            .await
            .expect("timed out waiting for a heartbeat");
        assert!(received, "client closed the socket");
    }

    /// Non-heartbeat messages already sent by the client
    pub fn drain(&mut self) -> Vec<ClientMessage> {
        let mut messages = Vec::new();
        while let Ok(frame) = self.from_client.try_recv() {
            let message: ClientMessage =
                serde_json::from_str(&frame).expect("client sent a valid message");
            if !message.is_heartbeat() {
                messages.push(message);
            }
        }
        messages
    }

    /// Whether the client has dropped its side of the socket
    pub fn is_closed(&self) -> bool {
        self.to_client.is_closed()
    }
}
