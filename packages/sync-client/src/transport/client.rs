//! Transport client
//!
//! Owns one physical connection to the sync server. The client is a plain
//! state machine driven by its owner: socket I/O arrives through
//! [`TransportClient::next_io`] / [`TransportClient::handle_io`], timers
//! through [`TransportClient::next_deadline`] / [`TransportClient::poll_timers`],
//! and everything the owner needs to react to is queued as a
//! [`TransportEvent`].

use std::collections::VecDeque;
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use resonance_shared_config::TransportConfig;
use tokio::time::Instant;
use url::Url;

use super::backoff::ReconnectBackoff;
use super::heartbeat::{HeartbeatAction, HeartbeatMonitor};
use super::outbox::Outbox;
use super::rate_limit::SendRateLimiter;
use super::socket::{Connector, Socket, SocketEvent};
use super::state::ConnectionState;
use crate::error::{TransportError, TransportResult};
use crate::notifier::ErrorKind;
use crate::protocol::{sanitize_log_text, ClientMessage, ConnectedPayload, ServerMessage};
use crate::registry::DeviceIdentity;

/// Result of handing a message to the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Written to the socket
    Sent,
    /// Held in the outbox until the connection is up
    Queued,
    /// Discarded (rate limited, or a heartbeat with no connection)
    Dropped,
}

/// Something the owner of the transport should react to
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    StateChanged {
        previous: ConnectionState,
        current: ConnectionState,
    },
    /// Decoded inbound message
    Message(ServerMessage),
    /// A reconnect attempt has been scheduled
    Reconnecting { attempt: u32, delay: Duration },
    /// Socket-level failure; already handled by the transport
    Error(TransportError),
}

/// Output of [`TransportClient::next_io`]
#[derive(Debug)]
pub enum TransportIo {
    /// A connect attempt finished
    Opened(TransportResult<Socket>),
    /// The open socket produced an event, or its reader ended (`None`)
    Socket(Option<SocketEvent>),
}

/// Anything that accepts outbound protocol messages
pub trait Outbound {
    fn send(&mut self, message: ClientMessage) -> SendOutcome;

    fn is_connected(&self) -> bool;
}

/// Build the connection URL with the four identity query parameters
pub fn connection_url(
    server_url: &str,
    identity: &DeviceIdentity,
    token: &str,
) -> TransportResult<Url> {
    let mut url =
        Url::parse(server_url).map_err(|e| TransportError::InvalidUrl(e.to_string()))?;

    url.query_pairs_mut()
        .append_pair("token", token)
        .append_pair("device_id", &identity.device_id)
        .append_pair("device_name", &identity.device_name)
        .append_pair("device_type", &identity.device_type.to_string());

    Ok(url)
}

/// Persistent-connection client with reconnect, heartbeat, rate limiting
/// and an outbox for messages sent while offline
pub struct TransportClient<C: Connector> {
    connector: C,
    server_url: String,
    identity: DeviceIdentity,
    config: TransportConfig,

    state: ConnectionState,
    token: Option<String>,
    /// Set by `connect`, cleared by `disconnect`
    wants_connection: bool,
    /// Server rejected the token; no automatic reconnect until it changes
    auth_failed: bool,

    pending: Option<BoxFuture<'static, TransportResult<Socket>>>,
    socket: Option<Socket>,
    session: Option<ConnectedPayload>,
    active_device_id: Option<String>,

    backoff: ReconnectBackoff,
    limiter: SendRateLimiter,
    outbox: Outbox,
    heartbeat: Option<HeartbeatMonitor>,

    reconnect_at: Option<Instant>,
    handshake_deadline: Option<Instant>,
    flush_at: Option<Instant>,

    events: VecDeque<TransportEvent>,
}

impl<C: Connector> TransportClient<C> {
    pub fn new(
        connector: C,
        server_url: impl Into<String>,
        identity: DeviceIdentity,
        config: TransportConfig,
    ) -> Self {
        Self {
            connector,
            server_url: server_url.into(),
            identity,
            backoff: ReconnectBackoff::new(
                config.initial_reconnect_delay,
                config.max_reconnect_delay,
            ),
            limiter: SendRateLimiter::new(config.max_messages_per_second),
            outbox: Outbox::new(config.max_queue_size),
            config,
            state: ConnectionState::Disconnected,
            token: None,
            wants_connection: false,
            auth_failed: false,
            pending: None,
            socket: None,
            session: None,
            active_device_id: None,
            heartbeat: None,
            reconnect_at: None,
            handshake_deadline: None,
            flush_at: None,
            events: VecDeque::new(),
        }
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// Handshake payload of the current session
    pub fn session(&self) -> Option<&ConnectedPayload> {
        self.session.as_ref()
    }

    /// Last active device id seen on the wire
    pub fn active_device_id(&self) -> Option<&str> {
        self.active_device_id.as_deref()
    }

    pub fn reconnect_attempt(&self) -> u32 {
        self.backoff.attempt()
    }

    pub fn queued_messages(&self) -> usize {
        self.outbox.len()
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Open the connection; a no-op while connecting or connected
    pub fn connect(&mut self, token: impl Into<String>, now: Instant) {
        if self.state.is_active() {
            tracing::debug!(state = %self.state, "Connect ignored, already active");
            return;
        }

        self.token = Some(token.into());
        self.wants_connection = true;
        self.auth_failed = false;
        self.backoff.reset();
        self.reconnect_at = None;
        self.start_attempt(now);
    }

    /// Close the connection on purpose
    ///
    /// Cancels every timer, drops the socket and clears the outbox so no
    /// stale intent is replayed into a later session.
    pub fn disconnect(&mut self) {
        tracing::info!(device_id = %self.identity.device_id, "Disconnecting from sync server");

        self.wants_connection = false;
        self.teardown();
        self.reconnect_at = None;
        self.backoff.reset();
        self.outbox.clear();
        self.session = None;
        self.active_device_id = None;
        self.set_state(ConnectionState::Disconnected);
    }

    /// Swap the access token
    ///
    /// Reconnects cleanly only from `Disconnected` or `Reconnecting`; an
    /// attempt in flight or an established session keeps going and the new
    /// token is used on the next connect.
    pub fn update_token(&mut self, token: impl Into<String>, now: Instant) {
        let token = token.into();
        if self.token.as_deref() == Some(token.as_str()) {
            return;
        }

        self.token = Some(token);
        self.auth_failed = false;

        let should_reconnect = self.wants_connection
            && matches!(
                self.state,
                ConnectionState::Disconnected | ConnectionState::Reconnecting
            );

        if should_reconnect {
            tracing::info!(state = %self.state, "Token updated, reconnecting");
            self.teardown();
            self.reconnect_at = None;
            self.backoff.reset();
            self.start_attempt(now);
        }
    }

    fn start_attempt(&mut self, now: Instant) {
        let Some(token) = self.token.as_deref() else {
            self.fail_permanently(TransportError::MissingToken);
            return;
        };

        let url = match connection_url(&self.server_url, &self.identity, token) {
            Ok(url) => url,
            Err(e) => {
                self.fail_permanently(e);
                return;
            }
        };

        tracing::info!(
            server = %self.server_url,
            device_id = %self.identity.device_id,
            attempt = self.backoff.attempt(),
            "Connecting to sync server"
        );

        // Retries stay in Reconnecting until the handshake arrives
        if self.state != ConnectionState::Reconnecting {
            self.set_state(ConnectionState::Connecting);
        }

        let timeout = self.config.connect_timeout;
        let connect = self.connector.connect(&url);
        self.pending = Some(
            async move {
                match tokio::time::timeout(timeout, connect).await {
                    Ok(result) => result,
                    Err(_) => Err(TransportError::ConnectTimeout(timeout)),
                }
            }
            .boxed(),
        );
        self.handshake_deadline = Some(now + timeout);
    }

    fn fail_permanently(&mut self, error: TransportError) {
        tracing::error!(error = %error, "Cannot connect to sync server");
        self.events.push_back(TransportEvent::Error(error));
        self.set_state(ConnectionState::Disconnected);
    }

    /// Drop socket, pending attempt and per-connection timers
    fn teardown(&mut self) {
        self.pending = None;
        if let Some(socket) = self.socket.take() {
            socket.close();
        }
        self.heartbeat = None;
        self.handshake_deadline = None;
        self.flush_at = None;
    }

    fn connection_lost(&mut self, error: TransportError, now: Instant) {
        self.teardown();
        self.session = None;
        self.events.push_back(TransportEvent::Error(error.clone()));

        let can_retry = self.config.reconnect_enabled
            && self.wants_connection
            && !self.auth_failed
            && error.is_retryable();

        if can_retry {
            self.schedule_reconnect(now);
        } else {
            tracing::info!(
                error = %error,
                auth_failed = self.auth_failed,
                "Connection lost, not reconnecting"
            );
            self.set_state(ConnectionState::Disconnected);
        }
    }

    fn schedule_reconnect(&mut self, now: Instant) {
        if let Some(max) = self.config.max_reconnect_attempts {
            if self.backoff.attempt() >= max {
                tracing::warn!(attempts = max, "Giving up on reconnecting");
                self.set_state(ConnectionState::Disconnected);
                return;
            }
        }

        let delay = self.backoff.next_delay();
        let attempt = self.backoff.attempt();
        self.reconnect_at = Some(now + delay);

        tracing::warn!(
            attempt,
            delay_ms = delay.as_millis() as u64,
            "Scheduling reconnect"
        );

        self.set_state(ConnectionState::Reconnecting);
        self.events
            .push_back(TransportEvent::Reconnecting { attempt, delay });
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state == state {
            return;
        }

        let previous = std::mem::replace(&mut self.state, state);
        tracing::info!(from = %previous, to = %state, "Connection state changed");
        self.events.push_back(TransportEvent::StateChanged {
            previous,
            current: state,
        });
    }

    // =========================================================================
    // I/O
    // =========================================================================

    /// Wait for the next connect result or socket event
    ///
    /// Cancel safe; pends forever while there is neither an attempt in
    /// flight nor an open socket.
    pub async fn next_io(&mut self) -> TransportIo {
        if let Some(pending) = self.pending.as_mut() {
            let result = pending.await;
            self.pending = None;
            return TransportIo::Opened(result);
        }

        match self.socket.as_mut() {
            Some(socket) => TransportIo::Socket(socket.recv().await),
            None => std::future::pending().await,
        }
    }

    pub fn handle_io(&mut self, io: TransportIo, now: Instant) {
        match io {
            TransportIo::Opened(Ok(socket)) => {
                tracing::debug!(
                    device_id = %self.identity.device_id,
                    "Socket open, awaiting handshake"
                );
                self.socket = Some(socket);
            }
            TransportIo::Opened(Err(e)) => {
                tracing::warn!(error = %e, "Connect attempt failed");
                self.connection_lost(e, now);
            }
            TransportIo::Socket(Some(SocketEvent::Frame(frame))) => self.handle_frame(&frame, now),
            TransportIo::Socket(Some(SocketEvent::Closed { reason })) => {
                let reason = reason.map(|r| sanitize_log_text(&r));
                tracing::warn!(reason = ?reason, "Socket closed by server");
                self.connection_lost(TransportError::Closed(reason), now);
            }
            TransportIo::Socket(Some(SocketEvent::Error(e))) => {
                let e = sanitize_log_text(&e);
                tracing::warn!(error = %e, "Socket error");
                self.connection_lost(TransportError::Socket(e), now);
            }
            TransportIo::Socket(None) => {
                tracing::warn!("Socket reader ended");
                self.connection_lost(TransportError::Closed(None), now);
            }
        }
    }

    fn handle_frame(&mut self, frame: &str, now: Instant) {
        tracing::trace!(len = frame.len(), "Received frame");

        let message = match ServerMessage::decode(frame) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(error = %e, "Dropping malformed frame");
                return;
            }
        };

        match &message {
            ServerMessage::Connected(payload) => {
                tracing::info!(
                    device_id = %payload.device_id,
                    session_id = %payload.session_id,
                    "Sync handshake completed"
                );
                self.session = Some(payload.clone());
                self.active_device_id = payload.active_device_id.clone();
                self.handshake_deadline = None;
                self.heartbeat = Some(HeartbeatMonitor::new(self.config.heartbeat_interval, now));
            }
            ServerMessage::Pong { .. } => {
                if let Some(heartbeat) = self.heartbeat.as_mut() {
                    heartbeat.record_pong(now);
                }
            }
            ServerMessage::DeviceList(devices) => {
                self.active_device_id = devices
                    .iter()
                    .find(|d| d.is_active)
                    .map(|d| d.device_id.clone());
            }
            ServerMessage::ActiveDeviceChanged { new_device_id, .. } => {
                self.active_device_id = new_device_id.clone();
            }
            ServerMessage::TransferAccepted { to_device_id } => {
                self.active_device_id = Some(to_device_id.clone());
            }
            ServerMessage::Error(payload) => {
                let kind = ErrorKind::of(payload);
                tracing::warn!(error = %payload.sanitized(), kind = ?kind, "Server reported error");
                if kind == ErrorKind::Auth {
                    self.auth_failed = true;
                }
            }
            _ => {}
        }

        // Connected goes out before anything the flush triggers
        let connected = matches!(message, ServerMessage::Connected(_));
        self.events.push_back(TransportEvent::Message(message));

        if connected {
            self.set_state(ConnectionState::Connected);
            self.flush_outbox(now);
        }
    }

    // =========================================================================
    // Timers
    // =========================================================================

    /// Earliest instant at which [`poll_timers`](Self::poll_timers) has work
    pub fn next_deadline(&self) -> Option<Instant> {
        [
            self.reconnect_at,
            self.handshake_deadline,
            self.flush_at,
            self.heartbeat.as_ref().map(HeartbeatMonitor::next_due),
        ]
        .into_iter()
        .flatten()
        .min()
    }

    pub fn poll_timers(&mut self, now: Instant) {
        if self.reconnect_at.is_some_and(|at| at <= now) {
            self.reconnect_at = None;
            self.start_attempt(now);
        }

        if self.handshake_deadline.is_some_and(|at| at <= now) {
            tracing::warn!("Handshake not completed in time");
            self.connection_lost(TransportError::ConnectTimeout(self.config.connect_timeout), now);
            return;
        }

        if self.flush_at.is_some_and(|at| at <= now) {
            self.flush_at = None;
            self.flush_outbox(now);
        }

        let action = match self.heartbeat.as_mut() {
            Some(heartbeat) => heartbeat.poll(now),
            None => HeartbeatAction::Idle,
        };
        match action {
            HeartbeatAction::Idle => {}
            HeartbeatAction::Send => {
                self.write(&ClientMessage::Heartbeat);
            }
            HeartbeatAction::TimedOut => {
                let timeout = self.config.heartbeat_interval * 2;
                tracing::warn!(timeout_ms = timeout.as_millis() as u64, "Heartbeat timed out");
                self.connection_lost(TransportError::HeartbeatTimeout(timeout), now);
            }
        }
    }

    // =========================================================================
    // Outbound
    // =========================================================================

    pub fn send_at(&mut self, message: ClientMessage, now: Instant) -> SendOutcome {
        if message.is_heartbeat() {
            return if self.is_connected() && self.write(&message) {
                SendOutcome::Sent
            } else {
                SendOutcome::Dropped
            };
        }

        // Anything already waiting goes first
        if !self.is_connected() || !self.outbox.is_empty() {
            let outcome = self.enqueue(message);
            if self.is_connected() {
                self.flush_outbox(now);
            }
            return outcome;
        }

        if !self.limiter.try_acquire(now) {
            tracing::debug!(kind = message.kind(), "Rate limited, dropping message");
            return SendOutcome::Dropped;
        }

        if self.write(&message) {
            SendOutcome::Sent
        } else {
            SendOutcome::Dropped
        }
    }

    fn enqueue(&mut self, message: ClientMessage) -> SendOutcome {
        let kind = message.kind();
        match self.outbox.push(message) {
            None => SendOutcome::Queued,
            Some(_) if self.outbox.is_empty() => {
                tracing::debug!(kind, "Outbox has no capacity, dropping message");
                SendOutcome::Dropped
            }
            Some(evicted) => {
                tracing::debug!(dropped = evicted.kind(), "Outbox full, dropped oldest message");
                SendOutcome::Queued
            }
        }
    }

    fn flush_outbox(&mut self, now: Instant) {
        if !self.outbox.is_empty() {
            tracing::debug!(queued = self.outbox.len(), "Flushing outbox");
        }

        while self.is_connected() && !self.outbox.is_empty() {
            if !self.limiter.try_acquire(now) {
                // Never sooner than the window frees a slot
                let wait = self.config.flush_retry_delay.max(self.limiter.retry_after(now));
                let retry_at = now + wait;
                tracing::debug!(
                    remaining = self.outbox.len(),
                    "Rate limited mid-flush, retrying later"
                );
                self.flush_at = Some(retry_at);
                return;
            }

            if let Some(message) = self.outbox.pop_front() {
                self.write(&message);
            }
        }
    }

    fn write(&mut self, message: &ClientMessage) -> bool {
        let Some(socket) = self.socket.as_ref() else {
            return false;
        };

        let frame = match message.encode() {
            Ok(frame) => frame,
            Err(e) => {
                tracing::error!(error = %e, kind = message.kind(), "Failed to encode message");
                return false;
            }
        };

        tracing::trace!(kind = message.kind(), "Sending frame");
        match socket.send(frame) {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!(error = %e, kind = message.kind(), "Send failed");
                false
            }
        }
    }

    // =========================================================================
    // Events
    // =========================================================================

    pub fn poll_event(&mut self) -> Option<TransportEvent> {
        self.events.pop_front()
    }
}

impl<C: Connector> Outbound for TransportClient<C> {
    fn send(&mut self, message: ClientMessage) -> SendOutcome {
        self.send_at(message, Instant::now())
    }

    fn is_connected(&self) -> bool {
        TransportClient::is_connected(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{DevicePresence, DeviceType, ErrorPayload};
    use assert_matches::assert_matches;
    use futures_util::future;
    use tokio::sync::mpsc;
    use uuid::Uuid;

    /// Connector whose sockets are handed to the test
    struct TestConnector {
        sides: mpsc::UnboundedSender<ServerSide>,
        fail: bool,
    }

    struct ServerSide {
        url: Url,
        to_client: mpsc::UnboundedSender<SocketEvent>,
        from_client: mpsc::UnboundedReceiver<String>,
    }

    impl ServerSide {
        fn push(&self, message: &ServerMessage) -> TransportIo {
            TransportIo::Socket(Some(SocketEvent::Frame(
                serde_json::to_string(message).unwrap(),
            )))
        }

        fn sent(&mut self) -> Vec<String> {
            let mut frames = Vec::new();
            while let Ok(frame) = self.from_client.try_recv() {
                frames.push(frame);
            }
            frames
        }
    }

    impl Connector for TestConnector {
        fn connect(&self, url: &Url) -> BoxFuture<'static, TransportResult<Socket>> {
            if self.fail {
                return future::ready(Err(TransportError::Connect("refused".into()))).boxed();
            }
            let (out_tx, out_rx) = mpsc::unbounded_channel();
            let (in_tx, in_rx) = mpsc::unbounded_channel();
            let _ = self.sides.send(ServerSide {
                url: url.clone(),
                to_client: in_tx,
                from_client: out_rx,
            });
            future::ready(Ok(Socket::new(out_tx, in_rx))).boxed()
        }
    }

    fn identity() -> DeviceIdentity {
        DeviceIdentity::new("device-1", "Living Room", DeviceType::Desktop)
    }

    fn client(fail: bool) -> (
        TransportClient<TestConnector>,
        mpsc::UnboundedReceiver<ServerSide>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        let client = TransportClient::new(
            TestConnector { sides: tx, fail },
            "ws://localhost:8080/ws",
            identity(),
            TransportConfig::default(),
        );
        (client, rx)
    }

    fn connected_payload() -> ServerMessage {
        ServerMessage::Connected(ConnectedPayload {
            device_id: "device-1".into(),
            session_id: Uuid::nil(),
            active_device_id: None,
        })
    }

    fn drain(client: &mut TransportClient<TestConnector>) -> Vec<TransportEvent> {
        std::iter::from_fn(|| client.poll_event()).collect()
    }

    /// Connect and complete the handshake
    async fn establish(
        client: &mut TransportClient<TestConnector>,
        sides: &mut mpsc::UnboundedReceiver<ServerSide>,
        now: Instant,
    ) -> ServerSide {
        client.connect("secret", now);
        let io = client.next_io().await;
        client.handle_io(io, now);
        let server = sides.recv().await.unwrap();
        client.handle_io(server.push(&connected_payload()), now);
        server
    }

    #[test]
    fn test_connection_url_has_identity_params() {
        let url = connection_url("wss://sync.example.com/ws", &identity(), "a b&c").unwrap();
        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();

        assert_eq!(
            pairs,
            vec![
                ("token".to_string(), "a b&c".to_string()),
                ("device_id".to_string(), "device-1".to_string()),
                ("device_name".to_string(), "Living Room".to_string()),
                ("device_type".to_string(), "desktop".to_string()),
            ]
        );
    }

    #[test]
    fn test_connection_url_rejects_garbage() {
        assert_matches!(
            connection_url("not a url", &identity(), "t"),
            Err(TransportError::InvalidUrl(_))
        );
    }

    #[tokio::test]
    async fn test_connected_only_after_handshake() {
        let (mut client, mut sides) = client(false);
        let now = Instant::now();

        client.connect("secret", now);
        assert_eq!(client.state(), ConnectionState::Connecting);

        let io = client.next_io().await;
        client.handle_io(io, now);
        assert_eq!(client.state(), ConnectionState::Connecting);

        let server = sides.recv().await.unwrap();
        assert_eq!(
            server.url.query_pairs().find(|(k, _)| k == "token").map(|(_, v)| v.into_owned()),
            Some("secret".to_string())
        );

        client.handle_io(server.push(&connected_payload()), now);
        assert_eq!(client.state(), ConnectionState::Connected);
        assert!(client.session().is_some());

        let events = drain(&mut client);
        assert_matches!(
            events.as_slice(),
            [
                TransportEvent::StateChanged { current: ConnectionState::Connecting, .. },
                TransportEvent::Message(ServerMessage::Connected(_)),
                TransportEvent::StateChanged { current: ConnectionState::Connected, .. },
            ]
        );
    }

    #[tokio::test]
    async fn test_connect_is_noop_when_active() {
        let (mut client, mut sides) = client(false);
        let now = Instant::now();
        let _server = establish(&mut client, &mut sides, now).await;
        drain(&mut client);

        client.connect("other", now);
        assert_eq!(client.state(), ConnectionState::Connected);
        assert!(drain(&mut client).is_empty());
    }

    #[tokio::test]
    async fn test_queued_messages_flush_in_order() {
        let (mut client, mut sides) = client(false);
        let now = Instant::now();

        for position_ms in [1, 2, 3] {
            assert_eq!(
                client.send_at(ClientMessage::Seek { position_ms }, now),
                SendOutcome::Queued
            );
        }
        assert_eq!(client.queued_messages(), 3);

        let mut server = establish(&mut client, &mut sides, now).await;
        let frames = server.sent();
        assert_eq!(
            frames,
            vec![
                r#"{"type":"Seek","payload":{"position_ms":1}}"#,
                r#"{"type":"Seek","payload":{"position_ms":2}}"#,
                r#"{"type":"Seek","payload":{"position_ms":3}}"#,
            ]
        );
        assert_eq!(client.queued_messages(), 0);
    }

    #[tokio::test]
    async fn test_flush_respects_rate_limit() {
        let (mut client, mut sides) = client(false);
        let now = Instant::now();

        for position_ms in 0..6 {
            client.send_at(ClientMessage::Seek { position_ms }, now);
        }

        let mut server = establish(&mut client, &mut sides, now).await;
        assert_eq!(server.sent().len(), 4);
        assert_eq!(client.queued_messages(), 2);

        let retry_at = now + Duration::from_secs(1);
        assert_eq!(client.next_deadline(), Some(retry_at));

        client.poll_timers(retry_at);
        assert_eq!(server.sent().len(), 2);
        assert_eq!(client.queued_messages(), 0);
    }

    #[tokio::test]
    async fn test_flush_retry_waits_for_window() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let config = TransportConfig {
            flush_retry_delay: Duration::from_millis(50),
            ..TransportConfig::default()
        };
        let mut client = TransportClient::new(
            TestConnector { sides: tx, fail: false },
            "ws://localhost/ws",
            identity(),
            config,
        );
        let now = Instant::now();

        for position_ms in 0..6 {
            client.send_at(ClientMessage::Seek { position_ms }, now);
        }
        let mut server = establish(&mut client, &mut rx, now).await;
        assert_eq!(server.sent().len(), 4);

        // The configured 50 ms would still find the window full
        let window_frees = now + Duration::from_secs(1);
        assert_eq!(client.next_deadline(), Some(window_frees));
        client.poll_timers(now + Duration::from_millis(50));
        assert_eq!(client.queued_messages(), 2);

        client.poll_timers(window_frees);
        assert_eq!(server.sent().len(), 2);
        assert_eq!(client.queued_messages(), 0);
    }

    #[tokio::test]
    async fn test_rate_limit_drops_but_heartbeat_bypasses() {
        let (mut client, mut sides) = client(false);
        let now = Instant::now();
        let mut server = establish(&mut client, &mut sides, now).await;

        for _ in 0..4 {
            assert_eq!(
                client.send_at(ClientMessage::RequestDeviceList, now),
                SendOutcome::Sent
            );
        }
        assert_eq!(
            client.send_at(ClientMessage::RequestDeviceList, now),
            SendOutcome::Dropped
        );
        assert_eq!(
            client.send_at(ClientMessage::Heartbeat, now),
            SendOutcome::Sent
        );
        assert_eq!(server.sent().len(), 5);
    }

    #[test]
    fn test_heartbeat_dropped_while_disconnected() {
        let (mut client, _sides) = client(false);
        assert_eq!(
            client.send_at(ClientMessage::Heartbeat, Instant::now()),
            SendOutcome::Dropped
        );
        assert_eq!(client.queued_messages(), 0);
    }

    #[tokio::test]
    async fn test_heartbeat_and_timeout() {
        let (mut client, mut sides) = client(false);
        let now = Instant::now();
        let mut server = establish(&mut client, &mut sides, now).await;
        drain(&mut client);

        let interval = TransportConfig::default().heartbeat_interval;
        assert_eq!(client.next_deadline(), Some(now + interval));

        client.poll_timers(now + interval);
        assert_eq!(server.sent(), vec![r#"{"type":"Heartbeat"}"#]);

        // No pong: the second interval kills the connection
        client.poll_timers(now + interval * 2);
        assert_eq!(client.state(), ConnectionState::Reconnecting);
        let events = drain(&mut client);
        assert!(events.iter().any(|e| matches!(
            e,
            TransportEvent::Error(TransportError::HeartbeatTimeout(_))
        )));
        assert!(events
            .iter()
            .any(|e| matches!(e, TransportEvent::Reconnecting { attempt: 1, .. })));
    }

    #[tokio::test]
    async fn test_pong_keeps_connection_alive() {
        let (mut client, mut sides) = client(false);
        let now = Instant::now();
        let server = establish(&mut client, &mut sides, now).await;
        let interval = TransportConfig::default().heartbeat_interval;

        client.poll_timers(now + interval);
        client.handle_io(
            server.push(&ServerMessage::Pong { server_time: 0 }),
            now + interval + Duration::from_millis(10),
        );
        client.poll_timers(now + interval * 2);
        assert_eq!(client.state(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn test_close_schedules_backoff_reconnect() {
        let (mut client, mut sides) = client(false);
        let now = Instant::now();
        let _server = establish(&mut client, &mut sides, now).await;
        drain(&mut client);

        client.handle_io(
            TransportIo::Socket(Some(SocketEvent::Closed {
                reason: Some("restart".into()),
            })),
            now,
        );

        assert_eq!(client.state(), ConnectionState::Reconnecting);
        assert_eq!(client.reconnect_attempt(), 1);
        let deadline = client.next_deadline().unwrap();
        assert!(deadline >= now + Duration::from_secs(1));
        assert!(deadline <= now + Duration::from_millis(1_100));

        // Retry stays in Reconnecting until the handshake
        client.poll_timers(deadline);
        assert_eq!(client.state(), ConnectionState::Reconnecting);
        let io = client.next_io().await;
        client.handle_io(io, deadline);
        let server = sides.recv().await.unwrap();
        client.handle_io(server.push(&connected_payload()), deadline);
        assert_eq!(client.state(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn test_attempt_counter_grows_across_failures() {
        let (mut client, _sides) = client(true);
        let mut now = Instant::now();

        client.connect("secret", now);
        for expected in 1..=3 {
            let io = client.next_io().await;
            client.handle_io(io, now);
            assert_eq!(client.reconnect_attempt(), expected);
            now = client.next_deadline().unwrap();
            client.poll_timers(now);
        }

        // Explicit connect after a disconnect starts over
        client.disconnect();
        client.connect("secret", now);
        let io = client.next_io().await;
        client.handle_io(io, now);
        assert_eq!(client.reconnect_attempt(), 1);
    }

    #[tokio::test]
    async fn test_max_attempts_gives_up() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let config = TransportConfig {
            max_reconnect_attempts: Some(1),
            ..TransportConfig::default()
        };
        let mut client = TransportClient::new(
            TestConnector { sides: tx, fail: true },
            "ws://localhost/ws",
            identity(),
            config,
        );
        let now = Instant::now();

        client.connect("secret", now);
        let io = client.next_io().await;
        client.handle_io(io, now);
        assert_eq!(client.state(), ConnectionState::Reconnecting);

        let at = client.next_deadline().unwrap();
        client.poll_timers(at);
        let io = client.next_io().await;
        client.handle_io(io, at);
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert!(client.next_deadline().is_none());
    }

    #[tokio::test]
    async fn test_disconnect_clears_everything() {
        let (mut client, mut sides) = client(false);
        let now = Instant::now();
        let _server = establish(&mut client, &mut sides, now).await;

        client.handle_io(
            TransportIo::Socket(Some(SocketEvent::Error("reset".into()))),
            now,
        );
        client.send_at(ClientMessage::RequestDeviceList, now);
        assert_eq!(client.queued_messages(), 1);

        client.disconnect();
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert_eq!(client.queued_messages(), 0);
        assert!(client.next_deadline().is_none());
        assert!(client.session().is_none());
    }

    #[tokio::test]
    async fn test_auth_error_suppresses_reconnect() {
        let (mut client, mut sides) = client(false);
        let now = Instant::now();
        let server = establish(&mut client, &mut sides, now).await;

        client.handle_io(
            server.push(&ServerMessage::Error(ErrorPayload::new(
                "AUTH_FAILED",
                "token expired",
            ))),
            now,
        );
        client.handle_io(TransportIo::Socket(Some(SocketEvent::Closed { reason: None })), now);

        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert!(client.next_deadline().is_none());

        // A fresh token reconnects from Disconnected
        client.update_token("fresh", now);
        assert_eq!(client.state(), ConnectionState::Connecting);
    }

    #[tokio::test]
    async fn test_permission_denial_keeps_reconnecting() {
        let (mut client, mut sides) = client(false);
        let now = Instant::now();
        let server = establish(&mut client, &mut sides, now).await;

        client.handle_io(
            server.push(&ServerMessage::Error(ErrorPayload::new(
                "NOT_AUTHORIZED",
                "Only the active device can transfer playback",
            ))),
            now,
        );
        client.handle_io(
            TransportIo::Socket(Some(SocketEvent::Closed {
                reason: Some("going away".into()),
            })),
            now,
        );

        assert_eq!(client.state(), ConnectionState::Reconnecting);
        assert_eq!(client.reconnect_attempt(), 1);
        assert!(client.next_deadline().is_some());
    }

    #[tokio::test]
    async fn test_update_token_does_not_interrupt_connecting() {
        let (mut client, _sides) = client(false);
        let now = Instant::now();

        client.connect("old", now);
        drain(&mut client);
        client.update_token("new", now);

        assert_eq!(client.state(), ConnectionState::Connecting);
        assert!(drain(&mut client).is_empty());
    }

    #[tokio::test]
    async fn test_malformed_frame_keeps_connection() {
        let (mut client, mut sides) = client(false);
        let now = Instant::now();
        let _server = establish(&mut client, &mut sides, now).await;
        drain(&mut client);

        client.handle_io(
            TransportIo::Socket(Some(SocketEvent::Frame("{not json".into()))),
            now,
        );
        assert_eq!(client.state(), ConnectionState::Connected);
        assert!(drain(&mut client).is_empty());
    }

    #[tokio::test]
    async fn test_inbound_updates_cached_active_device() {
        let (mut client, mut sides) = client(false);
        let now = Instant::now();
        let server = establish(&mut client, &mut sides, now).await;

        let mut phone = DevicePresence::new("phone".into(), "Phone".into(), DeviceType::Mobile);
        phone.is_active = true;
        client.handle_io(server.push(&ServerMessage::DeviceList(vec![phone])), now);
        assert_eq!(client.active_device_id(), Some("phone"));

        client.handle_io(
            server.push(&ServerMessage::ActiveDeviceChanged {
                previous_device_id: Some("phone".into()),
                new_device_id: None,
            }),
            now,
        );
        assert_eq!(client.active_device_id(), None);
    }

    #[tokio::test]
    async fn test_handshake_timeout_triggers_reconnect() {
        let (mut client, _sides) = client(false);
        let now = Instant::now();

        client.connect("secret", now);
        let io = client.next_io().await;
        client.handle_io(io, now);

        let timeout = TransportConfig::default().connect_timeout;
        client.poll_timers(now + timeout);
        assert_eq!(client.state(), ConnectionState::Reconnecting);
    }

    #[tokio::test]
    async fn test_frames_arrive_through_socket() {
        let (mut client, mut sides) = client(false);
        let now = Instant::now();
        let server = establish(&mut client, &mut sides, now).await;
        drain(&mut client);

        let frame = serde_json::to_string(&ServerMessage::Pong { server_time: 7 }).unwrap();
        server.to_client.send(SocketEvent::Frame(frame)).unwrap();
        let io = client.next_io().await;
        client.handle_io(io, now);
        assert_eq!(
            drain(&mut client),
            vec![TransportEvent::Message(ServerMessage::Pong { server_time: 7 })]
        );

        // Server side going away ends the reader
        drop(server);
        let io = client.next_io().await;
        assert_matches!(io, TransportIo::Socket(None));
        client.handle_io(io, now);
        assert_eq!(client.state(), ConnectionState::Reconnecting);
    }

    #[test]
    fn test_invalid_url_fails_without_retry() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut client = TransportClient::new(
            TestConnector { sides: tx, fail: false },
            "::::",
            identity(),
            TransportConfig::default(),
        );

        client.connect("secret", Instant::now());
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert!(client.next_deadline().is_none());
    }
}
