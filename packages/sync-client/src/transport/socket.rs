//! Physical socket abstraction
//!
//! The transport never touches a WebSocket stream directly. A [`Connector`]
//! opens a [`Socket`], which is a pair of channels fed by two pump tasks:
//! one writing text frames to the sink, one turning stream items into
//! [`SocketEvent`]s.

use futures_util::future::BoxFuture;
use futures_util::{FutureExt, SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use url::Url;

use crate::error::{TransportError, TransportResult};

/// Something that happened on an open socket
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketEvent {
    /// One inbound text frame
    Frame(String),
    /// The remote end closed the connection
    Closed { reason: Option<String> },
    /// The stream failed
    Error(String),
}

/// An open connection, seen as channels
#[derive(Debug)]
pub struct Socket {
    outgoing: mpsc::UnboundedSender<String>,
    incoming: mpsc::UnboundedReceiver<SocketEvent>,
    reader: Option<JoinHandle<()>>,
}

impl Socket {
    /// Wrap an already-wired channel pair
    pub fn new(
        outgoing: mpsc::UnboundedSender<String>,
        incoming: mpsc::UnboundedReceiver<SocketEvent>,
    ) -> Self {
        Self {
            outgoing,
            incoming,
            reader: None,
        }
    }

    /// Queue one text frame for the writer
    pub fn send(&self, frame: String) -> TransportResult<()> {
        self.outgoing
            .send(frame)
            .map_err(|_| TransportError::Socket("socket writer has stopped".to_string()))
    }

    /// Next event from the reader, `None` once the reader is gone
    ///
    /// Cancel safe.
    pub async fn recv(&mut self) -> Option<SocketEvent> {
        self.incoming.recv().await
    }

    /// Close the write half and stop reading
    ///
    /// The writer flushes what it already has and sends a close frame.
    pub fn close(self) {
        drop(self);
    }
}

impl Drop for Socket {
    fn drop(&mut self) {
        // No inbound event may be delivered after teardown
        self.incoming.close();
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

/// Opens sockets for the transport client
pub trait Connector: Send + 'static {
    fn connect(&self, url: &Url) -> BoxFuture<'static, TransportResult<Socket>>;
}

/// Production connector over `tokio-tungstenite`
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

impl Connector for WsConnector {
    fn connect(&self, url: &Url) -> BoxFuture<'static, TransportResult<Socket>> {
        let url = url.to_string();

        async move {
            let (stream, _response) = connect_async(url.as_str())
                .await
                .map_err(|e| TransportError::Connect(e.to_string()))?;

            let (mut sink, mut stream) = stream.split();
            let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
            let (in_tx, in_rx) = mpsc::unbounded_channel::<SocketEvent>();

            tokio::spawn(async move {
                while let Some(text) = out_rx.recv().await {
                    if let Err(e) = sink.send(Message::Text(text.into())).await {
                        tracing::debug!(error = %e, "Socket write failed");
                        break;
                    }
                }
                let _ = sink.close().await;
            });

            let reader = tokio::spawn(async move {
                while let Some(item) = stream.next().await {
                    let event = match item {
                        Ok(Message::Text(text)) => SocketEvent::Frame(text.as_str().to_owned()),
                        Ok(Message::Close(frame)) => {
                            let reason = frame
                                .map(|f| f.reason.as_str().to_owned())
                                .filter(|r| !r.is_empty());
                            let _ = in_tx.send(SocketEvent::Closed { reason });
                            return;
                        }
                        Ok(Message::Binary(_)) => {
                            tracing::trace!("Ignoring binary frame");
                            continue;
                        }
                        // Pings are answered by tungstenite itself
                        Ok(_) => continue,
                        Err(e) => {
                            let _ = in_tx.send(SocketEvent::Error(e.to_string()));
                            return;
                        }
                    };

                    if in_tx.send(event).is_err() {
                        return;
                    }
                }
                let _ = in_tx.send(SocketEvent::Closed { reason: None });
            });

            Ok(Socket {
                outgoing: out_tx,
                incoming: in_rx,
                reader: Some(reader),
            })
        }
        .boxed()
    }
}
