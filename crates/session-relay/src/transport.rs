//! Transport adapter.
//!
//! A [`Connector`] opens one bidirectional text connection and hands back a
//! [`Connection`]: a sender for outbound frames plus a stream of
//! [`TransportEvent`]s. Every failure after open, including socket errors,
//! is reported as a plain [`TransportEvent::Closed`].

use crate::messages::OutboundFrame;
use crate::{RelayError, RelayResult};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::time::Instant;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};
use url::Url;

/// Buffer size for the per-connection frame channels.
const CONNECTION_CHANNEL_CAPACITY: usize = 64;

/// Events reported by an open connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A text frame arrived.
    Message(String),
    /// The connection is gone (clean close or error, not distinguished).
    Closed,
}

/// Cloneable handle for writing text frames to one connection.
#[derive(Clone)]
pub struct FrameSender {
    outbound: mpsc::Sender<String>,
    last_sent_at: Arc<Mutex<Option<Instant>>>,
}

impl FrameSender {
    fn new(outbound: mpsc::Sender<String>) -> Self {
        Self {
            outbound,
            last_sent_at: Arc::new(Mutex::new(None)),
        }
    }

    /// Send raw text.
    pub async fn send_text(&self, text: String) -> RelayResult<()> {
        self.outbound
            .send(text)
            .await
            .map_err(|e| RelayError::Send(e.to_string()))?;
        *self.last_sent_at.lock().await = Some(Instant::now());
        Ok(())
    }

    /// Serialize and send an outbound frame.
    pub async fn send_frame(&self, frame: &OutboundFrame) -> RelayResult<()> {
        let json = frame.to_json()?;
        self.send_text(json).await
    }

    /// When the last frame was handed to the transport.
    pub async fn last_sent_at(&self) -> Option<Instant> {
        *self.last_sent_at.lock().await
    }

    /// Whether the transport side has gone away.
    pub fn is_closed(&self) -> bool {
        self.outbound.is_closed()
    }
}

/// One open connection.
///
/// Dropping every [`FrameSender`] clone closes the connection.
pub struct Connection {
    sender: FrameSender,
    events: mpsc::Receiver<TransportEvent>,
}

impl Connection {
    /// Build a connection from raw channels.
    pub fn from_channels(
        outbound: mpsc::Sender<String>,
        events: mpsc::Receiver<TransportEvent>,
    ) -> Self {
        Self {
            sender: FrameSender::new(outbound),
            events,
        }
    }

    /// Split into the write half and the event stream.
    pub fn into_parts(self) -> (FrameSender, mpsc::Receiver<TransportEvent>) {
        (self.sender, self.events)
    }
}

/// Opens connections to session endpoints.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a connection. Errors mean the connection never opened.
    async fn connect(&self, url: &Url) -> RelayResult<Connection>;
}

/// WebSocket connector backed by tokio-tungstenite.
#[derive(Debug, Clone, Default)]
pub struct WsConnector;

impl WsConnector {
    pub fn new() -> Self {
        Self
    }
}

/// Make ring the process-wide rustls provider unless one is already set.
/// `wss` handshakes fail without a provider.
fn ensure_crypto_provider() {
    if rustls::crypto::CryptoProvider::get_default().is_none() {
        // Err means another caller installed one first.
        let _ = rustls::crypto::ring::default_provider().install_default();
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &Url) -> RelayResult<Connection> {
        if url.scheme() == "wss" {
            ensure_crypto_provider();
        }
        debug!(url = %url, "Opening WebSocket");
        let (ws_stream, _) = connect_async(url.as_str()).await?;
        let (mut write, mut read) = ws_stream.split();

        let (outbound_tx, mut outbound_rx) = mpsc::channel::<String>(CONNECTION_CHANNEL_CAPACITY);
        let (event_tx, event_rx) = mpsc::channel::<TransportEvent>(CONNECTION_CHANNEL_CAPACITY);

        // Single pump task: writes queued frames, forwards inbound text.
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    outbound = outbound_rx.recv() => match outbound {
                        Some(text) => {
                            if let Err(e) = write.send(Message::Text(text.into())).await {
                                warn!(error = %e, "WebSocket send failed");
                                break;
                            }
                        }
                        None => {
                            debug!("Outbound side dropped, closing WebSocket");
                            let _ = write.send(Message::Close(None)).await;
                            break;
                        }
                    },
                    inbound = read.next() => match inbound {
                        Some(Ok(Message::Text(text))) => {
                            if event_tx
                                .send(TransportEvent::Message(text.as_str().to_owned()))
                                .await
                                .is_err()
                            {
                                break;
                            }
                        }
                        Some(Ok(Message::Ping(data))) => {
                            let _ = write.send(Message::Pong(data)).await;
                        }
                        Some(Ok(Message::Close(frame))) => {
                            info!(frame = ?frame, "WebSocket closed by remote");
                            break;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            warn!(error = %e, "WebSocket error");
                            break;
                        }
                        None => break,
                    },
                }
            }

            let _ = event_tx.send(TransportEvent::Closed).await;
        });

        Ok(Connection::from_channels(outbound_tx, event_rx))
    }
}

/// The far side of a [`ChannelConnector`] connection.
pub struct RemoteEnd {
    url: Url,
    events: mpsc::Sender<TransportEvent>,
    outbound: mpsc::Receiver<String>,
}

impl RemoteEnd {
    /// Endpoint the client asked for.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Deliver a text frame to the client. Returns false once the client let go.
    pub async fn send_text(&self, text: impl Into<String>) -> bool {
        self.events
            .send(TransportEvent::Message(text.into()))
            .await
            .is_ok()
    }

    /// Deliver a JSON frame to the client.
    pub async fn send_json(&self, value: &serde_json::Value) -> bool {
        self.send_text(value.to_string()).await
    }

    /// Next frame written by the client, or None once it closed its side.
    pub async fn recv(&mut self) -> Option<String> {
        self.outbound.recv().await
    }

    /// Next already-written frame, without waiting.
    pub fn try_recv(&mut self) -> Option<String> {
        self.outbound.try_recv().ok()
    }

    /// Whether the client has closed its side.
    pub fn is_client_closed(&self) -> bool {
        self.events.is_closed()
    }

    /// Drop the connection from the remote side.
    pub async fn close(self) {
        let _ = self.events.send(TransportEvent::Closed).await;
    }
}

/// In-memory connector: each connect yields a [`RemoteEnd`] to the owner.
pub struct ChannelConnector {
    remotes: mpsc::UnboundedSender<RemoteEnd>,
    refusals: AtomicUsize,
    attempts: AtomicUsize,
}

impl ChannelConnector {
    /// Create a connector and the receiver its remote ends are delivered on.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<RemoteEnd>) {
        let (remotes, remote_rx) = mpsc::unbounded_channel();
        let connector = Self {
            remotes,
            refusals: AtomicUsize::new(0),
            attempts: AtomicUsize::new(0),
        };
        (connector, remote_rx)
    }

    /// Make the next `count` connect attempts fail.
    pub fn refuse_next(&self, count: usize) {
        self.refusals.fetch_add(count, Ordering::SeqCst);
    }

    /// Total connect attempts so far, refused ones included.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for ChannelConnector {
    async fn connect(&self, url: &Url) -> RelayResult<Connection> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        let refused = self
            .refusals
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(RelayError::Connection(format!("connection to {} refused", url)));
        }

        let (outbound_tx, outbound_rx) = mpsc::channel(CONNECTION_CHANNEL_CAPACITY);
        let (event_tx, event_rx) = mpsc::channel(CONNECTION_CHANNEL_CAPACITY);

        self.remotes
            .send(RemoteEnd {
                url: url.clone(),
                events: event_tx,
                outbound: outbound_rx,
            })
            .map_err(|_| RelayError::Connection("remote side is gone".to_string()))?;

        Ok(Connection::from_channels(outbound_tx, event_rx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url() -> Url {
        Url::parse("ws://localhost:9/ws/sessions/abc").unwrap()
    }

    #[tokio::test]
    async fn test_channel_connector_pairs_ends() {
        let (connector, mut remotes) = ChannelConnector::new();
        let connection = connector.connect(&url()).await.unwrap();
        let mut remote = remotes.recv().await.unwrap();

        assert_eq!(remote.url().path(), "/ws/sessions/abc");

        let (sender, mut events) = connection.into_parts();
        sender.send_frame(&OutboundFrame::ping()).await.unwrap();
        assert_eq!(remote.recv().await.unwrap(), r#"{"type":"ping"}"#);
        assert!(sender.last_sent_at().await.is_some());

        assert!(remote.send_text(r#"{"type":"pong"}"#).await);
        assert_eq!(
            events.recv().await,
            Some(TransportEvent::Message(r#"{"type":"pong"}"#.to_string()))
        );

        remote.close().await;
        assert_eq!(events.recv().await, Some(TransportEvent::Closed));
    }

    #[tokio::test]
    async fn test_channel_connector_refusals() {
        let (connector, mut remotes) = ChannelConnector::new();
        connector.refuse_next(2);

        assert!(connector.connect(&url()).await.is_err());
        assert!(connector.connect(&url()).await.is_err());
        assert!(connector.connect(&url()).await.is_ok());
        assert_eq!(connector.attempts(), 3);
        assert!(remotes.try_recv().is_ok());
        assert!(remotes.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_dropping_sender_closes_client_side() {
        let (connector, mut remotes) = ChannelConnector::new();
        let connection = connector.connect(&url()).await.unwrap();
        let mut remote = remotes.recv().await.unwrap();

        drop(connection);
        assert!(remote.recv().await.is_none());
        assert!(remote.is_client_closed());
    }

    #[tokio::test]
    async fn test_ws_connector_unreachable_endpoint() {
        let connector = WsConnector::new();
        let result = connector
            .connect(&Url::parse("ws://127.0.0.1:1/ws/sessions/abc").unwrap())
            .await;
        assert!(result.is_err());
    }
}
