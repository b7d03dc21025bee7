//! Frame transport collaborator.
//!
//! The relay core treats frames as opaque text. A [`Transport`] opens a
//! connection to a relay URL and hands back a [`Connection`]: a sink for
//! outbound text frames plus a channel of inbound [`TransportEvent`]s.
//! [`WebSocketTransport`] is the default implementation.

use crate::error::{ClientError, Result};
use async_trait::async_trait;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};
use url::Url;

/// Something that happened on an open connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A text frame from the relay
    Message(String),
    /// The relay closed the connection
    ClosedByServer(String),
    /// The connection failed while reading
    Error(String),
}

/// Outbound half of an open connection.
#[async_trait]
pub trait FrameSink: Send {
    /// Transmit one text frame.
    async fn send(&mut self, text: String) -> Result<()>;

    /// Close the connection from the client side.
    async fn close(&mut self, reason: &str) -> Result<()>;
}

/// An open connection: outbound sink plus inbound events.
///
/// The inbound channel ending without a `ClosedByServer` or `Error` event is
/// treated as a server close.
pub struct Connection {
    pub sink: Box<dyn FrameSink>,
    pub events: mpsc::UnboundedReceiver<TransportEvent>,
}

/// Opens connections to relays.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Open a connection. Resolves once the connection is usable.
    async fn connect(&self, url: &Url) -> Result<Connection>;
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// WebSocket transport over `tokio-tungstenite`.
#[derive(Debug, Clone, Default)]
pub struct WebSocketTransport;

impl WebSocketTransport {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn connect(&self, url: &Url) -> Result<Connection> {
        let (stream, _) = connect_async(url.as_str())
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;

        info!("WebSocket open: {}", url);

        let (sink, mut reader) = stream.split();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let url = url.to_string();

        tokio::spawn(async move {
            while let Some(frame) = reader.next().await {
                let event = match frame {
                    Ok(Message::Text(text)) => TransportEvent::Message(text.as_str().to_string()),
                    Ok(Message::Close(frame)) => {
                        let reason = frame
                            .map(|f| f.reason.as_str().to_string())
                            .unwrap_or_default();
                        info!("Relay {} closed connection: {}", url, reason);
                        let _ = events_tx.send(TransportEvent::ClosedByServer(reason));
                        return;
                    }
                    Ok(_) => continue,
                    Err(e) => {
                        warn!("WebSocket error from {}: {}", url, e);
                        let _ = events_tx.send(TransportEvent::Error(e.to_string()));
                        return;
                    }
                };

                if events_tx.send(event).is_err() {
                    debug!("Inbound receiver for {} dropped, stopping reader", url);
                    return;
                }
            }
            let _ = events_tx.send(TransportEvent::ClosedByServer("stream ended".to_string()));
        });

        Ok(Connection {
            sink: Box::new(WebSocketSink { sink }),
            events: events_rx,
        })
    }
}

struct WebSocketSink {
    sink: SplitSink<WsStream, Message>,
}

#[async_trait]
impl FrameSink for WebSocketSink {
    async fn send(&mut self, text: String) -> Result<()> {
        self.sink
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))
    }

    async fn close(&mut self, reason: &str) -> Result<()> {
        let frame = CloseFrame {
            code: CloseCode::Normal,
            reason: reason.to_string().into(),
        };
        self.sink
            .send(Message::Close(Some(frame)))
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;
        self.sink
            .close()
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))
    }
}
