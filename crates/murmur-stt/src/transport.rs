//! Transport seam between a session and its underlying connection.

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::SinkExt;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use murmur_foundation::TranscriptionError;

/// Outbound half of a split WebSocket connection.
pub type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// Inbound half, owned by an adapter's receive loop.
pub type WsStream = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Outbound half of a provider connection.
///
/// A session owns exactly one transport at a time. Adapters that reconnect
/// replace the transport in place on the existing session; the handle is
/// never aliased.
#[async_trait]
pub trait Transport: Send {
    /// Send a JSON/text control frame.
    async fn send_text(&mut self, text: &str) -> Result<(), TranscriptionError>;

    /// Send a binary frame (raw audio for providers that take it).
    async fn send_binary(&mut self, bytes: &[u8]) -> Result<(), TranscriptionError>;

    /// Close the connection. Must be safe to call more than once.
    async fn close(&mut self) -> Result<(), TranscriptionError>;
}

/// WebSocket transport used by both provider adapters.
pub struct WsTransport {
    sink: WsSink,
    closed: bool,
}

impl WsTransport {
    pub fn new(sink: WsSink) -> Self {
        Self {
            sink,
            closed: false,
        }
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn send_text(&mut self, text: &str) -> Result<(), TranscriptionError> {
        if self.closed {
            return Err(TranscriptionError::Session("connection closed".into()));
        }
        self.sink
            .send(Message::Text(text.to_string()))
            .await
            .map_err(|e| TranscriptionError::Network(e.to_string()))
    }

    async fn send_binary(&mut self, bytes: &[u8]) -> Result<(), TranscriptionError> {
        if self.closed {
            return Err(TranscriptionError::Session("connection closed".into()));
        }
        self.sink
            .send(Message::Binary(bytes.to_vec()))
            .await
            .map_err(|e| TranscriptionError::Network(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), TranscriptionError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.sink
            .close()
            .await
            .map_err(|e| TranscriptionError::Network(e.to_string()))
    }
}
