//! Transport Session
//!
//! Owns one socket connection: open, send, bounded receive, close.
//!
//! # Receive outcomes
//!
//! `receive` distinguishes three results:
//! - a frame arrived ([`ReceiveOutcome::Frame`])
//! - the timeout elapsed ([`ReceiveOutcome::Timeout`]), a normal outcome
//!   on quiet channels
//! - the socket failed ([`ConnectionError`]), which invalidates the
//!   connection for good
//!
//! There is no automatic reconnect. After a `ConnectionError` the caller
//! opens a new connection and re-issues its subscriptions.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::application::ports::{FrameTransport, TransportError};

// =============================================================================
// Error Types
// =============================================================================

/// Handshake failure. Fatal; the caller must retry `open`.
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    /// Endpoint is not a WebSocket URL.
    #[error("invalid endpoint {0}: expected ws:// or wss://")]
    InvalidEndpoint(String),

    /// Handshake did not complete within the bound.
    #[error("handshake with {endpoint} timed out after {timeout:?}")]
    Timeout {
        /// Endpoint.
        endpoint: String,
        /// Bound that elapsed.
        timeout: Duration,
    },

    /// Handshake failed.
    #[error("handshake with {endpoint} failed: {reason}")]
    Handshake {
        /// Endpoint.
        endpoint: String,
        /// Underlying error text.
        reason: String,
    },
}

/// Mid-session I/O failure. Fatal; the connection is no longer usable.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectionError {
    /// Socket failed.
    #[error("transport failure: {0}")]
    Transport(#[from] TransportError),

    /// Stream ended without a close handshake.
    #[error("connection ended unexpectedly")]
    Ended,

    /// Connection was already closed or invalidated.
    #[error("connection is not open")]
    NotOpen,
}

/// Result of a bounded receive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiveOutcome {
    /// A text frame arrived.
    Frame(String),
    /// Nothing arrived within the timeout.
    Timeout,
}

// =============================================================================
// WebSocket Transport
// =============================================================================

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// `FrameTransport` over a `tokio-tungstenite` WebSocket.
pub struct WsTransport {
    stream: WsStream,
}

impl std::fmt::Debug for WsTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsTransport").finish_non_exhaustive()
    }
}

impl WsTransport {
    /// Perform the WebSocket handshake.
    ///
    /// # Errors
    ///
    /// Returns the tungstenite error if the handshake fails.
    pub async fn connect(endpoint: &str) -> Result<Self, tokio_tungstenite::tungstenite::Error> {
        let (stream, _response) = tokio_tungstenite::connect_async(endpoint).await?;
        Ok(Self { stream })
    }
}

#[async_trait]
impl FrameTransport for WsTransport {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        self.stream
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| TransportError::Socket(e.to_string()))
    }

    async fn next_frame(&mut self) -> Option<Result<String, TransportError>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text.as_str().to_owned())),
                Ok(Message::Binary(bytes)) => {
                    return Some(Ok(String::from_utf8_lossy(&bytes).into_owned()));
                }
                Ok(Message::Ping(data)) => {
                    if let Err(e) = self.stream.send(Message::Pong(data)).await {
                        return Some(Err(TransportError::Socket(e.to_string())));
                    }
                }
                Ok(Message::Close(frame)) => {
                    let reason = frame.map_or_else(
                        || "no close frame".to_string(),
                        |f| format!("{} {}", f.code, f.reason),
                    );
                    tracing::info!(reason = %reason, "Server sent close frame");
                    return Some(Err(TransportError::Closed(reason)));
                }
                Ok(Message::Pong(_) | Message::Frame(_)) => {}
                Err(e) => return Some(Err(TransportError::Socket(e.to_string()))),
            }
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.stream
            .close(None)
            .await
            .map_err(|e| TransportError::Socket(e.to_string()))
    }
}

// =============================================================================
// Connection
// =============================================================================

/// One live transport plus its endpoint and activity bookkeeping.
pub struct Connection {
    endpoint: String,
    transport: Option<Box<dyn FrameTransport>>,
    last_activity: Instant,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("endpoint", &self.endpoint)
            .field("open", &self.is_open())
            .field("last_activity", &self.last_activity)
            .finish()
    }
}

impl Connection {
    /// Open a WebSocket connection, bounded by `connect_timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectError`] if the endpoint is invalid, the handshake
    /// fails, or it does not complete in time.
    pub async fn open(endpoint: &str, connect_timeout: Duration) -> Result<Self, ConnectError> {
        if !(endpoint.starts_with("ws://") || endpoint.starts_with("wss://")) {
            return Err(ConnectError::InvalidEndpoint(endpoint.to_string()));
        }

        tracing::info!(endpoint = %endpoint, "Connecting");
        let transport = match tokio::time::timeout(connect_timeout, WsTransport::connect(endpoint)).await {
            Err(_) => {
                return Err(ConnectError::Timeout {
                    endpoint: endpoint.to_string(),
                    timeout: connect_timeout,
                });
            }
            Ok(Err(e)) => {
                return Err(ConnectError::Handshake {
                    endpoint: endpoint.to_string(),
                    reason: e.to_string(),
                });
            }
            Ok(Ok(transport)) => transport,
        };
        tracing::info!(endpoint = %endpoint, "Connected");

        Ok(Self::with_transport(endpoint, Box::new(transport)))
    }

    /// Wrap an already-open transport.
    #[must_use]
    pub fn with_transport(endpoint: &str, transport: Box<dyn FrameTransport>) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            transport: Some(transport),
            last_activity: Instant::now(),
        }
    }

    /// Endpoint URL.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Whether the connection is usable.
    #[must_use]
    pub const fn is_open(&self) -> bool {
        self.transport.is_some()
    }

    /// When the last frame was received (or the connection opened).
    #[must_use]
    pub const fn last_activity(&self) -> Instant {
        self.last_activity
    }

    /// Send one text frame.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError`] and invalidates the connection on failure.
    pub async fn send(&mut self, text: String) -> Result<(), ConnectionError> {
        let transport = self.transport.as_mut().ok_or(ConnectionError::NotOpen)?;
        tracing::debug!(frame = %text, "Sending");
        if let Err(e) = transport.send_text(text).await {
            self.invalidate();
            return Err(e.into());
        }
        Ok(())
    }

    /// Wait up to `timeout` for the next frame.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError`] and invalidates the connection when the
    /// socket fails or the stream ends.
    pub async fn receive(&mut self, timeout: Duration) -> Result<ReceiveOutcome, ConnectionError> {
        let transport = self.transport.as_mut().ok_or(ConnectionError::NotOpen)?;

        let Ok(next) = tokio::time::timeout(timeout, transport.next_frame()).await else {
            return Ok(ReceiveOutcome::Timeout);
        };

        match next {
            Some(Ok(frame)) => {
                self.last_activity = Instant::now();
                Ok(ReceiveOutcome::Frame(frame))
            }
            Some(Err(e)) => {
                self.invalidate();
                Err(e.into())
            }
            None => {
                self.invalidate();
                Err(ConnectionError::Ended)
            }
        }
    }

    /// Close the connection. Closing twice is a no-op.
    pub async fn close(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            if let Err(e) = transport.close().await {
                tracing::debug!(error = %e, "Close handshake failed");
            }
            tracing::info!(endpoint = %self.endpoint, "Connection closed");
        }
    }

    fn invalidate(&mut self) {
        if self.transport.take().is_some() {
            tracing::warn!(endpoint = %self.endpoint, "Connection invalidated");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::MockFrameTransport;

    #[tokio::test]
    async fn frame_updates_last_activity() {
        let mut mock = MockFrameTransport::new();
        mock.expect_next_frame()
            .times(1)
            .returning(|| Some(Ok(r#"{"channel":"heartbeat"}"#.to_string())));

        let mut connection = Connection::with_transport("ws://test", Box::new(mock));
        let opened = connection.last_activity();
        tokio::time::sleep(Duration::from_millis(5)).await;

        let outcome = connection.receive(Duration::from_secs(1)).await.unwrap();
        assert_eq!(outcome, ReceiveOutcome::Frame(r#"{"channel":"heartbeat"}"#.to_string()));
        assert!(connection.last_activity() > opened);
    }

    #[tokio::test]
    async fn socket_error_invalidates_connection() {
        let mut mock = MockFrameTransport::new();
        mock.expect_next_frame()
            .times(1)
            .returning(|| Some(Err(TransportError::Socket("reset".to_string()))));

        let mut connection = Connection::with_transport("ws://test", Box::new(mock));
        let err = connection.receive(Duration::from_secs(1)).await.unwrap_err();
        assert_eq!(err, ConnectionError::Transport(TransportError::Socket("reset".to_string())));
        assert!(!connection.is_open());

        let err = connection.receive(Duration::from_secs(1)).await.unwrap_err();
        assert_eq!(err, ConnectionError::NotOpen);
    }

    #[tokio::test]
    async fn stream_end_is_connection_error() {
        let mut mock = MockFrameTransport::new();
        mock.expect_next_frame().times(1).returning(|| None);

        let mut connection = Connection::with_transport("ws://test", Box::new(mock));
        assert_eq!(
            connection.receive(Duration::from_secs(1)).await.unwrap_err(),
            ConnectionError::Ended
        );
    }

    #[tokio::test]
    async fn send_failure_invalidates_connection() {
        let mut mock = MockFrameTransport::new();
        mock.expect_send_text()
            .times(1)
            .returning(|_| Err(TransportError::Closed("1000 bye".to_string())));

        let mut connection = Connection::with_transport("ws://test", Box::new(mock));
        assert!(connection.send("{}".to_string()).await.is_err());
        assert!(!connection.is_open());
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let mut mock = MockFrameTransport::new();
        mock.expect_close().times(1).returning(|| Ok(()));

        let mut connection = Connection::with_transport("ws://test", Box::new(mock));
        connection.close().await;
        connection.close().await;
        assert!(!connection.is_open());
    }

    #[tokio::test]
    async fn open_rejects_non_websocket_endpoint() {
        let err = Connection::open("https://example.com", Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectError::InvalidEndpoint(_)));
    }
}
