//! Port Interfaces
//!
//! The seam between the session and the socket. The session only needs to
//! send text frames and read the next text frame; the WebSocket adapter in
//! `infrastructure::kraken` implements this over `tokio-tungstenite`, and
//! unit tests substitute a mock.
//!
//! ## Driven Ports (Outbound)
//!
//! - `FrameTransport`: one live, ordered, bidirectional frame stream

use async_trait::async_trait;

/// Errors raised by a frame transport.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// Underlying socket failure (reset, protocol violation).
    #[error("socket error: {0}")]
    Socket(String),

    /// Peer closed the connection.
    #[error("connection closed by peer: {0}")]
    Closed(String),
}

/// One live, ordered text-frame stream.
///
/// Control frames (ping, pong, close handshakes) are handled by the
/// implementation and never surface here.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FrameTransport: Send {
    /// Send one text frame.
    async fn send_text(&mut self, text: String) -> Result<(), TransportError>;

    /// Wait for the next text frame. `None` means the stream ended cleanly.
    ///
    /// Binary frames are handed on as lossy UTF-8 so the caller can report
    /// them; they never fail the stream.
    async fn next_frame(&mut self) -> Option<Result<String, TransportError>>;

    /// Close the stream.
    async fn close(&mut self) -> Result<(), TransportError>;
}
