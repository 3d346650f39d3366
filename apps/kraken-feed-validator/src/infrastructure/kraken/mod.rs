//! Kraken WebSocket v2 Adapters
//!
//! The session manager for Kraken's public market data feed:
//!
//! - **Transport**: one WebSocket connection with bounded receives
//! - **Classifier**: routes each frame to data, response, heartbeat or status
//! - **Session**: subscriptions, acknowledgment tracking and validation
//! - **Timeout**: per-channel wait bounds and deadlines
//! - **Reconnect**: caller-level backoff for re-opening a session

pub mod classifier;
pub mod messages;
pub mod reconnect;
pub mod session;
pub mod timeout;
pub mod transport;

pub use classifier::{
    CodecError, InboundMessage, MessageClassifier, MessageKind, UnclassifiedMessage,
    encode_request,
};
pub use messages::{ChannelParams, Method, MethodResponse, Request, ResponseResult};
pub use reconnect::{ReconnectConfig, ReconnectError, ReconnectPolicy, retry_connect};
pub use session::{
    AckOutcome, Awaited, DEFAULT_ENDPOINT, Observed, PingOutcome, SessionConfig, SessionError,
    SharedSession, StreamEvent, StreamSession, UnsubscribeOutcome, UnsubscribeTicket,
    ValidatedMessage,
};
pub use timeout::{CANDLE_FLOOR, Deadline, TimeoutPolicy};
pub use transport::{ConnectError, Connection, ConnectionError, ReceiveOutcome, WsTransport};
