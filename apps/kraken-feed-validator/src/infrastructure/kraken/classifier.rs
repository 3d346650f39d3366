//! Message Classifier
//!
//! Turns each inbound text frame into an [`InboundMessage`] by inspecting
//! its structural markers:
//!
//! - a `method` field marks a response to one of our requests
//! - a `channel` field marks pushed data, heartbeats and status
//! - `type` distinguishes snapshots from updates on data channels
//!
//! Frames that match none of these shapes become
//! [`InboundMessage::Unclassified`] carrying the raw text and the reason,
//! so protocol drift is visible instead of silently dropped.

use serde_json::Value;

use crate::domain::market::{Channel, DataKind, DataMessage};
use crate::infrastructure::kraken::messages::{Method, MethodResponse, Request};

/// Codec errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// JSON encoding failed.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Encode an outbound request as a text frame.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode_request(request: &Request) -> Result<String, CodecError> {
    Ok(request.to_json()?)
}

/// Coarse message kind, used for routing and metrics labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// Full-state data message.
    Snapshot,
    /// Delta data message.
    Update,
    /// Successful method response.
    Ack,
    /// Failed method response.
    Error,
    /// Keep-alive.
    Heartbeat,
    /// System status.
    Status,
    /// Frame of unknown shape.
    Unclassified,
}

impl MessageKind {
    /// Label value.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Snapshot => "snapshot",
            Self::Update => "update",
            Self::Ack => "ack",
            Self::Error => "error",
            Self::Heartbeat => "heartbeat",
            Self::Status => "status",
            Self::Unclassified => "unclassified",
        }
    }
}

/// A frame the classifier could not place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnclassifiedMessage {
    /// Frame text as received.
    pub raw: String,
    /// Why it could not be classified.
    pub reason: String,
}

/// A classified inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    /// Snapshot or update on a data channel.
    Data(DataMessage),
    /// Response to a subscribe, unsubscribe or ping request.
    Response(MethodResponse),
    /// Keep-alive.
    Heartbeat,
    /// System status message.
    Status(Value),
    /// Frame of unknown shape.
    Unclassified(UnclassifiedMessage),
}

impl InboundMessage {
    /// Coarse kind.
    #[must_use]
    pub const fn kind(&self) -> MessageKind {
        match self {
            Self::Data(data) => match data.kind {
                DataKind::Snapshot => MessageKind::Snapshot,
                DataKind::Update => MessageKind::Update,
            },
            Self::Response(response) if response.success => MessageKind::Ack,
            Self::Response(_) => MessageKind::Error,
            Self::Heartbeat => MessageKind::Heartbeat,
            Self::Status(_) => MessageKind::Status,
            Self::Unclassified(_) => MessageKind::Unclassified,
        }
    }

    /// Channel label for metrics (`control` for non-data frames).
    #[must_use]
    pub fn channel_label(&self) -> &'static str {
        match self {
            Self::Data(data) => data.channel.as_str(),
            Self::Heartbeat => "heartbeat",
            Self::Status(_) => "status",
            Self::Response(_) | Self::Unclassified(_) => "control",
        }
    }
}

/// Stateless frame classifier.
#[derive(Debug, Default, Clone, Copy)]
pub struct MessageClassifier;

impl MessageClassifier {
    /// Create a new classifier.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Classify one text frame.
    #[must_use]
    pub fn classify(&self, frame: &str) -> InboundMessage {
        let value: Value = match serde_json::from_str(frame) {
            Ok(value) => value,
            Err(e) => return unclassified(frame, format!("invalid JSON: {e}")),
        };

        if !value.is_object() {
            return unclassified(frame, "frame is not a JSON object");
        }

        if value.get("method").is_some() {
            return Self::classify_response(frame, value);
        }

        match value.get("channel").and_then(Value::as_str) {
            Some("heartbeat") => InboundMessage::Heartbeat,
            Some("status") => InboundMessage::Status(value),
            Some(name) => match Channel::from_wire(name) {
                Some(channel) => Self::classify_data(frame, channel, value),
                None => unclassified(frame, format!("unknown channel {name:?}")),
            },
            None => unclassified(frame, "no method or channel field"),
        }
    }

    fn classify_response(frame: &str, value: Value) -> InboundMessage {
        match serde_json::from_value::<MethodResponse>(value) {
            Ok(response) if response.method == Method::Ping => {
                unclassified(frame, "unexpected ping method from server")
            }
            Ok(response) => InboundMessage::Response(response),
            Err(e) => unclassified(frame, format!("malformed method response: {e}")),
        }
    }

    fn classify_data(frame: &str, channel: Channel, value: Value) -> InboundMessage {
        let type_field = value.get("type").and_then(Value::as_str);
        let Some(kind) = type_field.and_then(DataKind::from_wire) else {
            return unclassified(
                frame,
                format!(
                    "unknown type {:?} on channel {channel}",
                    type_field.unwrap_or("<absent>")
                ),
            );
        };

        let timestamp = value
            .get("timestamp")
            .and_then(Value::as_str)
            .map(ToString::to_string);

        InboundMessage::Data(DataMessage {
            channel,
            kind,
            frame: value,
            timestamp,
        })
    }
}

fn unclassified(frame: &str, reason: impl Into<String>) -> InboundMessage {
    InboundMessage::Unclassified(UnclassifiedMessage {
        raw: frame.to_string(),
        reason: reason.into(),
    })
}
