//! Kraken WebSocket v2 Message Types
//!
//! Wire format types for the requests this client sends and the method
//! responses it receives. Data frames are not modelled here; they are
//! classified from raw JSON and validated before decoding.
//!
//! # Requests
//! - `subscribe` / `unsubscribe`: channel, symbols and channel parameters
//! - `ping`: liveness probe, answered by `pong`
//!
//! # References
//!
//! - [WebSocket v2](https://docs.kraken.com/api/docs/websocket-v2/ticker)

use serde::{Deserialize, Serialize};

use crate::domain::market::{Channel, Symbol};
use crate::domain::subscription::{EventTrigger, RequestId, SubscriptionParams};

// =============================================================================
// Requests
// =============================================================================

/// Request method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    /// Subscribe to a channel.
    Subscribe,
    /// Unsubscribe from a channel.
    Unsubscribe,
    /// Liveness probe.
    Ping,
    /// Reply to `ping`.
    Pong,
}

impl Method {
    /// Wire name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Subscribe => "subscribe",
            Self::Unsubscribe => "unsubscribe",
            Self::Ping => "ping",
            Self::Pong => "pong",
        }
    }
}

/// `params` object of a subscribe or unsubscribe request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelParams {
    /// Channel name.
    pub channel: Channel,
    /// Symbols.
    pub symbol: Vec<Symbol>,
    /// Request initial snapshot.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<bool>,
    /// Book depth.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub depth: Option<u32>,
    /// Candle interval in minutes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval: Option<u32>,
    /// Ticker event trigger.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_trigger: Option<EventTrigger>,
}

/// Outbound request frame.
///
/// # Wire Format (JSON)
/// ```json
/// {"method":"subscribe","params":{"channel":"book","symbol":["ETH/USD"],"depth":25},"req_id":7}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Request {
    /// Method.
    pub method: Method,
    /// Channel parameters (absent for ping).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<ChannelParams>,
    /// Correlation id echoed in the response.
    pub req_id: RequestId,
}

impl Request {
    /// Create a subscribe request.
    #[must_use]
    pub fn subscribe(
        channel: Channel,
        symbols: Vec<Symbol>,
        params: &SubscriptionParams,
        req_id: RequestId,
    ) -> Self {
        Self::channel_request(Method::Subscribe, channel, symbols, params, req_id)
    }

    /// Create an unsubscribe request.
    ///
    /// Carries the same channel parameters as the subscribe so the server
    /// can match the subscription.
    #[must_use]
    pub fn unsubscribe(
        channel: Channel,
        symbols: Vec<Symbol>,
        params: &SubscriptionParams,
        req_id: RequestId,
    ) -> Self {
        let mut request = Self::channel_request(Method::Unsubscribe, channel, symbols, params, req_id);
        if let Some(p) = request.params.as_mut() {
            p.snapshot = None;
        }
        request
    }

    /// Create a ping request.
    #[must_use]
    pub const fn ping(req_id: RequestId) -> Self {
        Self {
            method: Method::Ping,
            params: None,
            req_id,
        }
    }

    fn channel_request(
        method: Method,
        channel: Channel,
        symbols: Vec<Symbol>,
        params: &SubscriptionParams,
        req_id: RequestId,
    ) -> Self {
        Self {
            method,
            params: Some(ChannelParams {
                channel,
                symbol: symbols,
                snapshot: params.snapshot,
                depth: if channel == Channel::Book { params.depth } else { None },
                interval: if channel == Channel::Candles { params.interval } else { None },
                event_trigger: if channel == Channel::Ticker {
                    params.event_trigger
                } else {
                    None
                },
            }),
            req_id,
        }
    }

    /// Serialize to a JSON text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

// =============================================================================
// Responses
// =============================================================================

/// `result` object of a method response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ResponseResult {
    /// Channel name as echoed by the server.
    #[serde(default)]
    pub channel: Option<String>,
    /// Symbol the result applies to.
    #[serde(default)]
    pub symbol: Option<Symbol>,
    /// Echoed snapshot flag.
    #[serde(default)]
    pub snapshot: Option<bool>,
    /// Echoed depth.
    #[serde(default)]
    pub depth: Option<u32>,
    /// Echoed interval.
    #[serde(default)]
    pub interval: Option<u32>,
}

/// Response to a subscribe, unsubscribe or ping request.
///
/// # Wire Format (JSON)
/// ```json
/// {"method":"subscribe","result":{"channel":"ticker","symbol":"BTC/USD","snapshot":true},
///  "success":true,"time_in":"2024-05-01T12:00:00.000000Z","time_out":"2024-05-01T12:00:00.000100Z","req_id":1}
/// {"method":"subscribe","error":"Currency pair not supported FAKE/COIN","success":false,
///  "symbol":"FAKE/COIN","req_id":2}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MethodResponse {
    /// Method answered.
    pub method: Method,
    /// Whether the request succeeded. Absent on `pong`.
    #[serde(default = "default_success")]
    pub success: bool,
    /// Result details on success.
    #[serde(default)]
    pub result: Option<ResponseResult>,
    /// Error text on failure.
    #[serde(default)]
    pub error: Option<String>,
    /// Symbol on failure responses.
    #[serde(default)]
    pub symbol: Option<Symbol>,
    /// Echoed correlation id.
    #[serde(default)]
    pub req_id: Option<RequestId>,
    /// Server receive time.
    #[serde(default)]
    pub time_in: Option<String>,
    /// Server send time.
    #[serde(default)]
    pub time_out: Option<String>,
}

const fn default_success() -> bool {
    true
}

impl MethodResponse {
    /// Channel named by the response, if any.
    #[must_use]
    pub fn channel(&self) -> Option<Channel> {
        self.result
            .as_ref()
            .and_then(|r| r.channel.as_deref())
            .and_then(Channel::from_wire)
    }

    /// Symbol named by the response, from `result` or the top level.
    #[must_use]
    pub fn symbol(&self) -> Option<&str> {
        self.result
            .as_ref()
            .and_then(|r| r.symbol.as_deref())
            .or(self.symbol.as_deref())
    }

    /// Error text, or a generic reason for an unexplained failure.
    #[must_use]
    pub fn error_reason(&self) -> String {
        self.error
            .clone()
            .unwrap_or_else(|| format!("{} failed", self.method.as_str()))
    }
}
