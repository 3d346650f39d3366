//! Market Data Types
//!
//! Channel enumeration and the typed payloads carried by data messages:
//! tickers, order book level sets, candles and trades. These types map
//! one-to-one onto the entries of a Kraken v2 `data` array.

use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// =============================================================================
// Channel
// =============================================================================

/// A symbol string (e.g. `BTC/USD`).
pub type Symbol = String;

/// Public market data channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    /// Level 1 ticker (best bid/ask, 24h statistics).
    Ticker,
    /// Level 2 order book.
    Book,
    /// OHLC candles.
    #[serde(rename = "ohlc")]
    Candles,
    /// Executed trades.
    Trade,
}

impl Channel {
    /// All data channels.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[Self::Ticker, Self::Book, Self::Candles, Self::Trade]
    }

    /// Wire name of the channel.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Ticker => "ticker",
            Self::Book => "book",
            Self::Candles => "ohlc",
            Self::Trade => "trade",
        }
    }

    /// Parse a wire channel name. Returns `None` for non-data channels.
    #[must_use]
    pub fn from_wire(name: &str) -> Option<Self> {
        match name {
            "ticker" => Some(Self::Ticker),
            "book" => Some(Self::Book),
            "ohlc" => Some(Self::Candles),
            "trade" => Some(Self::Trade),
            _ => None,
        }
    }

    /// Parse a channel from configuration text (accepts `candles` for `ohlc`).
    #[must_use]
    pub fn from_str_case_insensitive(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "candles" => Some(Self::Candles),
            other => Self::from_wire(other),
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a data message carries full state or a delta.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataKind {
    /// Full current state.
    Snapshot,
    /// Incremental change.
    Update,
}

impl DataKind {
    /// Parse the wire `type` field.
    #[must_use]
    pub fn from_wire(s: &str) -> Option<Self> {
        match s {
            "snapshot" => Some(Self::Snapshot),
            "update" => Some(Self::Update),
            _ => None,
        }
    }

    /// Wire name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Snapshot => "snapshot",
            Self::Update => "update",
        }
    }
}

// =============================================================================
// Ticker
// =============================================================================

/// Level 1 ticker entry.
///
/// # Wire Format (JSON)
/// ```json
/// {"symbol":"BTC/USD","bid":42000.1,"bid_qty":0.5,"ask":42000.2,"ask_qty":1.2,
///  "last":42000.2,"volume":1234.5,"vwap":41888.3,"low":41000.0,"high":43000.0,
///  "change":120.0,"change_pct":0.29}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticker {
    /// Instrument symbol.
    pub symbol: Symbol,
    /// Best bid price.
    pub bid: Decimal,
    /// Best bid quantity.
    pub bid_qty: Decimal,
    /// Best ask price.
    pub ask: Decimal,
    /// Best ask quantity.
    pub ask_qty: Decimal,
    /// Last traded price.
    pub last: Decimal,
    /// 24h traded volume.
    pub volume: Decimal,
    /// 24h volume weighted average price.
    pub vwap: Decimal,
    /// 24h low.
    pub low: Decimal,
    /// 24h high.
    pub high: Decimal,
    /// 24h price change.
    #[serde(default)]
    pub change: Option<Decimal>,
    /// 24h price change in percent.
    #[serde(default)]
    pub change_pct: Option<Decimal>,
}

// =============================================================================
// Book
// =============================================================================

/// One price level of the order book.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookLevel {
    /// Level price.
    pub price: Decimal,
    /// Aggregate quantity at the price (zero in an update removes the level).
    pub qty: Decimal,
}

impl BookLevel {
    /// Create a new level.
    #[must_use]
    pub const fn new(price: Decimal, qty: Decimal) -> Self {
        Self { price, qty }
    }
}

/// Order book entry: bid and ask levels plus the declared checksum.
///
/// Bids are ordered descending by price, asks ascending.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookLevelSet {
    /// Instrument symbol.
    pub symbol: Symbol,
    /// Bid levels, best first.
    #[serde(default)]
    pub bids: Vec<BookLevel>,
    /// Ask levels, best first.
    #[serde(default)]
    pub asks: Vec<BookLevel>,
    /// CRC-32 over the top of book as declared by the sender.
    pub checksum: u32,
    /// Emission timestamp (updates only).
    #[serde(default)]
    pub timestamp: Option<String>,
}

impl BookLevelSet {
    /// Best (highest) bid price.
    #[must_use]
    pub fn best_bid(&self) -> Option<Decimal> {
        self.bids.first().map(|l| l.price)
    }

    /// Best (lowest) ask price.
    #[must_use]
    pub fn best_ask(&self) -> Option<Decimal> {
        self.asks.first().map(|l| l.price)
    }
}

// =============================================================================
// Candles
// =============================================================================

/// OHLC candle entry.
///
/// Timestamps are kept as received; the semantic validator parses them so
/// that an unparseable timestamp is reported rather than rejected at decode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candle {
    /// Instrument symbol.
    pub symbol: Symbol,
    /// Open price.
    pub open: Decimal,
    /// High price.
    pub high: Decimal,
    /// Low price.
    pub low: Decimal,
    /// Close price.
    pub close: Decimal,
    /// Number of trades in the interval.
    pub trades: i64,
    /// Traded volume in the interval.
    pub volume: Decimal,
    /// Volume weighted average price.
    pub vwap: Decimal,
    /// Interval start (RFC 3339).
    pub interval_begin: String,
    /// Interval duration in minutes.
    pub interval: u32,
    /// Emission timestamp (RFC 3339).
    #[serde(default)]
    pub timestamp: Option<String>,
}

// =============================================================================
// Trades
// =============================================================================

/// Taker side of a trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    /// Buy.
    Buy,
    /// Sell.
    Sell,
}

/// Order type that triggered the trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    /// Limit order.
    Limit,
    /// Market order.
    Market,
}

/// Executed trade entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trade {
    /// Instrument symbol.
    pub symbol: Symbol,
    /// Taker side.
    pub side: Side,
    /// Execution price.
    pub price: Decimal,
    /// Executed quantity.
    pub qty: Decimal,
    /// Order type.
    pub ord_type: OrderType,
    /// Sequence number, unique per book.
    pub trade_id: i64,
    /// Execution timestamp (RFC 3339).
    pub timestamp: String,
}

// =============================================================================
// Payload
// =============================================================================

/// Typed content of a data message, one variant per channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Ticker entries.
    Ticker(Vec<Ticker>),
    /// Book entries.
    Book(Vec<BookLevelSet>),
    /// Candle entries.
    Candles(Vec<Candle>),
    /// Trade entries.
    Trades(Vec<Trade>),
}

impl Payload {
    /// Decode the `data` array of a message for the given channel.
    ///
    /// # Errors
    ///
    /// Returns an error if the entries do not match the channel's entry type.
    pub fn decode(channel: Channel, data: &serde_json::Value) -> Result<Self, serde_json::Error> {
        Ok(match channel {
            Channel::Ticker => Self::Ticker(Vec::<Ticker>::deserialize(data)?),
            Channel::Book => Self::Book(Vec::<BookLevelSet>::deserialize(data)?),
            Channel::Candles => Self::Candles(Vec::<Candle>::deserialize(data)?),
            Channel::Trade => Self::Trades(Vec::<Trade>::deserialize(data)?),
        })
    }

    /// Channel this payload belongs to.
    #[must_use]
    pub const fn channel(&self) -> Channel {
        match self {
            Self::Ticker(_) => Channel::Ticker,
            Self::Book(_) => Channel::Book,
            Self::Candles(_) => Channel::Candles,
            Self::Trades(_) => Channel::Trade,
        }
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Ticker(v) => v.len(),
            Self::Book(v) => v.len(),
            Self::Candles(v) => v.len(),
            Self::Trades(v) => v.len(),
        }
    }

    /// Whether the payload has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// =============================================================================
// Data Message
// =============================================================================

/// A classified snapshot or update frame, before validation.
///
/// The `data` array is kept as raw JSON so schema and semantic validation
/// both see exactly what was received.
#[derive(Debug, Clone, PartialEq)]
pub struct DataMessage {
    /// Channel the frame belongs to.
    pub channel: Channel,
    /// Snapshot or update.
    pub kind: DataKind,
    /// The full frame as parsed JSON.
    pub frame: serde_json::Value,
    /// Message-level timestamp, if present.
    pub timestamp: Option<String>,
}

impl DataMessage {
    /// Entries of the `data` array (empty if absent or not an array).
    #[must_use]
    pub fn entries(&self) -> &[serde_json::Value] {
        self.frame
            .get("data")
            .and_then(serde_json::Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Distinct symbols named by the entries, in first-seen order.
    #[must_use]
    pub fn symbols(&self) -> Vec<&str> {
        let mut symbols: Vec<&str> = Vec::new();
        for symbol in self
            .entries()
            .iter()
            .filter_map(|e| e.get("symbol").and_then(serde_json::Value::as_str))
        {
            if !symbols.contains(&symbol) {
                symbols.push(symbol);
            }
        }
        symbols
    }

    /// Whether any entry names the given symbol.
    #[must_use]
    pub fn mentions(&self, symbol: &str) -> bool {
        self.symbols().contains(&symbol)
    }

    /// Decode the entries into typed payload.
    ///
    /// # Errors
    ///
    /// Returns an error if any entry does not match the channel's entry type.
    pub fn payload(&self) -> Result<Payload, serde_json::Error> {
        let data = self.frame.get("data").unwrap_or(&serde_json::Value::Null);
        Payload::decode(self.channel, data)
    }
}
