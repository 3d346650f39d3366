//! Subscription Registry
//!
//! Tracks the subscriptions multiplexed over one connection and their
//! acknowledgment state.
//!
//! # Design
//!
//! The registry is keyed by (channel, symbol). One subscribe request may
//! cover several symbols, so it creates one entry per symbol, all sharing
//! the request's `req_id`. Server responses are correlated by `req_id`
//! first and by (channel, symbol) second.
//!
//! Each entry also owns the per-stream state that semantic validation
//! needs across messages (snapshot seen, last trade id, reconstructed
//! book). Removing an entry drops that state, so an unsubscribe followed
//! by a resubscribe starts from a clean slate.
//!
//! The registry is owned by one session and is not shared between tasks.

use std::collections::HashMap;

use serde::Serialize;

use crate::domain::market::{Channel, Symbol};
use crate::domain::order_book::OrderBookState;

/// Default book depth when the subscription does not specify one.
pub const DEFAULT_BOOK_DEPTH: u32 = 10;

/// Default candle interval in minutes.
pub const DEFAULT_CANDLE_INTERVAL: u32 = 1;

// =============================================================================
// Types
// =============================================================================

/// Registry-issued subscription identifier.
pub type SubscriptionId = u64;

/// Request correlation id sent as `req_id`.
pub type RequestId = u64;

/// Key identifying one stream on the connection.
pub type StreamKey = (Channel, Symbol);

/// Ticker event trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventTrigger {
    /// Emit on best bid/offer changes.
    Bbo,
    /// Emit on trades.
    Trades,
}

/// Decimal places used when rendering book levels for the checksum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChecksumPrecision {
    /// Price precision.
    pub price: u32,
    /// Quantity precision.
    pub qty: u32,
}

/// Channel-specific subscription parameters.
///
/// Values are forwarded unchecked; the server decides whether they are
/// acceptable and rejects the subscription otherwise.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionParams {
    /// Request an initial snapshot. `None` uses the server default.
    pub snapshot: Option<bool>,
    /// Book depth (book channel).
    pub depth: Option<u32>,
    /// Candle interval in minutes (ohlc channel).
    pub interval: Option<u32>,
    /// Ticker event trigger.
    pub event_trigger: Option<EventTrigger>,
    /// Local checksum rendering precision (never sent on the wire).
    pub checksum_precision: Option<ChecksumPrecision>,
}

impl SubscriptionParams {
    /// Request or suppress the initial snapshot.
    #[must_use]
    pub const fn with_snapshot(mut self, snapshot: bool) -> Self {
        self.snapshot = Some(snapshot);
        self
    }

    /// Set the book depth.
    #[must_use]
    pub const fn with_depth(mut self, depth: u32) -> Self {
        self.depth = Some(depth);
        self
    }

    /// Set the candle interval in minutes.
    #[must_use]
    pub const fn with_interval(mut self, minutes: u32) -> Self {
        self.interval = Some(minutes);
        self
    }

    /// Set the ticker event trigger.
    #[must_use]
    pub const fn with_event_trigger(mut self, trigger: EventTrigger) -> Self {
        self.event_trigger = Some(trigger);
        self
    }

    /// Set checksum rendering precision.
    #[must_use]
    pub const fn with_checksum_precision(mut self, price: u32, qty: u32) -> Self {
        self.checksum_precision = Some(ChecksumPrecision { price, qty });
        self
    }

    /// Whether the server is expected to send a snapshot first.
    ///
    /// The trade channel defaults to no snapshot; every other channel
    /// defaults to sending one.
    #[must_use]
    pub fn expects_snapshot(&self, channel: Channel) -> bool {
        self.snapshot.unwrap_or(channel != Channel::Trade)
    }

    /// Effective candle interval in minutes.
    #[must_use]
    pub fn effective_interval(&self) -> u32 {
        self.interval.unwrap_or(DEFAULT_CANDLE_INTERVAL)
    }

    /// Effective book depth. A depth of zero falls back to the default.
    #[must_use]
    pub fn effective_depth(&self) -> u32 {
        match self.depth {
            Some(0) | None => DEFAULT_BOOK_DEPTH,
            Some(d) => d,
        }
    }
}

/// Acknowledgment state of a subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AckState {
    /// Request sent, no response yet.
    Pending,
    /// Server confirmed the subscription.
    Confirmed,
    /// Server rejected the subscription (terminal).
    Rejected(String),
}

impl AckState {
    /// Whether the state can no longer change.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Confirmed | Self::Rejected(_))
    }
}

/// Acknowledgment outcome reported by the server for one stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AckStatus {
    /// Subscription accepted.
    Confirmed,
    /// Subscription refused with reason.
    Rejected(String),
}

/// Per-stream state carried across messages.
#[derive(Debug, Clone, Default)]
pub struct StreamState {
    /// Data messages observed for this stream.
    pub messages_seen: u64,
    /// Whether a snapshot has been observed.
    pub snapshot_seen: bool,
    /// Highest trade id observed.
    pub last_trade_id: Option<i64>,
    /// Reconstructed book (book channel only).
    pub book: Option<OrderBookState>,
}

/// One active (channel, symbol) subscription.
#[derive(Debug, Clone)]
pub struct Subscription {
    /// Owning handle id.
    pub id: SubscriptionId,
    /// Channel.
    pub channel: Channel,
    /// Symbol.
    pub symbol: Symbol,
    /// Parameters as requested.
    pub params: SubscriptionParams,
    /// Correlation id of the subscribe request.
    pub req_id: RequestId,
    /// Acknowledgment state.
    pub ack: AckState,
    /// Cross-message validation state.
    pub state: StreamState,
}

/// Caller-held reference to a subscribe request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionHandle {
    /// Registry-issued id.
    pub id: SubscriptionId,
    /// Channel.
    pub channel: Channel,
    /// Symbols covered by the request, in request order.
    pub symbols: Vec<Symbol>,
    /// Parameters as requested.
    pub params: SubscriptionParams,
    /// Correlation id of the subscribe request.
    pub req_id: RequestId,
}

impl SubscriptionHandle {
    /// Whether this handle covers the given stream.
    #[must_use]
    pub fn covers(&self, channel: Channel, symbol: &str) -> bool {
        self.channel == channel && self.symbols.iter().any(|s| s == symbol)
    }
}

/// Registry counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryStats {
    /// Entries awaiting acknowledgment.
    pub pending: usize,
    /// Confirmed entries.
    pub confirmed: usize,
    /// Rejected entries.
    pub rejected: usize,
}

impl RegistryStats {
    /// Total entries.
    #[must_use]
    pub const fn total(&self) -> usize {
        self.pending + self.confirmed + self.rejected
    }
}

// =============================================================================
// Registry
// =============================================================================

/// Per-connection subscription registry.
///
/// # Example
///
/// ```rust
/// use kraken_feed_validator::domain::market::Channel;
/// use kraken_feed_validator::domain::subscription::{
///     AckState, AckStatus, SubscriptionParams, SubscriptionRegistry,
/// };
///
/// let mut registry = SubscriptionRegistry::new();
/// let handle = registry.register(
///     Channel::Ticker,
///     vec!["BTC/USD".to_string()],
///     SubscriptionParams::default(),
///     1,
/// );
///
/// assert_eq!(
///     registry.get(Channel::Ticker, "BTC/USD").map(|s| &s.ack),
///     Some(&AckState::Pending)
/// );
///
/// registry.ack(Channel::Ticker, "BTC/USD", AckStatus::Confirmed);
/// assert!(registry.is_confirmed(&handle));
/// ```
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    entries: HashMap<StreamKey, Subscription>,
    next_id: SubscriptionId,
}

impl SubscriptionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            next_id: 1,
        }
    }

    /// Record a pending subscription for each symbol of a subscribe request.
    ///
    /// An existing entry for the same (channel, symbol) is replaced together
    /// with its stream state.
    pub fn register(
        &mut self,
        channel: Channel,
        symbols: Vec<Symbol>,
        params: SubscriptionParams,
        req_id: RequestId,
    ) -> SubscriptionHandle {
        let id = self.next_id;
        self.next_id += 1;

        for symbol in &symbols {
            let state = StreamState {
                book: (channel == Channel::Book)
                    .then(|| OrderBookState::new(params.effective_depth() as usize)),
                ..StreamState::default()
            };

            let replaced = self.entries.insert(
                (channel, symbol.clone()),
                Subscription {
                    id,
                    channel,
                    symbol: symbol.clone(),
                    params: params.clone(),
                    req_id,
                    ack: AckState::Pending,
                    state,
                },
            );

            if let Some(previous) = replaced {
                tracing::debug!(
                    channel = %channel,
                    symbol = %symbol,
                    previous_id = previous.id,
                    id,
                    "Replacing existing subscription"
                );
            }
        }

        SubscriptionHandle {
            id,
            channel,
            symbols,
            params,
            req_id,
        }
    }

    /// Apply an acknowledgment outcome to one stream.
    ///
    /// Returns `false` if no entry exists for the key. A rejected entry
    /// stays rejected.
    pub fn ack(&mut self, channel: Channel, symbol: &str, status: AckStatus) -> bool {
        let Some(entry) = self.entries.get_mut(&(channel, symbol.to_string())) else {
            return false;
        };

        if matches!(entry.ack, AckState::Rejected(_)) {
            return true;
        }

        entry.ack = match status {
            AckStatus::Confirmed => AckState::Confirmed,
            AckStatus::Rejected(reason) => AckState::Rejected(reason),
        };
        true
    }

    /// Apply an acknowledgment outcome to every entry created by a request.
    ///
    /// Returns the number of entries updated.
    pub fn ack_request(&mut self, req_id: RequestId, status: &AckStatus) -> usize {
        let keys: Vec<StreamKey> = self
            .entries
            .values()
            .filter(|s| s.req_id == req_id)
            .map(|s| (s.channel, s.symbol.clone()))
            .collect();

        for (channel, symbol) in &keys {
            self.ack(*channel, symbol, status.clone());
        }
        keys.len()
    }

    /// Remove the entries belonging to a handle.
    ///
    /// Entries that were since replaced by a newer subscription are kept.
    /// Returns the symbols removed.
    pub fn remove(&mut self, handle: &SubscriptionHandle) -> Vec<Symbol> {
        let mut removed = Vec::new();
        for symbol in &handle.symbols {
            let key = (handle.channel, symbol.clone());
            if self.entries.get(&key).is_some_and(|s| s.id == handle.id) {
                self.entries.remove(&key);
                removed.push(symbol.clone());
            }
        }
        removed
    }

    /// Drop every entry (connection teardown).
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Look up an entry.
    #[must_use]
    pub fn get(&self, channel: Channel, symbol: &str) -> Option<&Subscription> {
        self.entries.get(&(channel, symbol.to_string()))
    }

    /// Look up an entry mutably.
    pub fn get_mut(&mut self, channel: Channel, symbol: &str) -> Option<&mut Subscription> {
        self.entries.get_mut(&(channel, symbol.to_string()))
    }

    /// Channel of the entries created by a request.
    #[must_use]
    pub fn channel_of_request(&self, req_id: RequestId) -> Option<Channel> {
        self.entries
            .values()
            .find(|s| s.req_id == req_id)
            .map(|s| s.channel)
    }

    /// Whether any entry was created by the given request.
    #[must_use]
    pub fn has_request(&self, req_id: RequestId) -> bool {
        self.entries.values().any(|s| s.req_id == req_id)
    }

    /// Combined acknowledgment state of a handle.
    ///
    /// Rejected if any symbol was rejected, confirmed once every symbol is
    /// confirmed, pending otherwise. A handle with no remaining entries is
    /// reported as pending.
    #[must_use]
    pub fn handle_state(&self, handle: &SubscriptionHandle) -> AckState {
        let mut all_confirmed = !handle.symbols.is_empty();

        for symbol in &handle.symbols {
            match self.get(handle.channel, symbol).filter(|s| s.id == handle.id) {
                Some(Subscription {
                    ack: AckState::Rejected(reason),
                    ..
                }) => return AckState::Rejected(reason.clone()),
                Some(Subscription {
                    ack: AckState::Confirmed,
                    ..
                }) => {}
                _ => all_confirmed = false,
            }
        }

        if all_confirmed {
            AckState::Confirmed
        } else {
            AckState::Pending
        }
    }

    /// Whether every symbol of a handle is confirmed.
    #[must_use]
    pub fn is_confirmed(&self, handle: &SubscriptionHandle) -> bool {
        self.handle_state(handle) == AckState::Confirmed
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Counts by acknowledgment state.
    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        self.entries
            .values()
            .fold(RegistryStats::default(), |mut stats, s| {
                match s.ack {
                    AckState::Pending => stats.pending += 1,
                    AckState::Confirmed => stats.confirmed += 1,
                    AckState::Rejected(_) => stats.rejected += 1,
                }
                stats
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn symbols(s: &[&str]) -> Vec<Symbol> {
        s.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn register_creates_pending_entry_per_symbol() {
        let mut registry = SubscriptionRegistry::new();
        let handle = registry.register(
            Channel::Ticker,
            symbols(&["BTC/USD", "SOL/USD"]),
            SubscriptionParams::default(),
            7,
        );

        assert_eq!(registry.len(), 2);
        assert_eq!(handle.req_id, 7);
        assert_eq!(registry.stats().pending, 2);
        assert_eq!(registry.handle_state(&handle), AckState::Pending);
    }

    #[test]
    fn handle_confirmed_only_when_all_symbols_confirmed() {
        let mut registry = SubscriptionRegistry::new();
        let handle = registry.register(
            Channel::Ticker,
            symbols(&["BTC/USD", "SOL/USD"]),
            SubscriptionParams::default(),
            1,
        );

        registry.ack(Channel::Ticker, "BTC/USD", AckStatus::Confirmed);
        assert_eq!(registry.handle_state(&handle), AckState::Pending);

        registry.ack(Channel::Ticker, "SOL/USD", AckStatus::Confirmed);
        assert!(registry.is_confirmed(&handle));
    }

    #[test]
    fn rejection_is_terminal() {
        let mut registry = SubscriptionRegistry::new();
        let handle = registry.register(
            Channel::Book,
            symbols(&["FAKE/COIN"]),
            SubscriptionParams::default(),
            3,
        );

        registry.ack(
            Channel::Book,
            "FAKE/COIN",
            AckStatus::Rejected("Currency pair not supported".to_string()),
        );
        registry.ack(Channel::Book, "FAKE/COIN", AckStatus::Confirmed);

        assert_eq!(
            registry.handle_state(&handle),
            AckState::Rejected("Currency pair not supported".to_string())
        );
        assert!(registry.get(Channel::Book, "FAKE/COIN").unwrap().ack.is_terminal());
    }

    #[test]
    fn ack_unknown_key_reports_false() {
        let mut registry = SubscriptionRegistry::new();
        assert!(!registry.ack(Channel::Trade, "BTC/USD", AckStatus::Confirmed));
    }

    #[test]
    fn ack_request_updates_all_entries_of_request() {
        let mut registry = SubscriptionRegistry::new();
        registry.register(
            Channel::Trade,
            symbols(&["BTC/USD", "ETH/USD"]),
            SubscriptionParams::default(),
            11,
        );
        registry.register(
            Channel::Ticker,
            symbols(&["BTC/USD"]),
            SubscriptionParams::default(),
            12,
        );

        let updated = registry.ack_request(11, &AckStatus::Rejected("bad".to_string()));
        assert_eq!(updated, 2);
        assert_eq!(registry.stats().rejected, 2);
        assert_eq!(registry.stats().pending, 1);
    }

    #[test]
    fn resubscribe_starts_with_fresh_state() {
        let mut registry = SubscriptionRegistry::new();
        let first = registry.register(
            Channel::Trade,
            symbols(&["BTC/USD"]),
            SubscriptionParams::default(),
            1,
        );
        registry.ack(Channel::Trade, "BTC/USD", AckStatus::Confirmed);
        registry
            .get_mut(Channel::Trade, "BTC/USD")
            .unwrap()
            .state
            .last_trade_id = Some(500);

        assert_eq!(registry.remove(&first), symbols(&["BTC/USD"]));
        assert!(registry.is_empty());

        let second = registry.register(
            Channel::Trade,
            symbols(&["BTC/USD"]),
            SubscriptionParams::default(),
            2,
        );
        let entry = registry.get(Channel::Trade, "BTC/USD").unwrap();
        assert_ne!(second.id, first.id);
        assert_eq!(entry.ack, AckState::Pending);
        assert_eq!(entry.state.last_trade_id, None);
    }

    #[test]
    fn removing_stale_handle_keeps_replacement() {
        let mut registry = SubscriptionRegistry::new();
        let old = registry.register(
            Channel::Book,
            symbols(&["ETH/USD"]),
            SubscriptionParams::default(),
            1,
        );
        let new = registry.register(
            Channel::Book,
            symbols(&["ETH/USD"]),
            SubscriptionParams::default().with_depth(25),
            2,
        );

        assert!(registry.remove(&old).is_empty());
        assert_eq!(registry.get(Channel::Book, "ETH/USD").unwrap().id, new.id);
    }

    #[test]
    fn book_entries_get_reconstruction_state() {
        let mut registry = SubscriptionRegistry::new();
        registry.register(
            Channel::Book,
            symbols(&["ETH/USD"]),
            SubscriptionParams::default().with_depth(25),
            1,
        );
        let book = registry
            .get(Channel::Book, "ETH/USD")
            .unwrap()
            .state
            .book
            .as_ref()
            .unwrap();
        assert_eq!(book.depth(), 25);
    }

    #[test]
    fn params_defaults() {
        let params = SubscriptionParams::default();
        assert!(params.expects_snapshot(Channel::Ticker));
        assert!(params.expects_snapshot(Channel::Book));
        assert!(!params.expects_snapshot(Channel::Trade));
        assert_eq!(params.effective_depth(), DEFAULT_BOOK_DEPTH);
        assert_eq!(
            SubscriptionParams::default().with_depth(0).effective_depth(),
            DEFAULT_BOOK_DEPTH
        );
    }

    #[test]
    fn clear_drops_everything() {
        let mut registry = SubscriptionRegistry::new();
        registry.register(
            Channel::Ticker,
            symbols(&["BTC/USD"]),
            SubscriptionParams::default(),
            1,
        );
        registry.clear();
        assert!(registry.is_empty());
        assert_eq!(registry.stats().total(), 0);
    }
}
