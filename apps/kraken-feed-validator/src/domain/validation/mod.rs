//! Message Validation
//!
//! Structural (schema) and semantic (business-rule) validation of data
//! messages, plus the order book checksum.
//!
//! Schema and semantic outcomes are reported side by side and never merged:
//! a message can be schema-valid and semantically invalid at the same time.
//! Validation failures are values, not errors.

pub mod checksum;
pub mod schema;
pub mod semantic;

use std::fmt;

use crate::domain::market::Symbol;

pub use checksum::{CHECKSUM_DEPTH, compute_checksum};
pub use schema::{FieldError, FieldProblem, SchemaLoadError, SchemaRegistry, SchemaViolation};
pub use semantic::SemanticValidator;

// =============================================================================
// Rules
// =============================================================================

/// Severity class of a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuleClass {
    /// Business-rule failure, reported but not fatal.
    Semantic,
    /// Data-integrity failure that callers must treat as a hard failure.
    Critical,
    /// Order book checksum mismatch.
    Checksum,
}

/// Every semantic rule the validator evaluates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Rule {
    /// Entry names a symbol with an active subscription on its channel.
    SymbolSubscribed,
    /// First message after a snapshot-requesting subscribe is a snapshot.
    SnapshotFirst,
    /// Message carries at least one data entry.
    DataNonEmpty,
    /// Entry decodes into the channel's typed payload.
    EntryDecodes,

    /// Ticker bid > 0.
    TickerBidPositive,
    /// Ticker ask > 0.
    TickerAskPositive,
    /// Ticker bid < ask.
    TickerBidBelowAsk,
    /// Ticker bid and ask quantities > 0.
    TickerQtyPositive,
    /// Ticker last > 0.
    TickerLastPositive,
    /// Ticker 24h volume > 0.
    TickerVolumePositive,
    /// Ticker vwap > 0.
    TickerVwapPositive,
    /// Ticker low <= high.
    TickerLowNotAboveHigh,

    /// Book has bids and asks.
    BookNonEmpty,
    /// Best bid < best ask.
    BookNotCrossed,
    /// Bids strictly descending.
    BookBidsDescending,
    /// Asks strictly ascending.
    BookAsksAscending,
    /// Prices > 0, quantities > 0 (>= 0 in updates).
    BookLevelsPositive,
    /// Levels per side within the subscribed depth.
    BookDepthWithinSubscription,
    /// Recomputed checksum equals the declared one.
    BookChecksum,
    /// Update received before any snapshot.
    BookUpdateWithoutSnapshot,

    /// low <= open <= high.
    CandleOpenWithinRange,
    /// low <= close <= high.
    CandleCloseWithinRange,
    /// All OHLC prices > 0.
    CandlePricesPositive,
    /// Trade count >= 0.
    CandleTradesNonNegative,
    /// Volume >= 0.
    CandleVolumeNonNegative,
    /// vwap > 0.
    CandleVwapPositive,
    /// Interval equals the subscribed interval.
    CandleIntervalMatches,
    /// `interval_begin` and emission timestamp parse.
    CandleTimestampsParse,
    /// `interval_begin` strictly precedes the emission timestamp.
    CandleBeginBeforeEmission,
    /// Emission minus begin equals the interval within tolerance.
    CandleElapsedMatchesInterval,

    /// Trade qty > 0.
    TradeQtyPositive,
    /// Trade price > 0.
    TradePricePositive,
    /// Side is buy or sell.
    TradeSideValid,
    /// Order type is limit or market.
    TradeOrderTypeValid,
    /// Trade id > 0.
    TradeIdPositive,
    /// Trade id non-decreasing per symbol.
    TradeIdMonotonic,
    /// Timestamp parses as RFC 3339.
    TradeTimestampValid,
}

impl Rule {
    /// Stable dotted identifier, used in logs and metrics labels.
    #[must_use]
    pub const fn id(&self) -> &'static str {
        match self {
            Self::SymbolSubscribed => "stream.symbol_subscribed",
            Self::SnapshotFirst => "stream.snapshot_first",
            Self::DataNonEmpty => "stream.data_non_empty",
            Self::EntryDecodes => "stream.entry_decodes",
            Self::TickerBidPositive => "ticker.bid_positive",
            Self::TickerAskPositive => "ticker.ask_positive",
            Self::TickerBidBelowAsk => "ticker.bid_below_ask",
            Self::TickerQtyPositive => "ticker.qty_positive",
            Self::TickerLastPositive => "ticker.last_positive",
            Self::TickerVolumePositive => "ticker.volume_positive",
            Self::TickerVwapPositive => "ticker.vwap_positive",
            Self::TickerLowNotAboveHigh => "ticker.low_not_above_high",
            Self::BookNonEmpty => "book.non_empty",
            Self::BookNotCrossed => "book.not_crossed",
            Self::BookBidsDescending => "book.bids_descending",
            Self::BookAsksAscending => "book.asks_ascending",
            Self::BookLevelsPositive => "book.levels_positive",
            Self::BookDepthWithinSubscription => "book.depth_within_subscription",
            Self::BookChecksum => "book.checksum",
            Self::BookUpdateWithoutSnapshot => "book.update_without_snapshot",
            Self::CandleOpenWithinRange => "ohlc.open_within_range",
            Self::CandleCloseWithinRange => "ohlc.close_within_range",
            Self::CandlePricesPositive => "ohlc.prices_positive",
            Self::CandleTradesNonNegative => "ohlc.trades_non_negative",
            Self::CandleVolumeNonNegative => "ohlc.volume_non_negative",
            Self::CandleVwapPositive => "ohlc.vwap_positive",
            Self::CandleIntervalMatches => "ohlc.interval_matches",
            Self::CandleTimestampsParse => "ohlc.timestamps_parse",
            Self::CandleBeginBeforeEmission => "ohlc.begin_before_emission",
            Self::CandleElapsedMatchesInterval => "ohlc.elapsed_matches_interval",
            Self::TradeQtyPositive => "trade.qty_positive",
            Self::TradePricePositive => "trade.price_positive",
            Self::TradeSideValid => "trade.side_valid",
            Self::TradeOrderTypeValid => "trade.ord_type_valid",
            Self::TradeIdPositive => "trade.id_positive",
            Self::TradeIdMonotonic => "trade.id_monotonic",
            Self::TradeTimestampValid => "trade.timestamp_valid",
        }
    }

    /// Severity class.
    #[must_use]
    pub const fn class(&self) -> RuleClass {
        match self {
            Self::BookNotCrossed => RuleClass::Critical,
            Self::BookChecksum => RuleClass::Checksum,
            _ => RuleClass::Semantic,
        }
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

// =============================================================================
// Results
// =============================================================================

/// Outcome of one rule for one entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationResult {
    /// Rule evaluated.
    pub rule: Rule,
    /// Whether the rule held.
    pub passed: bool,
    /// Observed values, rendered for diagnostics.
    pub observed: String,
    /// Symbol of the entry, if known.
    pub symbol: Option<Symbol>,
}

impl ValidationResult {
    /// Build a result from a condition.
    #[must_use]
    pub fn check(rule: Rule, passed: bool, symbol: Option<&str>, observed: impl Into<String>) -> Self {
        Self {
            rule,
            passed,
            observed: observed.into(),
            symbol: symbol.map(ToString::to_string),
        }
    }

    /// Build a failed result.
    #[must_use]
    pub fn fail(rule: Rule, symbol: Option<&str>, observed: impl Into<String>) -> Self {
        Self::check(rule, false, symbol, observed)
    }

    /// Whether this is a failed critical rule.
    #[must_use]
    pub fn is_critical_failure(&self) -> bool {
        !self.passed && self.rule.class() == RuleClass::Critical
    }

    /// Whether this is a checksum mismatch.
    #[must_use]
    pub fn is_checksum_mismatch(&self) -> bool {
        !self.passed && self.rule.class() == RuleClass::Checksum
    }
}

impl fmt::Display for ValidationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = if self.passed { "pass" } else { "FAIL" };
        match &self.symbol {
            Some(symbol) => write!(f, "[{status}] {} {symbol}: {}", self.rule, self.observed),
            None => write!(f, "[{status}] {}: {}", self.rule, self.observed),
        }
    }
}

/// Combined validation outcome of one data message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageValidation {
    /// Structural outcome.
    pub schema: Result<(), SchemaViolation>,
    /// Semantic outcomes, one per rule per entry.
    pub results: Vec<ValidationResult>,
}

impl MessageValidation {
    /// Failed semantic results.
    pub fn failures(&self) -> impl Iterator<Item = &ValidationResult> {
        self.results.iter().filter(|r| !r.passed)
    }

    /// Whether any critical rule failed.
    #[must_use]
    pub fn has_critical_failure(&self) -> bool {
        self.results.iter().any(ValidationResult::is_critical_failure)
    }

    /// Whether a checksum mismatch was found.
    #[must_use]
    pub fn has_checksum_mismatch(&self) -> bool {
        self.results.iter().any(ValidationResult::is_checksum_mismatch)
    }

    /// Whether the message passed schema and every rule.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.schema.is_ok() && self.results.iter().all(|r| r.passed)
    }

    /// Outcome of a specific rule for a symbol, if evaluated.
    #[must_use]
    pub fn outcome(&self, rule: Rule, symbol: &str) -> Option<&ValidationResult> {
        self.results
            .iter()
            .find(|r| r.rule == rule && r.symbol.as_deref() == Some(symbol))
    }
}
