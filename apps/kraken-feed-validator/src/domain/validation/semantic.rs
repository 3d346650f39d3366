//! Semantic Validator
//!
//! Per-channel business rules evaluated on every entry of a data message.
//!
//! Every rule is evaluated independently and reported, so one entry can
//! surface several violations at once. Rules that need history (snapshot
//! ordering, trade id sequence, book reconstruction) read and update the
//! stream state held by the subscription entry the entry belongs to.
//!
//! # Book updates
//!
//! A book update is a delta. It is applied to the reconstructed book first;
//! crossing, ordering, depth and checksum are then checked on the result.

use chrono::{DateTime, TimeDelta, Utc};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::domain::market::{
    BookLevel, BookLevelSet, Candle, Channel, DataKind, DataMessage, OrderType, Side, Ticker, Trade,
};
use crate::domain::order_book::OrderBookState;
use crate::domain::subscription::{ChecksumPrecision, Subscription, SubscriptionRegistry};
use crate::domain::validation::checksum::compute_checksum;
use crate::domain::validation::{Rule, ValidationResult};

/// Allowed deviation between candle elapsed time and its interval.
pub const DEFAULT_CANDLE_TOLERANCE: TimeDelta = TimeDelta::seconds(1);

/// Business-rule validator for data messages.
#[derive(Debug, Clone, Copy)]
pub struct SemanticValidator {
    candle_tolerance: TimeDelta,
}

impl Default for SemanticValidator {
    fn default() -> Self {
        Self::new(DEFAULT_CANDLE_TOLERANCE)
    }
}

impl SemanticValidator {
    /// Create a validator with the given candle timing tolerance.
    #[must_use]
    pub const fn new(candle_tolerance: TimeDelta) -> Self {
        Self { candle_tolerance }
    }

    /// Validate every entry of a message against its subscription.
    ///
    /// Entries are routed to their subscription by (channel, symbol). An
    /// entry with no subscription fails `stream.symbol_subscribed` and is
    /// not evaluated further.
    pub fn validate_semantics(
        &self,
        message: &DataMessage,
        context: &mut SubscriptionRegistry,
    ) -> Vec<ValidationResult> {
        let entries = message.entries();
        if entries.is_empty() {
            return vec![ValidationResult::fail(
                Rule::DataNonEmpty,
                None,
                "data array is empty",
            )];
        }

        let mut results = Vec::new();
        for entry in entries {
            let symbol = entry.get("symbol").and_then(Value::as_str);
            let Some(subscription) = symbol.and_then(|s| context.get_mut(message.channel, s)) else {
                results.push(ValidationResult::fail(
                    Rule::SymbolSubscribed,
                    symbol,
                    format!("no active {} subscription", message.channel),
                ));
                continue;
            };

            results.push(ValidationResult::check(
                Rule::SymbolSubscribed,
                true,
                symbol,
                format!("subscription {}", subscription.id),
            ));
            self.validate_entry(message, entry, subscription, &mut results);
        }
        results
    }

    /// Validate one entry against the subscription it belongs to.
    pub fn validate_entry(
        &self,
        message: &DataMessage,
        entry: &Value,
        subscription: &mut Subscription,
        results: &mut Vec<ValidationResult>,
    ) {
        let symbol = subscription.symbol.as_str();
        let state = &mut subscription.state;

        if state.messages_seen == 0 && subscription.params.expects_snapshot(message.channel) {
            results.push(ValidationResult::check(
                Rule::SnapshotFirst,
                message.kind == DataKind::Snapshot,
                Some(symbol),
                format!("first message is {}", message.kind.as_str()),
            ));
        }
        state.messages_seen += 1;
        // A book snapshot only counts once it has been applied.
        if message.kind == DataKind::Snapshot && message.channel != Channel::Book {
            state.snapshot_seen = true;
        }

        match message.channel {
            Channel::Ticker => ticker_rules(entry, symbol, results),
            Channel::Book => book_rules(entry, message.kind, subscription, results),
            Channel::Candles => self.candle_rules(entry, message, subscription, results),
            Channel::Trade => trade_rules(entry, subscription, results),
        }
    }

    fn candle_rules(
        &self,
        entry: &Value,
        message: &DataMessage,
        subscription: &Subscription,
        results: &mut Vec<ValidationResult>,
    ) {
        let symbol = Some(subscription.symbol.as_str());
        let Some(c) = decode::<Candle>(entry, symbol, results) else {
            return;
        };
        let zero = Decimal::ZERO;

        let expected_interval = subscription.params.effective_interval();
        results.extend([
            ValidationResult::check(
                Rule::CandleOpenWithinRange,
                c.low <= c.open && c.open <= c.high,
                symbol,
                format!("low={} open={} high={}", c.low, c.open, c.high),
            ),
            ValidationResult::check(
                Rule::CandleCloseWithinRange,
                c.low <= c.close && c.close <= c.high,
                symbol,
                format!("low={} close={} high={}", c.low, c.close, c.high),
            ),
            ValidationResult::check(
                Rule::CandlePricesPositive,
                [c.open, c.high, c.low, c.close].iter().all(|p| *p > zero),
                symbol,
                format!("o={} h={} l={} c={}", c.open, c.high, c.low, c.close),
            ),
            ValidationResult::check(
                Rule::CandleTradesNonNegative,
                c.trades >= 0,
                symbol,
                format!("trades={}", c.trades),
            ),
            ValidationResult::check(
                Rule::CandleVolumeNonNegative,
                c.volume >= zero,
                symbol,
                format!("volume={}", c.volume),
            ),
            ValidationResult::check(
                Rule::CandleVwapPositive,
                c.vwap > zero,
                symbol,
                format!("vwap={}", c.vwap),
            ),
            ValidationResult::check(
                Rule::CandleIntervalMatches,
                c.interval == expected_interval,
                symbol,
                format!("interval={} subscribed={expected_interval}", c.interval),
            ),
        ]);

        let emitted_text = c.timestamp.as_deref().or(message.timestamp.as_deref());
        let begin = parse_timestamp(&c.interval_begin);
        let emitted = emitted_text.and_then(parse_timestamp);

        results.push(ValidationResult::check(
            Rule::CandleTimestampsParse,
            begin.is_some() && emitted.is_some(),
            symbol,
            format!(
                "interval_begin={} timestamp={}",
                c.interval_begin,
                emitted_text.unwrap_or("<absent>")
            ),
        ));

        let (Some(begin), Some(emitted)) = (begin, emitted) else {
            return;
        };

        let elapsed = emitted - begin;
        let expected = TimeDelta::minutes(i64::from(c.interval));
        let deviation = (elapsed - expected).abs();

        results.push(ValidationResult::check(
            Rule::CandleBeginBeforeEmission,
            begin < emitted,
            symbol,
            format!("interval_begin={begin} timestamp={emitted}"),
        ));
        results.push(ValidationResult::check(
            Rule::CandleElapsedMatchesInterval,
            deviation <= self.candle_tolerance,
            symbol,
            format!(
                "elapsed={}ms expected={}ms",
                elapsed.num_milliseconds(),
                expected.num_milliseconds()
            ),
        ));
    }
}

// =============================================================================
// Ticker
// =============================================================================

fn ticker_rules(entry: &Value, symbol: &str, results: &mut Vec<ValidationResult>) {
    let symbol = Some(symbol);
    let Some(t) = decode::<Ticker>(entry, symbol, results) else {
        return;
    };
    let zero = Decimal::ZERO;

    results.extend([
        ValidationResult::check(Rule::TickerBidPositive, t.bid > zero, symbol, format!("bid={}", t.bid)),
        ValidationResult::check(Rule::TickerAskPositive, t.ask > zero, symbol, format!("ask={}", t.ask)),
        ValidationResult::check(
            Rule::TickerBidBelowAsk,
            t.bid < t.ask,
            symbol,
            format!("bid={} ask={}", t.bid, t.ask),
        ),
        ValidationResult::check(
            Rule::TickerQtyPositive,
            t.bid_qty > zero && t.ask_qty > zero,
            symbol,
            format!("bid_qty={} ask_qty={}", t.bid_qty, t.ask_qty),
        ),
        ValidationResult::check(Rule::TickerLastPositive, t.last > zero, symbol, format!("last={}", t.last)),
        ValidationResult::check(
            Rule::TickerVolumePositive,
            t.volume > zero,
            symbol,
            format!("volume={}", t.volume),
        ),
        ValidationResult::check(Rule::TickerVwapPositive, t.vwap > zero, symbol, format!("vwap={}", t.vwap)),
        ValidationResult::check(
            Rule::TickerLowNotAboveHigh,
            t.low <= t.high,
            symbol,
            format!("low={} high={}", t.low, t.high),
        ),
    ]);
}

// =============================================================================
// Book
// =============================================================================

fn book_rules(
    entry: &Value,
    kind: DataKind,
    subscription: &mut Subscription,
    results: &mut Vec<ValidationResult>,
) {
    let symbol = Some(subscription.symbol.as_str());
    let Some(set) = decode::<BookLevelSet>(entry, symbol, results) else {
        return;
    };

    let depth = subscription.params.effective_depth() as usize;
    let precision = subscription.params.checksum_precision;
    let state = &mut subscription.state;

    match kind {
        DataKind::Snapshot => {
            results.push(ValidationResult::check(
                Rule::BookLevelsPositive,
                levels_positive(&set.bids, false) && levels_positive(&set.asks, false),
                symbol,
                format!("{} bids, {} asks", set.bids.len(), set.asks.len()),
            ));

            let book = state.book.get_or_insert_with(|| OrderBookState::new(depth));
            book.apply_snapshot(&set.bids, &set.asks);
            state.snapshot_seen = true;

            integrity_rules(&set.bids, &set.asks, depth, symbol, results);
            results.push(checksum_rule(&set.bids, &set.asks, set.checksum, precision, symbol));
        }
        DataKind::Update => {
            let book = match state.book.as_mut() {
                Some(book) if state.snapshot_seen => book,
                _ => {
                    results.push(ValidationResult::fail(
                        Rule::BookUpdateWithoutSnapshot,
                        symbol,
                        "update before any snapshot",
                    ));
                    return;
                }
            };
            results.push(ValidationResult::check(
                Rule::BookUpdateWithoutSnapshot,
                true,
                symbol,
                "snapshot seen",
            ));

            results.push(ValidationResult::check(
                Rule::BookLevelsPositive,
                levels_positive(&set.bids, true) && levels_positive(&set.asks, true),
                symbol,
                format!("{} bid deltas, {} ask deltas", set.bids.len(), set.asks.len()),
            ));

            book.apply_update(&set.bids, &set.asks);
            let bids = book.bids();
            let asks = book.asks();

            integrity_rules(&bids, &asks, depth, symbol, results);
            results.push(checksum_rule(&bids, &asks, set.checksum, precision, symbol));
        }
    }
}

fn integrity_rules(
    bids: &[BookLevel],
    asks: &[BookLevel],
    depth: usize,
    symbol: Option<&str>,
    results: &mut Vec<ValidationResult>,
) {
    let best_bid = bids.first().map(|l| l.price);
    let best_ask = asks.first().map(|l| l.price);

    results.push(ValidationResult::check(
        Rule::BookNonEmpty,
        !bids.is_empty() && !asks.is_empty(),
        symbol,
        format!("{} bids, {} asks", bids.len(), asks.len()),
    ));

    let crossed = matches!((best_bid, best_ask), (Some(bid), Some(ask)) if bid >= ask);
    results.push(ValidationResult::check(
        Rule::BookNotCrossed,
        !crossed,
        symbol,
        format!("best_bid={} best_ask={}", render(best_bid), render(best_ask)),
    ));

    results.push(ordering_rule(Rule::BookBidsDescending, bids, |a, b| a > b, symbol));
    results.push(ordering_rule(Rule::BookAsksAscending, asks, |a, b| a < b, symbol));

    results.push(ValidationResult::check(
        Rule::BookDepthWithinSubscription,
        bids.len() <= depth && asks.len() <= depth,
        symbol,
        format!("bids={} asks={} depth={depth}", bids.len(), asks.len()),
    ));
}

fn ordering_rule(
    rule: Rule,
    levels: &[BookLevel],
    in_order: impl Fn(Decimal, Decimal) -> bool,
    symbol: Option<&str>,
) -> ValidationResult {
    match levels
        .windows(2)
        .position(|pair| !in_order(pair[0].price, pair[1].price))
    {
        None => ValidationResult::check(rule, true, symbol, format!("{} levels", levels.len())),
        Some(i) => ValidationResult::fail(
            rule,
            symbol,
            format!(
                "level {i}: {} then {}",
                levels[i].price,
                levels[i + 1].price
            ),
        ),
    }
}

fn checksum_rule(
    bids: &[BookLevel],
    asks: &[BookLevel],
    declared: u32,
    precision: Option<ChecksumPrecision>,
    symbol: Option<&str>,
) -> ValidationResult {
    let computed = compute_checksum(bids, asks, precision);
    ValidationResult::check(
        Rule::BookChecksum,
        computed == declared,
        symbol,
        format!("computed={computed} declared={declared}"),
    )
}

fn levels_positive(levels: &[BookLevel], allow_zero_qty: bool) -> bool {
    levels.iter().all(|l| {
        l.price > Decimal::ZERO
            && if allow_zero_qty {
                l.qty >= Decimal::ZERO
            } else {
                l.qty > Decimal::ZERO
            }
    })
}

fn render(value: Option<Decimal>) -> String {
    value.map_or_else(|| "none".to_string(), |v| v.to_string())
}

// =============================================================================
// Trade
// =============================================================================

fn trade_rules(entry: &Value, subscription: &mut Subscription, results: &mut Vec<ValidationResult>) {
    let symbol = Some(subscription.symbol.as_str());

    let side = entry.get("side").cloned().unwrap_or(Value::Null);
    results.push(ValidationResult::check(
        Rule::TradeSideValid,
        serde_json::from_value::<Side>(side.clone()).is_ok(),
        symbol,
        format!("side={side}"),
    ));
    let ord_type = entry.get("ord_type").cloned().unwrap_or(Value::Null);
    results.push(ValidationResult::check(
        Rule::TradeOrderTypeValid,
        serde_json::from_value::<OrderType>(ord_type.clone()).is_ok(),
        symbol,
        format!("ord_type={ord_type}"),
    ));

    let Some(t) = decode::<Trade>(entry, symbol, results) else {
        return;
    };
    let zero = Decimal::ZERO;

    results.push(ValidationResult::check(
        Rule::TradeQtyPositive,
        t.qty > zero,
        symbol,
        format!("qty={}", t.qty),
    ));
    results.push(ValidationResult::check(
        Rule::TradePricePositive,
        t.price > zero,
        symbol,
        format!("price={}", t.price),
    ));
    results.push(ValidationResult::check(
        Rule::TradeIdPositive,
        t.trade_id > 0,
        symbol,
        format!("trade_id={}", t.trade_id),
    ));

    let state = &mut subscription.state;
    let previous = state.last_trade_id;
    results.push(ValidationResult::check(
        Rule::TradeIdMonotonic,
        previous.is_none_or(|p| t.trade_id >= p),
        symbol,
        format!(
            "trade_id={} previous={}",
            t.trade_id,
            previous.map_or_else(|| "none".to_string(), |p| p.to_string())
        ),
    ));
    state.last_trade_id = Some(previous.map_or(t.trade_id, |p| p.max(t.trade_id)));

    results.push(ValidationResult::check(
        Rule::TradeTimestampValid,
        parse_timestamp(&t.timestamp).is_some(),
        symbol,
        format!("timestamp={}", t.timestamp),
    ));
}

// =============================================================================
// Helpers
// =============================================================================

fn decode<T: DeserializeOwned>(
    entry: &Value,
    symbol: Option<&str>,
    results: &mut Vec<ValidationResult>,
) -> Option<T> {
    match serde_json::from_value::<T>(entry.clone()) {
        Ok(value) => {
            results.push(ValidationResult::check(Rule::EntryDecodes, true, symbol, "decoded"));
            Some(value)
        }
        Err(e) => {
            results.push(ValidationResult::fail(Rule::EntryDecodes, symbol, e.to_string()));
            None
        }
    }
}

/// Parse an RFC 3339 timestamp into UTC.
#[must_use]
pub fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}
