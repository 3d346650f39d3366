//! Validation Rule Integration Tests
//!
//! Schema and semantic validation through the public API, without a socket.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use rust_decimal::Decimal;
use serde_json::{Value, json};
use test_case::test_case;

use kraken_feed_validator::domain::market::BookLevel;
use kraken_feed_validator::domain::subscription::AckStatus;
use kraken_feed_validator::{
    Channel, DataKind, DataMessage, Rule, SchemaRegistry, SemanticValidator, SubscriptionParams,
    SubscriptionRegistry, ValidationResult, compute_checksum,
};

fn message(channel: Channel, kind: DataKind, data: Value) -> DataMessage {
    DataMessage {
        channel,
        kind,
        frame: json!({"channel": channel.as_str(), "type": kind.as_str(), "data": data}),
        timestamp: None,
    }
}

fn confirmed(channel: Channel, symbol: &str, params: SubscriptionParams) -> SubscriptionRegistry {
    let mut registry = SubscriptionRegistry::new();
    let _handle = registry.register(channel, vec![symbol.to_string()], params, 1);
    registry.ack(channel, symbol, AckStatus::Confirmed);
    registry
}

fn failed(results: &[ValidationResult]) -> Vec<&'static str> {
    results.iter().filter(|r| !r.passed).map(|r| r.rule.id()).collect()
}

/// Overwrite fields of the first entry.
fn patched(mut data: Value, fields: &Value) -> Value {
    if let (Some(entry), Some(fields)) = (data[0].as_object_mut(), fields.as_object()) {
        for (key, value) in fields {
            entry.insert(key.clone(), value.clone());
        }
    }
    data
}

fn ticker(bid: f64, ask: f64, low: f64, high: f64) -> Value {
    json!([{
        "symbol": "BTC/USD", "bid": bid, "bid_qty": 1.0, "ask": ask, "ask_qty": 1.0,
        "last": 64000.5, "volume": 10.0, "vwap": 63900.0, "low": low, "high": high
    }])
}

// =============================================================================
// Ticker
// =============================================================================

#[test_case(ticker(64000.0, 64001.0, 63000.0, 65000.0), &[] ; "healthy quote")]
#[test_case(ticker(64001.0, 64000.0, 63000.0, 65000.0), &["ticker.bid_below_ask"] ; "inverted spread")]
#[test_case(ticker(64000.0, 64000.0, 63000.0, 65000.0), &["ticker.bid_below_ask"] ; "locked spread")]
#[test_case(ticker(0.0, 64001.0, 63000.0, 65000.0), &["ticker.bid_positive"] ; "zero bid")]
#[test_case(ticker(64000.0, 64001.0, 66000.0, 65000.0), &["ticker.low_not_above_high"] ; "low above high")]
#[test_case(patched(ticker(64000.0, 64001.0, 63000.0, 65000.0), &json!({"bid_qty": 0.0})), &["ticker.qty_positive"] ; "zero bid qty")]
fn ticker_rules(data: Value, expected: &[&str]) {
    let mut registry = confirmed(Channel::Ticker, "BTC/USD", SubscriptionParams::default());
    let msg = message(Channel::Ticker, DataKind::Snapshot, data);

    let results = SemanticValidator::default().validate_semantics(&msg, &mut registry);
    assert_eq!(failed(&results), expected);
}

// =============================================================================
// Trade
// =============================================================================

fn trade(id: i64, side: &str) -> Value {
    json!([{
        "symbol": "BTC/USD", "side": side, "price": 64000.0, "qty": 0.5,
        "ord_type": "limit", "trade_id": id, "timestamp": "2024-05-01T12:00:00.000000Z"
    }])
}

#[test_case(&[1, 2, 3], &[] ; "increasing")]
#[test_case(&[5, 5], &[] ; "repeated id")]
#[test_case(&[10, 9], &["trade.id_monotonic"] ; "decreasing")]
fn trade_ids_never_decrease(ids: &[i64], expected: &[&str]) {
    let mut registry = confirmed(Channel::Trade, "BTC/USD", SubscriptionParams::default());
    let validator = SemanticValidator::default();

    let mut failures = Vec::new();
    for &id in ids {
        let msg = message(Channel::Trade, DataKind::Update, trade(id, "buy"));
        failures.extend(failed(&validator.validate_semantics(&msg, &mut registry)));
    }
    assert_eq!(failures, expected);
}

#[test_case(json!({"ord_type": "stop"}), &["trade.ord_type_valid", "stream.entry_decodes"] ; "unknown order type")]
#[test_case(json!({"qty": 0.0}), &["trade.qty_positive"] ; "zero qty")]
#[test_case(json!({"price": -1.0}), &["trade.price_positive"] ; "negative price")]
#[test_case(json!({"trade_id": 0}), &["trade.id_positive"] ; "zero id")]
#[test_case(json!({"timestamp": "yesterday"}), &["trade.timestamp_valid"] ; "unparseable timestamp")]
fn trade_field_rules(fields: Value, expected: &[&str]) {
    let mut registry = confirmed(Channel::Trade, "BTC/USD", SubscriptionParams::default());
    let msg = message(Channel::Trade, DataKind::Update, patched(trade(1, "buy"), &fields));

    let results = SemanticValidator::default().validate_semantics(&msg, &mut registry);
    assert_eq!(failed(&results), expected);
}

#[test]
fn trade_side_outside_buy_and_sell_fails_both_validators() {
    let mut registry = confirmed(Channel::Trade, "BTC/USD", SubscriptionParams::default());
    let msg = message(Channel::Trade, DataKind::Update, trade(1, "hold"));

    let schema = SchemaRegistry::builtin().unwrap();
    assert!(schema.validate_schema(Channel::Trade, &msg.frame).is_err());

    let results = SemanticValidator::default().validate_semantics(&msg, &mut registry);
    assert_eq!(failed(&results), vec!["trade.side_valid", "stream.entry_decodes"]);
}

// =============================================================================
// Candles
// =============================================================================

fn candle(begin: &str, emitted: &str) -> Value {
    json!([{
        "symbol": "BTC/USD", "open": 100.0, "high": 110.0, "low": 95.0, "close": 105.0,
        "trades": 3, "volume": 1.5, "vwap": 101.0,
        "interval_begin": begin, "interval": 5, "timestamp": emitted
    }])
}

#[test_case("2024-05-01T12:05:00.000000Z", &[] ; "exact")]
#[test_case("2024-05-01T12:05:00.999000Z", &[] ; "inside tolerance")]
#[test_case("2024-05-01T12:05:01.500000Z", &["ohlc.elapsed_matches_interval"] ; "late")]
#[test_case("2024-05-01T12:04:58.000000Z", &["ohlc.elapsed_matches_interval"] ; "early")]
fn candle_elapsed_matches_interval(emitted: &str, expected: &[&str]) {
    let mut registry = confirmed(
        Channel::Candles,
        "BTC/USD",
        SubscriptionParams::default().with_interval(5),
    );
    let msg = message(
        Channel::Candles,
        DataKind::Snapshot,
        candle("2024-05-01T12:00:00.000000Z", emitted),
    );

    let results = SemanticValidator::default().validate_semantics(&msg, &mut registry);
    assert_eq!(failed(&results), expected);
}

const BEGIN: &str = "2024-05-01T12:00:00.000000Z";
const ON_TIME: &str = "2024-05-01T12:05:00.000000Z";

#[test_case(json!({"open": 120.0}), &["ohlc.open_within_range"] ; "open above high")]
#[test_case(json!({"close": 90.0}), &["ohlc.close_within_range"] ; "close below low")]
#[test_case(json!({"low": 0.0}), &["ohlc.prices_positive"] ; "zero low")]
#[test_case(json!({"vwap": 0.0}), &["ohlc.vwap_positive"] ; "zero vwap")]
#[test_case(
    json!({"interval_begin": ON_TIME, "timestamp": BEGIN}),
    &["ohlc.begin_before_emission", "ohlc.elapsed_matches_interval"] ;
    "begin after emission"
)]
#[test_case(
    json!({"open": 120.0, "close": 90.0, "vwap": 0.0}),
    &["ohlc.open_within_range", "ohlc.close_within_range", "ohlc.vwap_positive"] ;
    "every violation reported"
)]
fn candle_field_rules(fields: Value, expected: &[&str]) {
    let mut registry = confirmed(
        Channel::Candles,
        "BTC/USD",
        SubscriptionParams::default().with_interval(5),
    );
    let msg = message(
        Channel::Candles,
        DataKind::Snapshot,
        patched(candle(BEGIN, ON_TIME), &fields),
    );

    let results = SemanticValidator::default().validate_semantics(&msg, &mut registry);
    assert_eq!(failed(&results), expected);
}

// =============================================================================
// Book
// =============================================================================

fn book_snapshot(bids: &[(i64, i64)], asks: &[(i64, i64)]) -> Value {
    let levels = |side: &[(i64, i64)]| -> Vec<BookLevel> {
        side.iter()
            .map(|&(price, qty)| BookLevel::new(Decimal::from(price), Decimal::from(qty)))
            .collect()
    };
    let to_json = |side: &[(i64, i64)]| -> Value {
        side.iter()
            .map(|&(price, qty)| json!({"price": price, "qty": qty}))
            .collect()
    };
    let checksum = compute_checksum(&levels(bids), &levels(asks), None);
    json!([{"symbol": "ETH/USD", "bids": to_json(bids), "asks": to_json(asks), "checksum": checksum}])
}

#[test_case(&[(100, 1), (99, 2)], &[(101, 1), (102, 2)], &[] ; "healthy")]
#[test_case(&[(99, 1)], &[(101, 1), (100, 1)], &["book.asks_ascending"] ; "asks out of order")]
#[test_case(&[(100, 1), (0, 1)], &[(101, 1)], &["book.levels_positive"] ; "zero price")]
#[test_case(&[(100, 0)], &[(101, 1)], &["book.levels_positive"] ; "zero qty in snapshot")]
fn book_snapshot_rules(bids: &[(i64, i64)], asks: &[(i64, i64)], expected: &[&str]) {
    let mut registry = confirmed(Channel::Book, "ETH/USD", SubscriptionParams::default());
    let msg = message(Channel::Book, DataKind::Snapshot, book_snapshot(bids, asks));

    let results = SemanticValidator::default().validate_semantics(&msg, &mut registry);
    assert_eq!(failed(&results), expected);
}

// =============================================================================
// Stream rules and schema
// =============================================================================

#[test]
fn update_before_snapshot_is_flagged() {
    let mut registry = confirmed(Channel::Ticker, "BTC/USD", SubscriptionParams::default());
    let msg = message(
        Channel::Ticker,
        DataKind::Update,
        ticker(64000.0, 64001.0, 63000.0, 65000.0),
    );

    let results = SemanticValidator::default().validate_semantics(&msg, &mut registry);
    assert_eq!(failed(&results), vec!["stream.snapshot_first"]);
}

#[test]
fn data_for_unsubscribed_symbol_is_flagged() {
    let mut registry = confirmed(Channel::Ticker, "ETH/USD", SubscriptionParams::default());
    let msg = message(
        Channel::Ticker,
        DataKind::Snapshot,
        ticker(64000.0, 64001.0, 63000.0, 65000.0),
    );

    let results = SemanticValidator::default().validate_semantics(&msg, &mut registry);
    assert_eq!(failed(&results), vec!["stream.symbol_subscribed"]);
    assert!(results.iter().all(|r| r.rule == Rule::SymbolSubscribed));
}

#[test]
fn schema_and_semantic_outcomes_are_independent() {
    let schemas = SchemaRegistry::builtin().unwrap();
    let mut registry = confirmed(Channel::Ticker, "BTC/USD", SubscriptionParams::default());
    let msg = message(
        Channel::Ticker,
        DataKind::Snapshot,
        ticker(64001.0, 64000.0, 63000.0, 65000.0),
    );

    assert!(schemas.validate_schema(Channel::Ticker, &msg.frame).is_ok());
    let results = SemanticValidator::default().validate_semantics(&msg, &mut registry);
    assert_eq!(failed(&results), vec!["ticker.bid_below_ask"]);
}

#[test_case(json!({"channel": "ticker", "type": "snapshot"}) ; "missing data")]
#[test_case(json!({"channel": "ticker", "type": "snapshot", "data": [{"symbol": "BTC/USD", "bid": "64000"}]}) ; "string price")]
#[test_case(json!({"channel": "ticker", "type": "delta", "data": []}) ; "unknown type")]
fn malformed_ticker_frames_violate_schema(frame: Value) {
    let schemas = SchemaRegistry::builtin().unwrap();
    assert!(schemas.validate_schema(Channel::Ticker, &frame).is_err());
}
