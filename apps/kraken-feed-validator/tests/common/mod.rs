//! Local Kraken-like WebSocket feed for integration tests.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use rust_decimal::Decimal;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

use kraken_feed_validator::domain::market::BookLevel;
use kraken_feed_validator::{SessionConfig, TimeoutPolicy, compute_checksum};

/// Symbol the feed rejects.
pub const UNKNOWN_SYMBOL: &str = "FAKE/COIN";

/// A frame the feed sends back.
#[derive(Debug, Clone)]
pub enum Reply {
    /// Text frame.
    Text(String),
    /// Binary frame.
    Binary(Vec<u8>),
    /// Close the connection.
    Close,
}

impl From<Value> for Reply {
    fn from(value: Value) -> Self {
        Self::Text(value.to_string())
    }
}

type Responder = Arc<dyn Fn(&Value) -> Vec<Reply> + Send + Sync>;

/// A running mock feed. Aborted on drop.
pub struct MockFeed {
    /// `ws://` URL of the feed.
    pub url: String,
    received: Arc<Mutex<Vec<Value>>>,
    connections: Arc<AtomicUsize>,
    task: JoinHandle<()>,
}

impl MockFeed {
    /// Start a feed that answers every request with `responder`.
    pub async fn start<F>(responder: F) -> Self
    where
        F: Fn(&Value) -> Vec<Reply> + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let received = Arc::new(Mutex::new(Vec::new()));
        let connections = Arc::new(AtomicUsize::new(0));
        let responder: Responder = Arc::new(responder);

        let task = {
            let received = Arc::clone(&received);
            let connections = Arc::clone(&connections);
            tokio::spawn(async move {
                while let Ok((stream, _)) = listener.accept().await {
                    connections.fetch_add(1, Ordering::SeqCst);
                    let received = Arc::clone(&received);
                    let responder = Arc::clone(&responder);
                    tokio::spawn(async move {
                        let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await else {
                            return;
                        };
                        let greeting = status_frame().to_string();
                        if ws.send(Message::Text(greeting.into())).await.is_err() {
                            return;
                        }
                        while let Some(Ok(message)) = ws.next().await {
                            let Message::Text(text) = message else {
                                continue;
                            };
                            let request: Value = serde_json::from_str(text.as_str()).unwrap();
                            received.lock().unwrap().push(request.clone());
                            for reply in responder(&request) {
                                match reply {
                                    Reply::Text(text) => {
                                        if ws.send(Message::Text(text.into())).await.is_err() {
                                            return;
                                        }
                                    }
                                    Reply::Binary(bytes) => {
                                        if ws.send(Message::Binary(bytes.into())).await.is_err() {
                                            return;
                                        }
                                    }
                                    Reply::Close => {
                                        let _ = ws.close(None).await;
                                        return;
                                    }
                                }
                            }
                        }
                    });
                }
            })
        };

        Self {
            url: format!("ws://{addr}"),
            received,
            connections,
            task,
        }
    }

    /// Start a feed that behaves like the live exchange.
    pub async fn kraken() -> Self {
        Self::start(kraken_responses).await
    }

    /// Requests received so far, across all connections.
    pub fn received(&self) -> Vec<Value> {
        self.received.lock().unwrap().clone()
    }

    /// Connections accepted so far.
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Session configuration pointing at this feed with short waits.
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            endpoint: self.url.clone(),
            timeouts: short_timeouts(),
            ..SessionConfig::default()
        }
    }
}

impl Drop for MockFeed {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Wait bounds short enough for tests.
pub fn short_timeouts() -> TimeoutPolicy {
    TimeoutPolicy {
        fast_channel: Duration::from_secs(2),
        book: Duration::from_secs(2),
        candle_grace: Duration::from_secs(2),
        ack: Duration::from_millis(500),
        unsubscribe: Duration::from_millis(500),
        connect: Duration::from_secs(2),
        ..TimeoutPolicy::default()
    }
}

// =============================================================================
// Exchange behavior
// =============================================================================

/// Answer a request the way the exchange does: acknowledge, then push data.
pub fn kraken_responses(request: &Value) -> Vec<Reply> {
    let method = request["method"].as_str().unwrap_or_default();
    let req_id = request["req_id"].as_u64();
    let params = &request["params"];
    let channel = params["channel"].as_str().unwrap_or_default();
    let symbols: Vec<&str> = params["symbol"]
        .as_array()
        .map(|a| a.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    match method {
        "ping" => vec![json!({"method": "pong", "req_id": req_id, "time_in": "2024-05-01T12:00:00.000000Z", "time_out": "2024-05-01T12:00:00.000100Z"}).into()],
        "unsubscribe" => symbols
            .iter()
            .map(|symbol| ack("unsubscribe", channel, symbol, req_id).into())
            .collect(),
        "subscribe" => {
            let mut replies = Vec::new();
            for symbol in symbols {
                if symbol == UNKNOWN_SYMBOL {
                    replies.push(reject(symbol, req_id).into());
                    continue;
                }
                replies.push(ack("subscribe", channel, symbol, req_id).into());
                replies.extend(data_for(channel, symbol, params).into_iter().map(Reply::from));
            }
            replies
        }
        _ => vec![json!({"error": format!("Method not found: {method}"), "success": false, "req_id": req_id}).into()],
    }
}

fn data_for(channel: &str, symbol: &str, params: &Value) -> Vec<Value> {
    let snapshot = params["snapshot"].as_bool();
    match channel {
        "ticker" => {
            let mut frames = Vec::new();
            if snapshot != Some(false) {
                frames.push(ticker_frame("snapshot", symbol, 64_000));
            }
            frames.extend((1..=3).map(|i| ticker_frame("update", symbol, 64_000 + i)));
            frames
        }
        "book" => {
            let depth = params["depth"].as_u64().unwrap_or(10);
            vec![book_snapshot(symbol, usize::try_from(depth).unwrap())]
        }
        "ohlc" => {
            let interval = params["interval"].as_u64().unwrap_or(1);
            vec![candle_frame(symbol, interval)]
        }
        "trade" => (1..=3).map(|i| trade_frame(symbol, 1_000 + i)).collect(),
        _ => Vec::new(),
    }
}

// =============================================================================
// Frames
// =============================================================================

pub fn status_frame() -> Value {
    json!({
        "channel": "status",
        "type": "update",
        "data": [{"api_version": "v2", "connection_id": 1, "system": "online", "version": "2.0.0"}]
    })
}

pub fn ack(method: &str, channel: &str, symbol: &str, req_id: Option<u64>) -> Value {
    json!({
        "method": method,
        "result": {"channel": channel, "symbol": symbol},
        "success": true,
        "time_in": "2024-05-01T12:00:00.000000Z",
        "time_out": "2024-05-01T12:00:00.000100Z",
        "req_id": req_id
    })
}

pub fn reject(symbol: &str, req_id: Option<u64>) -> Value {
    json!({
        "method": "subscribe",
        "error": format!("Currency pair not supported {symbol}"),
        "success": false,
        "symbol": symbol,
        "req_id": req_id
    })
}

pub fn ticker_frame(kind: &str, symbol: &str, bid: i64) -> Value {
    json!({
        "channel": "ticker",
        "type": kind,
        "data": [{
            "symbol": symbol,
            "bid": bid, "bid_qty": 1.5,
            "ask": bid + 1, "ask_qty": 0.25,
            "last": bid, "volume": 1234.5, "vwap": 63_500,
            "low": 62_000, "high": 65_000,
            "change": 100, "change_pct": 0.16
        }]
    })
}

pub fn trade_frame(symbol: &str, trade_id: u64) -> Value {
    json!({
        "channel": "trade",
        "type": "update",
        "data": [{
            "symbol": symbol, "side": "buy", "price": 64_000, "qty": 0.1,
            "ord_type": "market", "trade_id": trade_id,
            "timestamp": "2024-05-01T12:00:00.000000Z"
        }]
    })
}

pub fn candle_frame(symbol: &str, interval: u64) -> Value {
    let begin = chrono::DateTime::parse_from_rfc3339("2024-05-01T12:00:00Z").unwrap();
    let emitted = begin + chrono::TimeDelta::seconds(i64::try_from(interval * 60).unwrap())
        + chrono::TimeDelta::milliseconds(400);
    json!({
        "channel": "ohlc",
        "type": "snapshot",
        "data": [{
            "symbol": symbol,
            "open": 100, "high": 110, "low": 95, "close": 105,
            "trades": 12, "volume": 3.5, "vwap": 102,
            "interval_begin": begin.to_rfc3339_opts(chrono::SecondsFormat::Micros, true),
            "interval": interval,
            "timestamp": emitted.to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
        }]
    })
}

/// Whole-number levels around a 2500 mid, `depth` per side, with a valid checksum.
pub fn book_levels(depth: usize) -> (Vec<BookLevel>, Vec<BookLevel>) {
    let level = |price: i64, qty: i64| BookLevel::new(Decimal::from(price), Decimal::from(qty));
    let step = |i: usize| i64::try_from(i).unwrap();
    let bids = (0..depth).map(|i| level(2_500 - step(i), 1 + step(i))).collect();
    let asks = (0..depth).map(|i| level(2_501 + step(i), 2 + step(i))).collect();
    (bids, asks)
}

pub fn levels_json(levels: &[BookLevel]) -> Value {
    Value::Array(
        levels
            .iter()
            .map(|l| {
                let price: serde_json::Number = l.price.to_string().parse().unwrap();
                let qty: serde_json::Number = l.qty.to_string().parse().unwrap();
                json!({"price": price, "qty": qty})
            })
            .collect(),
    )
}

pub fn book_snapshot(symbol: &str, depth: usize) -> Value {
    let (bids, asks) = book_levels(depth);
    book_frame("snapshot", symbol, &bids, &asks, compute_checksum(&bids, &asks, None))
}

pub fn book_frame(
    kind: &str,
    symbol: &str,
    bids: &[BookLevel],
    asks: &[BookLevel],
    checksum: u32,
) -> Value {
    json!({
        "channel": "book",
        "type": kind,
        "data": [{
            "symbol": symbol,
            "bids": levels_json(bids),
            "asks": levels_json(asks),
            "checksum": checksum
        }]
    })
}
