//! Domain Layer - Market data types, subscriptions and validation rules.
//!
//! Pure logic with no I/O: everything here can be exercised from a unit
//! test without a socket.

/// Channels and typed data payloads (ticker, book, candles, trades).
pub mod market;

/// Order book reconstruction from snapshot and deltas.
pub mod order_book;

/// Per-connection subscription registry and stream state.
pub mod subscription;

/// Schema and semantic validation, order book checksum.
pub mod validation;
