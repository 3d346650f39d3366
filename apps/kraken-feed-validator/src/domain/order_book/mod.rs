//! Order Book Reconstruction
//!
//! Rebuilds the local view of a single instrument's book from a snapshot
//! followed by deltas, so that updates can be validated against the state
//! they modify.
//!
//! # Delta semantics
//!
//! - A level with `qty == 0` removes the price.
//! - Any other level inserts or replaces the price.
//! - After each update both sides are truncated to the subscribed depth,
//!   dropping the levels furthest from the top of book.

use std::collections::BTreeMap;

use rust_decimal::Decimal;

use crate::domain::market::BookLevel;

/// Reconstructed order book for one (book, symbol) subscription.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrderBookState {
    bids: BTreeMap<Decimal, Decimal>,
    asks: BTreeMap<Decimal, Decimal>,
    depth: usize,
}

impl OrderBookState {
    /// Create an empty book bounded to `depth` levels per side.
    #[must_use]
    pub fn new(depth: usize) -> Self {
        Self {
            bids: BTreeMap::new(),
            asks: BTreeMap::new(),
            depth,
        }
    }

    /// Replace the book with a snapshot.
    pub fn apply_snapshot(&mut self, bids: &[BookLevel], asks: &[BookLevel]) {
        self.bids = bids.iter().map(|l| (l.price, l.qty)).collect();
        self.asks = asks.iter().map(|l| (l.price, l.qty)).collect();
        self.truncate();
    }

    /// Apply a delta update.
    pub fn apply_update(&mut self, bids: &[BookLevel], asks: &[BookLevel]) {
        for level in bids {
            apply_level(&mut self.bids, level);
        }
        for level in asks {
            apply_level(&mut self.asks, level);
        }
        self.truncate();
    }

    /// Bid levels, best (highest) first.
    #[must_use]
    pub fn bids(&self) -> Vec<BookLevel> {
        self.bids
            .iter()
            .rev()
            .map(|(p, q)| BookLevel::new(*p, *q))
            .collect()
    }

    /// Ask levels, best (lowest) first.
    #[must_use]
    pub fn asks(&self) -> Vec<BookLevel> {
        self.asks
            .iter()
            .map(|(p, q)| BookLevel::new(*p, *q))
            .collect()
    }

    /// Best bid price.
    #[must_use]
    pub fn best_bid(&self) -> Option<Decimal> {
        self.bids.keys().next_back().copied()
    }

    /// Best ask price.
    #[must_use]
    pub fn best_ask(&self) -> Option<Decimal> {
        self.asks.keys().next().copied()
    }

    /// Number of bid levels.
    #[must_use]
    pub fn bid_depth(&self) -> usize {
        self.bids.len()
    }

    /// Number of ask levels.
    #[must_use]
    pub fn ask_depth(&self) -> usize {
        self.asks.len()
    }

    /// Subscribed depth bound.
    #[must_use]
    pub const fn depth(&self) -> usize {
        self.depth
    }

    fn truncate(&mut self) {
        if self.depth == 0 {
            return;
        }
        while self.bids.len() > self.depth {
            // Worst bid is the lowest price.
            self.bids.pop_first();
        }
        while self.asks.len() > self.depth {
            self.asks.pop_last();
        }
    }
}

fn apply_level(side: &mut BTreeMap<Decimal, Decimal>, level: &BookLevel) {
    if level.qty.is_zero() {
        side.remove(&level.price);
    } else {
        side.insert(level.price, level.qty);
    }
}
