//! Timeout Policy
//!
//! How long a caller waits for each class of expected message, and the
//! deadline arithmetic behind every bounded wait.
//!
//! # Defaults
//!
//! | Wait                          | Bound                                  |
//! |-------------------------------|----------------------------------------|
//! | ticker, trade data            | 30s                                    |
//! | book data                     | 30s                                    |
//! | candle data                   | max(60s, interval x 60s + 30s grace)   |
//! | subscribe acknowledgment      | 10s                                    |
//! | unsubscribe confirmation      | 10s                                    |
//! | connect handshake             | 10s                                    |
//!
//! A candle cannot close before its interval elapses, so its bound scales
//! with the subscribed interval.

use std::collections::HashSet;
use std::time::Duration;

use tokio::time::Instant;

use crate::domain::market::Channel;
use crate::domain::subscription::SubscriptionParams;

/// Floor for candle waits.
pub const CANDLE_FLOOR: Duration = Duration::from_secs(60);

/// Per-interaction wait bounds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeoutPolicy {
    /// Bound for ticker and trade data.
    pub fast_channel: Duration,
    /// Bound for book data.
    pub book: Duration,
    /// Added to the candle interval.
    pub candle_grace: Duration,
    /// Bound for a subscribe acknowledgment.
    pub ack: Duration,
    /// Bound for an unsubscribe confirmation.
    pub unsubscribe: Duration,
    /// Bound for the connect handshake.
    pub connect: Duration,
    /// Channels on which an unsubscribe confirmation timeout is acceptable.
    pub unsubscribe_tolerant: HashSet<Channel>,
}

impl Default for TimeoutPolicy {
    fn default() -> Self {
        Self {
            fast_channel: Duration::from_secs(30),
            book: Duration::from_secs(30),
            candle_grace: Duration::from_secs(30),
            ack: Duration::from_secs(10),
            unsubscribe: Duration::from_secs(10),
            connect: Duration::from_secs(10),
            unsubscribe_tolerant: [Channel::Book, Channel::Candles, Channel::Trade]
                .into_iter()
                .collect(),
        }
    }
}

impl TimeoutPolicy {
    /// Bound for the next data message on a subscription.
    #[must_use]
    pub fn for_channel(&self, channel: Channel, params: &SubscriptionParams) -> Duration {
        match channel {
            Channel::Ticker | Channel::Trade => self.fast_channel,
            Channel::Book => self.book,
            Channel::Candles => {
                let interval = Duration::from_secs(u64::from(params.effective_interval()) * 60);
                CANDLE_FLOOR.max(interval + self.candle_grace)
            }
        }
    }

    /// Whether an unsubscribe confirmation timeout is acceptable on a channel.
    #[must_use]
    pub fn tolerates_unsubscribe_timeout(&self, channel: Channel) -> bool {
        self.unsubscribe_tolerant.contains(&channel)
    }
}

/// A fixed point in time a wait must finish by.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    started: Instant,
    budget: Duration,
}

impl Deadline {
    /// Start a deadline `budget` from now.
    #[must_use]
    pub fn after(budget: Duration) -> Self {
        Self {
            started: Instant::now(),
            budget,
        }
    }

    /// Time left, or `None` once the budget is spent.
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        self.budget
            .checked_sub(self.started.elapsed())
            .filter(|left| !left.is_zero())
    }

    /// Time since the deadline was started.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Whether the budget is spent.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.remaining().is_none()
    }
}
