//! Validation Scenarios
//!
//! Each scenario opens its own subscriptions on a session, samples the feed,
//! and turns what it saw into a [`Verdict`]:
//!
//! | Scenario                       | Checks                                                   |
//! |--------------------------------|----------------------------------------------------------|
//! | `ticker_snapshot_then_updates` | BTC/USD snapshot first, then updates for the same symbol |
//! | `book_depth`                   | ETH/USD depth 25: 25 levels per side, integrity rules    |
//! | `invalid_symbol`               | FAKE/COIN is rejected and never produces data            |
//! | `candle_interval`              | interval 5: candles span 300s within tolerance           |
//! | `trade_sequence`               | trade ids never decrease                                 |
//! | `resubscribe`                  | unsubscribe then subscribe yields a fresh subscription   |
//!
//! Every schema violation and failed rule on a sampled message fails the
//! scenario. A critical failure (crossed book) stops it immediately. A quiet
//! feed that produces too few messages is inconclusive, not a failure.

use std::fmt;
use std::time::Duration;

use crate::domain::market::{Channel, DataKind, Payload, Symbol};
use crate::domain::subscription::{AckState, SubscriptionHandle, SubscriptionParams};
use crate::infrastructure::kraken::session::{
    AckOutcome, Awaited, Observed, SessionError, StreamEvent, StreamSession, UnsubscribeOutcome,
    ValidatedMessage,
};

/// Messages sampled per subscription by default.
pub const DEFAULT_SAMPLES: usize = 3;

const TICKER_SYMBOL: &str = "BTC/USD";
const BOOK_SYMBOL: &str = "ETH/USD";
const BOOK_DEPTH: u32 = 25;
const INVALID_SYMBOL: &str = "FAKE/COIN";
const CANDLE_INTERVAL: u32 = 5;

// =============================================================================
// Types
// =============================================================================

/// A named validation scenario.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scenario {
    /// Ticker snapshot followed by updates.
    TickerSnapshotThenUpdates,
    /// Book depth and integrity.
    BookDepth,
    /// Rejection of an unknown symbol.
    InvalidSymbol,
    /// Candle interval timing.
    CandleInterval,
    /// Trade id ordering.
    TradeSequence,
    /// Unsubscribe then resubscribe.
    Resubscribe,
}

impl Scenario {
    /// Every scenario, in run order.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[
            Self::TickerSnapshotThenUpdates,
            Self::BookDepth,
            Self::InvalidSymbol,
            Self::CandleInterval,
            Self::TradeSequence,
            Self::Resubscribe,
        ]
    }

    /// Scenario name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::TickerSnapshotThenUpdates => "ticker_snapshot_then_updates",
            Self::BookDepth => "book_depth",
            Self::InvalidSymbol => "invalid_symbol",
            Self::CandleInterval => "candle_interval",
            Self::TradeSequence => "trade_sequence",
            Self::Resubscribe => "resubscribe",
        }
    }

    /// Look up a scenario by name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::all().iter().copied().find(|s| s.name() == name)
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Outcome of a scenario.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Every check held.
    Passed,
    /// One or more checks failed.
    Failed(Vec<String>),
    /// The feed did not produce enough to decide.
    Inconclusive(String),
}

impl Verdict {
    /// Whether the verdict is a failure.
    #[must_use]
    pub const fn is_failure(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

/// Result of one scenario run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScenarioReport {
    /// Scenario run.
    pub scenario: Scenario,
    /// Outcome.
    pub verdict: Verdict,
    /// Data messages validated while the scenario ran.
    pub messages_validated: usize,
}

impl fmt::Display for ScenarioReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.verdict {
            Verdict::Passed => write!(
                f,
                "PASS {} ({} messages)",
                self.scenario, self.messages_validated
            ),
            Verdict::Inconclusive(reason) => write!(f, "INCONCLUSIVE {}: {reason}", self.scenario),
            Verdict::Failed(reasons) => {
                write!(f, "FAIL {}", self.scenario)?;
                for reason in reasons {
                    write!(f, "\n  - {reason}")?;
                }
                Ok(())
            }
        }
    }
}

/// A scenario name that does not exist.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown scenario {0:?}")]
pub struct UnknownScenario(pub String);

// =============================================================================
// Findings
// =============================================================================

#[derive(Debug, Default)]
struct Findings {
    failures: Vec<String>,
    inconclusive: Option<String>,
    critical: bool,
    messages: usize,
}

impl Findings {
    fn fail(&mut self, reason: impl Into<String>) {
        self.failures.push(reason.into());
    }

    fn require(&mut self, condition: bool, reason: impl FnOnce() -> String) {
        if !condition {
            self.failures.push(reason());
        }
    }

    fn inconclusive(&mut self, reason: impl Into<String>) {
        self.inconclusive.get_or_insert_with(|| reason.into());
    }

    fn absorb(&mut self, validated: &ValidatedMessage) {
        self.messages += 1;
        if let Err(violation) = &validated.validation.schema {
            self.fail(format!(
                "{} {} schema: {violation}",
                validated.message.channel,
                validated.message.kind.as_str()
            ));
        }
        for failure in validated.validation.failures() {
            self.fail(failure.to_string());
        }
        if validated.validation.has_critical_failure() {
            self.critical = true;
        }
    }

    fn report(self, scenario: Scenario) -> ScenarioReport {
        let verdict = if !self.failures.is_empty() {
            Verdict::Failed(self.failures)
        } else if let Some(reason) = self.inconclusive {
            Verdict::Inconclusive(reason)
        } else {
            Verdict::Passed
        };
        ScenarioReport {
            scenario,
            verdict,
            messages_validated: self.messages,
        }
    }
}

// =============================================================================
// Suite
// =============================================================================

/// An ordered set of scenarios.
///
/// # Example
///
/// ```rust
/// use kraken_feed_validator::application::services::{Scenario, ScenarioSuite};
///
/// let suite = ScenarioSuite::from_filter(&["book_depth".to_string()]).unwrap();
/// assert_eq!(suite.scenarios(), &[Scenario::BookDepth]);
/// assert!(ScenarioSuite::from_filter(&["nope".to_string()]).is_err());
/// ```
#[derive(Debug, Clone)]
pub struct ScenarioSuite {
    scenarios: Vec<Scenario>,
    samples: usize,
}

impl Default for ScenarioSuite {
    fn default() -> Self {
        Self {
            scenarios: Scenario::all().to_vec(),
            samples: DEFAULT_SAMPLES,
        }
    }
}

impl ScenarioSuite {
    /// Select scenarios by name. An empty filter selects all of them.
    ///
    /// # Errors
    ///
    /// Returns [`UnknownScenario`] for a name that does not exist.
    pub fn from_filter(names: &[String]) -> Result<Self, UnknownScenario> {
        if names.is_empty() {
            return Ok(Self::default());
        }
        let scenarios = names
            .iter()
            .map(|name| Scenario::from_name(name).ok_or_else(|| UnknownScenario(name.clone())))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            scenarios,
            ..Self::default()
        })
    }

    /// Set the number of messages sampled per subscription (at least one).
    #[must_use]
    pub fn with_samples(mut self, samples: usize) -> Self {
        self.samples = samples.max(1);
        self
    }

    /// Selected scenarios.
    #[must_use]
    pub fn scenarios(&self) -> &[Scenario] {
        &self.scenarios
    }

    /// Run one scenario on an open session.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] if the connection fails; the caller opens a
    /// new session and runs the scenario again.
    #[tracing::instrument(skip_all, fields(scenario = %scenario))]
    pub async fn run(
        &self,
        scenario: Scenario,
        session: &mut StreamSession,
    ) -> Result<ScenarioReport, SessionError> {
        tracing::info!("Scenario started");
        let mut findings = Findings::default();

        match scenario {
            Scenario::TickerSnapshotThenUpdates => self.ticker_snapshot_then_updates(session, &mut findings).await?,
            Scenario::BookDepth => self.book_depth(session, &mut findings).await?,
            Scenario::InvalidSymbol => invalid_symbol(session, &mut findings).await?,
            Scenario::CandleInterval => self.candle_interval(session, &mut findings).await?,
            Scenario::TradeSequence => self.trade_sequence(session, &mut findings).await?,
            Scenario::Resubscribe => resubscribe(session, &mut findings).await?,
        }

        let report = findings.report(scenario);
        match &report.verdict {
            Verdict::Passed => tracing::info!(messages = report.messages_validated, "Scenario passed"),
            Verdict::Inconclusive(reason) => tracing::warn!(reason = %reason, "Scenario inconclusive"),
            Verdict::Failed(reasons) => tracing::error!(failures = reasons.len(), "Scenario failed"),
        }
        Ok(report)
    }

    async fn ticker_snapshot_then_updates(
        &self,
        session: &mut StreamSession,
        findings: &mut Findings,
    ) -> Result<(), SessionError> {
        let params = SubscriptionParams::default().with_snapshot(true);
        let Some(handle) =
            subscribe_confirmed(session, findings, Channel::Ticker, TICKER_SYMBOL, params).await?
        else {
            return Ok(());
        };

        let messages = collect(session, &handle, self.samples + 1, findings).await?;
        if let Some((first, rest)) = messages.split_first() {
            findings.require(first.message.kind == DataKind::Snapshot, || {
                format!("first ticker message is {}", first.message.kind.as_str())
            });
            for later in rest {
                findings.require(later.message.kind == DataKind::Update, || {
                    "ticker message after the snapshot is another snapshot".to_string()
                });
                findings.require(later.message.mentions(TICKER_SYMBOL), || {
                    format!("ticker update without {TICKER_SYMBOL}")
                });
            }
        }

        finish(session, &handle, findings).await
    }

    async fn book_depth(
        &self,
        session: &mut StreamSession,
        findings: &mut Findings,
    ) -> Result<(), SessionError> {
        let params = SubscriptionParams::default()
            .with_snapshot(true)
            .with_depth(BOOK_DEPTH);
        let Some(handle) =
            subscribe_confirmed(session, findings, Channel::Book, BOOK_SYMBOL, params).await?
        else {
            return Ok(());
        };

        let messages = collect(session, &handle, self.samples, findings).await?;
        match messages.iter().find(|m| m.message.kind == DataKind::Snapshot) {
            Some(snapshot) => check_book_depth(snapshot, findings),
            None if messages.is_empty() => {}
            None => findings.fail("no book snapshot received"),
        }

        finish(session, &handle, findings).await
    }

    async fn candle_interval(
        &self,
        session: &mut StreamSession,
        findings: &mut Findings,
    ) -> Result<(), SessionError> {
        let params = SubscriptionParams::default().with_interval(CANDLE_INTERVAL);
        let Some(handle) =
            subscribe_confirmed(session, findings, Channel::Candles, TICKER_SYMBOL, params).await?
        else {
            return Ok(());
        };

        let messages = collect(session, &handle, self.samples.min(2), findings).await?;
        for validated in &messages {
            for entry in validated.message.entries() {
                let interval = entry.get("interval").and_then(serde_json::Value::as_u64);
                findings.require(interval == Some(u64::from(CANDLE_INTERVAL)), || {
                    format!("candle interval {interval:?}, subscribed {CANDLE_INTERVAL}")
                });
            }
        }

        finish(session, &handle, findings).await
    }

    async fn trade_sequence(
        &self,
        session: &mut StreamSession,
        findings: &mut Findings,
    ) -> Result<(), SessionError> {
        let Some(handle) = subscribe_confirmed(
            session,
            findings,
            Channel::Trade,
            TICKER_SYMBOL,
            SubscriptionParams::default(),
        )
        .await?
        else {
            return Ok(());
        };

        collect(session, &handle, self.samples, findings).await?;
        if let Some(last) = session
            .registry()
            .get(Channel::Trade, TICKER_SYMBOL)
            .and_then(|s| s.state.last_trade_id)
        {
            tracing::debug!(last_trade_id = last, "Trade sequence sampled");
        }

        finish(session, &handle, findings).await
    }
}

// =============================================================================
// Scenario Steps
// =============================================================================

async fn invalid_symbol(
    session: &mut StreamSession,
    findings: &mut Findings,
) -> Result<(), SessionError> {
    let symbols = vec![INVALID_SYMBOL.to_string()];
    let handle = session
        .subscribe(Channel::Ticker, symbols, SubscriptionParams::default())
        .await?;
    let ack_timeout = session.timeouts().ack;

    match session.await_ack(&handle, ack_timeout).await? {
        AckOutcome::Rejected(reason) => {
            tracing::info!(reason = %reason, "Invalid symbol rejected");
        }
        AckOutcome::Confirmed => findings.fail(format!("{INVALID_SYMBOL} subscription was confirmed")),
        AckOutcome::TimedOut => findings.fail(format!("no rejection for {INVALID_SYMBOL}")),
    }

    let state = session
        .registry()
        .get(Channel::Ticker, INVALID_SYMBOL)
        .map(|s| s.ack.clone());
    findings.require(matches!(state, Some(AckState::Rejected(_))), || {
        format!("registry state for {INVALID_SYMBOL} is {state:?}")
    });

    let data = session
        .await_message(
            |observed| matches!(observed, Observed::Data(v) if v.message.mentions(INVALID_SYMBOL)),
            ack_timeout,
        )
        .await?;
    if let Awaited::Matched(_) = data {
        findings.fail(format!("data received for {INVALID_SYMBOL}"));
    }
    Ok(())
}

async fn resubscribe(
    session: &mut StreamSession,
    findings: &mut Findings,
) -> Result<(), SessionError> {
    let params = SubscriptionParams::default().with_snapshot(true);
    let Some(first) =
        subscribe_confirmed(session, findings, Channel::Ticker, TICKER_SYMBOL, params.clone())
            .await?
    else {
        return Ok(());
    };
    collect(session, &first, 1, findings).await?;
    finish(session, &first, findings).await?;

    let Some(second) =
        subscribe_confirmed(session, findings, Channel::Ticker, TICKER_SYMBOL, params).await?
    else {
        return Ok(());
    };
    findings.require(second.id != first.id && second.req_id != first.req_id, || {
        "resubscription reused the previous handle".to_string()
    });

    let messages = collect(session, &second, 1, findings).await?;
    if let Some(validated) = messages.first() {
        findings.require(validated.message.kind == DataKind::Snapshot, || {
            "first message after resubscribe is not a snapshot".to_string()
        });
    }

    finish(session, &second, findings).await
}

fn check_book_depth(snapshot: &ValidatedMessage, findings: &mut Findings) {
    let Ok(Payload::Book(sets)) = snapshot.message.payload() else {
        findings.fail("book snapshot does not decode");
        return;
    };
    for set in sets.iter().filter(|s| s.symbol == BOOK_SYMBOL) {
        let expected = BOOK_DEPTH as usize;
        findings.require(set.bids.len() == expected && set.asks.len() == expected, || {
            format!(
                "{BOOK_SYMBOL} snapshot has {} bids and {} asks, expected {expected} each",
                set.bids.len(),
                set.asks.len()
            )
        });
    }
}

/// Subscribe one symbol and wait for confirmation.
///
/// Records a failure and returns `None` unless the subscription is confirmed.
async fn subscribe_confirmed(
    session: &mut StreamSession,
    findings: &mut Findings,
    channel: Channel,
    symbol: &str,
    params: SubscriptionParams,
) -> Result<Option<SubscriptionHandle>, SessionError> {
    let symbols: Vec<Symbol> = vec![symbol.to_string()];
    let handle = session.subscribe(channel, symbols, params).await?;
    let ack_timeout = session.timeouts().ack;

    match session.await_ack(&handle, ack_timeout).await? {
        AckOutcome::Confirmed => Ok(Some(handle)),
        AckOutcome::Rejected(reason) => {
            findings.fail(format!("{channel} {symbol} rejected: {reason}"));
            Ok(None)
        }
        AckOutcome::TimedOut => {
            findings.fail(format!(
                "{channel} {symbol} not acknowledged within {}s",
                ack_timeout.as_secs()
            ));
            Ok(None)
        }
    }
}

/// Sample up to `count` data messages for a handle.
///
/// Stops early on a critical failure, a rejection, or a quiet feed.
async fn collect(
    session: &mut StreamSession,
    handle: &SubscriptionHandle,
    count: usize,
    findings: &mut Findings,
) -> Result<Vec<ValidatedMessage>, SessionError> {
    let timeout = session.stream_timeout(handle);
    let mut messages = Vec::with_capacity(count);

    while messages.len() < count {
        match session.stream(handle, timeout).await? {
            StreamEvent::Message(validated) => {
                findings.absorb(&validated);
                let critical = findings.critical;
                messages.push(validated);
                if critical {
                    break;
                }
            }
            StreamEvent::Unclassified(message) => {
                findings.fail(format!("unclassified frame: {}", message.reason));
            }
            StreamEvent::Rejected(reason) => {
                findings.fail(format!("{} rejected mid-stream: {reason}", handle.channel));
                break;
            }
            StreamEvent::TimedOut => {
                findings.inconclusive(format!(
                    "{} of {count} {} messages within {}",
                    messages.len(),
                    handle.channel,
                    format_duration(timeout)
                ));
                break;
            }
        }
    }
    Ok(messages)
}

/// Unsubscribe and classify the confirmation outcome.
async fn finish(
    session: &mut StreamSession,
    handle: &SubscriptionHandle,
    findings: &mut Findings,
) -> Result<(), SessionError> {
    let ticket = session.unsubscribe(handle).await?;
    let timeout = session.timeouts().unsubscribe;

    match session.await_unsubscribe(&ticket, timeout).await? {
        UnsubscribeOutcome::Confirmed | UnsubscribeOutcome::TimedOut { tolerated: true } => {}
        UnsubscribeOutcome::Rejected(reason) => {
            findings.fail(format!("{} unsubscribe rejected: {reason}", handle.channel));
        }
        UnsubscribeOutcome::TimedOut { tolerated: false } => {
            findings.fail(format!(
                "{} unsubscribe not confirmed within {}",
                handle.channel,
                format_duration(timeout)
            ));
        }
    }
    Ok(())
}

fn format_duration(duration: Duration) -> String {
    format!("{}s", duration.as_secs())
}
