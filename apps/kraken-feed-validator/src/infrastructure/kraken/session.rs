//! Stream Session
//!
//! The caller-facing surface: one connection, its subscription registry,
//! and the validators every data frame passes through.
//!
//! # Flow
//!
//! ```text
//! subscribe ──► registry (pending) ──► send request
//!
//! receive ──► classify ──┬─ response ──► ack / unsubscribe / pong bookkeeping
//!                        ├─ data ──────► schema + semantic validation
//!                        ├─ heartbeat, status
//!                        └─ unclassified ──► warn + count
//! ```
//!
//! Every wait (`await_ack`, `stream`, `await_unsubscribe`, `ping`,
//! `await_message`) runs the same bounded loop: one `receive` per
//! iteration with the remaining budget, every frame absorbed into session
//! state whether or not the current wait wants it. Data for one
//! subscription is therefore validated and applied to its stream state even
//! while the caller is waiting on another.
//!
//! # Failure model
//!
//! A [`ConnectionError`] is fatal: the registry is cleared and every later
//! call fails until the caller opens the session again and re-issues its
//! subscriptions. Timeouts are outcomes, never errors.
//!
//! # Sharing
//!
//! The session takes `&mut self` for every operation and is not designed for
//! concurrent callers. Callers that share one connection across tasks wrap
//! it in a [`SharedSession`], which serializes each send/receive pair.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::TimeDelta;
use serde_json::Value;

use crate::domain::market::{Channel, DataMessage, Symbol};
use crate::domain::subscription::{
    AckState, AckStatus, RequestId, StreamKey, SubscriptionHandle, SubscriptionParams,
    SubscriptionRegistry,
};
use crate::domain::validation::semantic::DEFAULT_CANDLE_TOLERANCE;
use crate::domain::validation::{MessageValidation, SchemaRegistry, SemanticValidator};
use crate::infrastructure::kraken::classifier::{
    CodecError, InboundMessage, MessageClassifier, UnclassifiedMessage, encode_request,
};
use crate::infrastructure::kraken::messages::{Method, MethodResponse, Request};
use crate::infrastructure::kraken::timeout::{Deadline, TimeoutPolicy};
use crate::infrastructure::kraken::transport::{
    ConnectError, Connection, ConnectionError, ReceiveOutcome,
};
use crate::infrastructure::metrics::{self, WaitOperation};

/// Public Kraken WebSocket v2 endpoint.
pub const DEFAULT_ENDPOINT: &str = "wss://ws.kraken.com/v2";

/// A session shared between tasks.
pub type SharedSession = Arc<tokio::sync::Mutex<StreamSession>>;

// =============================================================================
// Configuration and Errors
// =============================================================================

/// Session settings.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// WebSocket endpoint.
    pub endpoint: String,
    /// Wait bounds.
    pub timeouts: TimeoutPolicy,
    /// Allowed deviation between candle elapsed time and its interval.
    pub candle_tolerance: TimeDelta,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            timeouts: TimeoutPolicy::default(),
            candle_tolerance: DEFAULT_CANDLE_TOLERANCE,
        }
    }
}

/// Session errors. Every variant is fatal for the current connection.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Opening the connection failed.
    #[error(transparent)]
    Connect(#[from] ConnectError),

    /// The connection failed mid-session.
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// A request could not be encoded.
    #[error(transparent)]
    Codec(#[from] CodecError),
}

// =============================================================================
// Outcomes
// =============================================================================

/// A data message together with its validation outcome.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedMessage {
    /// The classified message.
    pub message: DataMessage,
    /// Schema and semantic outcome.
    pub validation: MessageValidation,
    /// The message arrived for streams already unsubscribed. Semantic rules
    /// were skipped because no stream state exists for it.
    pub after_unsubscribe: bool,
}

/// Any classified frame, as seen by `await_message` predicates.
#[derive(Debug, Clone, PartialEq)]
pub enum Observed {
    /// Validated data message.
    Data(ValidatedMessage),
    /// Method response (ack, rejection, unsubscribe confirmation, pong).
    Response(MethodResponse),
    /// Keep-alive.
    Heartbeat,
    /// System status.
    Status(Value),
    /// Frame of unknown shape.
    Unclassified(UnclassifiedMessage),
}

/// Result of waiting for a subscribe acknowledgment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AckOutcome {
    /// Every symbol confirmed.
    Confirmed,
    /// The server rejected the subscription.
    Rejected(String),
    /// No terminal acknowledgment in time.
    TimedOut,
}

/// Result of waiting for the next message on a subscription.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Next data message for the handle.
    Message(ValidatedMessage),
    /// The subscription was rejected; no data will follow.
    Rejected(String),
    /// A frame of unknown shape arrived while waiting.
    Unclassified(UnclassifiedMessage),
    /// No message in time.
    TimedOut,
}

/// Result of waiting for an unsubscribe confirmation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnsubscribeOutcome {
    /// Every symbol confirmed.
    Confirmed,
    /// The server refused the unsubscribe.
    Rejected(String),
    /// No confirmation in time. `tolerated` reports whether the timeout
    /// policy accepts this for the channel.
    TimedOut {
        /// Whether the timeout is acceptable for this channel.
        tolerated: bool,
    },
}

/// Result of a ping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PingOutcome {
    /// Pong received.
    Pong {
        /// Round-trip time.
        rtt: Duration,
    },
    /// No pong in time.
    TimedOut,
}

/// Result of `await_message`.
#[derive(Debug, Clone, PartialEq)]
pub enum Awaited {
    /// First frame matching the predicate.
    Matched(Observed),
    /// Nothing matched in time.
    TimeoutExceeded {
        /// Time spent waiting.
        waited: Duration,
    },
}

/// Reference to a sent unsubscribe request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsubscribeTicket {
    /// Correlation id of the unsubscribe request.
    pub req_id: RequestId,
    /// Channel.
    pub channel: Channel,
    /// Symbols the request covered.
    pub symbols: Vec<Symbol>,
}

#[derive(Debug)]
struct UnsubscribeProgress {
    symbols: Vec<Symbol>,
    confirmed: HashSet<Symbol>,
    rejected: Option<String>,
}

impl UnsubscribeProgress {
    fn outcome(&self) -> Option<UnsubscribeOutcome> {
        if let Some(reason) = &self.rejected {
            return Some(UnsubscribeOutcome::Rejected(reason.clone()));
        }
        self.symbols
            .iter()
            .all(|s| self.confirmed.contains(s))
            .then_some(UnsubscribeOutcome::Confirmed)
    }
}

// =============================================================================
// Session
// =============================================================================

/// One streaming session over one connection.
#[derive(Debug)]
pub struct StreamSession {
    config: SessionConfig,
    connection: Option<Connection>,
    registry: SubscriptionRegistry,
    classifier: MessageClassifier,
    schemas: Arc<SchemaRegistry>,
    semantics: SemanticValidator,
    next_req_id: RequestId,
    draining: HashSet<StreamKey>,
    unsubscribes: HashMap<RequestId, UnsubscribeProgress>,
    pongs: HashSet<RequestId>,
}

impl StreamSession {
    /// Create a session without opening the connection.
    ///
    /// The connection is opened by [`open`](Self::open) or on the first
    /// [`subscribe`](Self::subscribe).
    #[must_use]
    pub fn new(config: SessionConfig, schemas: Arc<SchemaRegistry>) -> Self {
        let semantics = SemanticValidator::new(config.candle_tolerance);
        Self {
            config,
            connection: None,
            registry: SubscriptionRegistry::new(),
            classifier: MessageClassifier::new(),
            schemas,
            semantics,
            next_req_id: 1,
            draining: HashSet::new(),
            unsubscribes: HashMap::new(),
            pongs: HashSet::new(),
        }
    }

    /// Create a session and open its connection.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectError`] if the handshake fails or times out.
    pub async fn connect(
        config: SessionConfig,
        schemas: Arc<SchemaRegistry>,
    ) -> Result<Self, ConnectError> {
        let mut session = Self::new(config, schemas);
        session.open().await?;
        Ok(session)
    }

    /// Create a session over an already-open connection.
    #[must_use]
    pub fn with_connection(
        config: SessionConfig,
        schemas: Arc<SchemaRegistry>,
        connection: Connection,
    ) -> Self {
        let mut session = Self::new(config, schemas);
        session.connection = Some(connection);
        session
    }

    /// Wrap the session for sharing between tasks.
    #[must_use]
    pub fn into_shared(self) -> SharedSession {
        Arc::new(tokio::sync::Mutex::new(self))
    }

    /// Open (or re-open) the connection.
    ///
    /// Any previous connection is closed and every subscription is dropped;
    /// the caller re-issues the ones it still needs.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectError`] if the handshake fails or times out.
    pub async fn open(&mut self) -> Result<(), ConnectError> {
        if let Some(mut previous) = self.connection.take() {
            previous.close().await;
        }
        self.reset_streams();

        let connection =
            Connection::open(&self.config.endpoint, self.config.timeouts.connect).await?;
        self.connection = Some(connection);
        Ok(())
    }

    /// Close the connection and drop every subscription.
    pub async fn close(&mut self) {
        if let Some(connection) = self.connection.as_mut() {
            connection.close().await;
        }
        self.reset_streams();
    }

    /// Whether the connection is open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.connection.as_ref().is_some_and(Connection::is_open)
    }

    /// The subscription registry.
    #[must_use]
    pub const fn registry(&self) -> &SubscriptionRegistry {
        &self.registry
    }

    /// Wait bounds in effect.
    #[must_use]
    pub const fn timeouts(&self) -> &TimeoutPolicy {
        &self.config.timeouts
    }

    /// Default wait bound for the next data message on a handle.
    #[must_use]
    pub fn stream_timeout(&self, handle: &SubscriptionHandle) -> Duration {
        self.config.timeouts.for_channel(handle.channel, &handle.params)
    }

    // =========================================================================
    // Requests
    // =========================================================================

    /// Send a subscribe request and record a pending entry per symbol.
    ///
    /// Does not wait for acknowledgment. Parameters are not checked locally;
    /// an unacceptable symbol or parameter comes back as a rejection.
    /// Opens the connection if it was never opened.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] if the connection cannot be opened or the
    /// request cannot be sent.
    pub async fn subscribe(
        &mut self,
        channel: Channel,
        symbols: Vec<Symbol>,
        params: SubscriptionParams,
    ) -> Result<SubscriptionHandle, SessionError> {
        if self.connection.is_none() {
            self.open().await?;
        }
        if !self.is_open() {
            return Err(ConnectionError::NotOpen.into());
        }

        let req_id = self.take_req_id();
        let text = encode_request(&Request::subscribe(channel, symbols.clone(), &params, req_id))?;

        for symbol in &symbols {
            self.draining.remove(&(channel, symbol.clone()));
        }
        let handle = self.registry.register(channel, symbols, params, req_id);

        tracing::info!(
            channel = %channel,
            symbols = ?handle.symbols,
            req_id,
            "Subscribing"
        );
        self.send(text).await?;
        Ok(handle)
    }

    /// Send an unsubscribe request and remove the handle's entries.
    ///
    /// Does not wait for confirmation. Data still in flight for the removed
    /// streams is schema-checked but skips semantic rules.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] if the request cannot be sent.
    pub async fn unsubscribe(
        &mut self,
        handle: &SubscriptionHandle,
    ) -> Result<UnsubscribeTicket, SessionError> {
        let req_id = self.take_req_id();
        let text = encode_request(&Request::unsubscribe(
            handle.channel,
            handle.symbols.clone(),
            &handle.params,
            req_id,
        ))?;

        tracing::info!(
            channel = %handle.channel,
            symbols = ?handle.symbols,
            req_id,
            "Unsubscribing"
        );
        self.send(text).await?;

        for symbol in self.registry.remove(handle) {
            self.draining.insert((handle.channel, symbol));
        }
        self.unsubscribes.insert(
            req_id,
            UnsubscribeProgress {
                symbols: handle.symbols.clone(),
                confirmed: HashSet::new(),
                rejected: None,
            },
        );

        Ok(UnsubscribeTicket {
            req_id,
            channel: handle.channel,
            symbols: handle.symbols.clone(),
        })
    }

    // =========================================================================
    // Waits
    // =========================================================================

    /// Wait until the handle is confirmed or rejected.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] on a fatal connection failure.
    pub async fn await_ack(
        &mut self,
        handle: &SubscriptionHandle,
        timeout: Duration,
    ) -> Result<AckOutcome, SessionError> {
        let deadline = Deadline::after(timeout);
        loop {
            match self.registry.handle_state(handle) {
                AckState::Confirmed => return Ok(AckOutcome::Confirmed),
                AckState::Rejected(reason) => return Ok(AckOutcome::Rejected(reason)),
                AckState::Pending => {}
            }

            if self.next_observed(&deadline).await?.is_none() {
                metrics::record_timeout(WaitOperation::Ack);
                tracing::warn!(
                    channel = %handle.channel,
                    req_id = handle.req_id,
                    waited_ms = deadline.elapsed().as_millis(),
                    "Acknowledgment timed out"
                );
                return Ok(AckOutcome::TimedOut);
            }
        }
    }

    /// Wait for the next data message covering the handle.
    ///
    /// Unclassified frames are surfaced as they arrive. A rejected handle
    /// returns [`StreamEvent::Rejected`] immediately.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] on a fatal connection failure.
    pub async fn stream(
        &mut self,
        handle: &SubscriptionHandle,
        timeout: Duration,
    ) -> Result<StreamEvent, SessionError> {
        let deadline = Deadline::after(timeout);
        loop {
            if let AckState::Rejected(reason) = self.registry.handle_state(handle) {
                return Ok(StreamEvent::Rejected(reason));
            }

            match self.next_observed(&deadline).await? {
                None => {
                    metrics::record_timeout(WaitOperation::Stream);
                    tracing::debug!(
                        channel = %handle.channel,
                        symbols = ?handle.symbols,
                        "No data within timeout"
                    );
                    return Ok(StreamEvent::TimedOut);
                }
                Some(Observed::Data(validated)) if covers(handle, &validated.message) => {
                    return Ok(StreamEvent::Message(validated));
                }
                Some(Observed::Unclassified(message)) => {
                    return Ok(StreamEvent::Unclassified(message));
                }
                Some(_) => {}
            }
        }
    }

    /// Wait for the unsubscribe confirmation of a ticket.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] on a fatal connection failure.
    pub async fn await_unsubscribe(
        &mut self,
        ticket: &UnsubscribeTicket,
        timeout: Duration,
    ) -> Result<UnsubscribeOutcome, SessionError> {
        let deadline = Deadline::after(timeout);
        loop {
            if let Some(outcome) = self
                .unsubscribes
                .get(&ticket.req_id)
                .and_then(UnsubscribeProgress::outcome)
            {
                self.unsubscribes.remove(&ticket.req_id);
                return Ok(outcome);
            }

            if self.next_observed(&deadline).await?.is_none() {
                self.unsubscribes.remove(&ticket.req_id);
                metrics::record_timeout(WaitOperation::Unsubscribe);

                let tolerated = self
                    .config
                    .timeouts
                    .tolerates_unsubscribe_timeout(ticket.channel);
                if tolerated {
                    tracing::warn!(
                        channel = %ticket.channel,
                        req_id = ticket.req_id,
                        "Unsubscribe confirmation timed out (tolerated on this channel)"
                    );
                } else {
                    tracing::error!(
                        channel = %ticket.channel,
                        req_id = ticket.req_id,
                        "Unsubscribe confirmation timed out"
                    );
                }
                return Ok(UnsubscribeOutcome::TimedOut { tolerated });
            }
        }
    }

    /// Send a ping and wait for its pong.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] if the ping cannot be sent or the connection
    /// fails.
    pub async fn ping(&mut self, timeout: Duration) -> Result<PingOutcome, SessionError> {
        let req_id = self.take_req_id();
        self.send(encode_request(&Request::ping(req_id))?).await?;

        let deadline = Deadline::after(timeout);
        loop {
            if self.pongs.remove(&req_id) {
                return Ok(PingOutcome::Pong {
                    rtt: deadline.elapsed(),
                });
            }
            if self.next_observed(&deadline).await?.is_none() {
                metrics::record_timeout(WaitOperation::Ping);
                return Ok(PingOutcome::TimedOut);
            }
        }
    }

    /// Wait for the first frame matching `predicate`.
    ///
    /// Frames that do not match are still absorbed into session state.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] on a fatal connection failure.
    pub async fn await_message<P>(
        &mut self,
        mut predicate: P,
        timeout: Duration,
    ) -> Result<Awaited, SessionError>
    where
        P: FnMut(&Observed) -> bool + Send,
    {
        let deadline = Deadline::after(timeout);
        loop {
            match self.next_observed(&deadline).await? {
                None => {
                    metrics::record_timeout(WaitOperation::Predicate);
                    return Ok(Awaited::TimeoutExceeded {
                        waited: deadline.elapsed(),
                    });
                }
                Some(observed) if predicate(&observed) => return Ok(Awaited::Matched(observed)),
                Some(_) => {}
            }
        }
    }

    // =========================================================================
    // Internals
    // =========================================================================

    const fn take_req_id(&mut self) -> RequestId {
        let id = self.next_req_id;
        self.next_req_id += 1;
        id
    }

    fn reset_streams(&mut self) {
        self.registry.clear();
        self.draining.clear();
        self.unsubscribes.clear();
        self.pongs.clear();
    }

    async fn send(&mut self, text: String) -> Result<(), SessionError> {
        let connection = self.connection.as_mut().ok_or(ConnectionError::NotOpen)?;
        if let Err(e) = connection.send(text).await {
            self.teardown(&e);
            return Err(e.into());
        }
        Ok(())
    }

    /// One receive with the remaining budget. `None` once the deadline is spent.
    async fn next_observed(&mut self, deadline: &Deadline) -> Result<Option<Observed>, SessionError> {
        let Some(remaining) = deadline.remaining() else {
            return Ok(None);
        };
        let connection = self.connection.as_mut().ok_or(ConnectionError::NotOpen)?;

        match connection.receive(remaining).await {
            Ok(ReceiveOutcome::Frame(frame)) => Ok(Some(self.absorb(&frame))),
            Ok(ReceiveOutcome::Timeout) => Ok(None),
            Err(e) => {
                self.teardown(&e);
                Err(e.into())
            }
        }
    }

    fn teardown(&mut self, error: &ConnectionError) {
        let label = match error {
            ConnectionError::Transport(_) => "transport",
            ConnectionError::Ended => "ended",
            ConnectionError::NotOpen => "not_open",
        };
        metrics::record_connection_error(label);
        tracing::error!(
            error = %error,
            subscriptions = self.registry.len(),
            "Connection failed, dropping all subscriptions"
        );
        self.reset_streams();
    }

    fn absorb(&mut self, frame: &str) -> Observed {
        let inbound = self.classifier.classify(frame);
        metrics::record_frame(inbound.channel_label(), inbound.kind());

        match inbound {
            InboundMessage::Data(message) => Observed::Data(self.validate(message)),
            InboundMessage::Response(response) => {
                self.absorb_response(&response);
                Observed::Response(response)
            }
            InboundMessage::Heartbeat => {
                tracing::trace!("Heartbeat");
                Observed::Heartbeat
            }
            InboundMessage::Status(status) => {
                tracing::info!(status = %status, "System status");
                Observed::Status(status)
            }
            InboundMessage::Unclassified(message) => {
                metrics::record_unclassified();
                tracing::warn!(
                    reason = %message.reason,
                    raw = %message.raw,
                    "Unclassified frame"
                );
                Observed::Unclassified(message)
            }
        }
    }

    fn validate(&mut self, message: DataMessage) -> ValidatedMessage {
        let schema = self.schemas.validate_schema(message.channel, &message.frame);
        if let Err(violation) = &schema {
            metrics::record_schema_violation(message.channel);
            tracing::warn!(
                channel = %message.channel,
                violation = %violation,
                "Schema violation"
            );
        }

        let after_unsubscribe = self.is_draining(&message);
        let results = if after_unsubscribe {
            tracing::debug!(
                channel = %message.channel,
                symbols = ?message.symbols(),
                "Data after unsubscribe"
            );
            Vec::new()
        } else {
            self.semantics
                .validate_semantics(&message, &mut self.registry)
        };

        for failure in results.iter().filter(|r| !r.passed) {
            metrics::record_rule_failure(failure.rule.id());
            let symbol = failure.symbol.as_deref().unwrap_or_default();
            if failure.is_checksum_mismatch() {
                metrics::record_checksum_mismatch(symbol);
            }
            if failure.is_critical_failure() {
                tracing::error!(
                    rule = failure.rule.id(),
                    symbol,
                    observed = %failure.observed,
                    "Critical validation failure"
                );
            } else {
                tracing::warn!(
                    rule = failure.rule.id(),
                    symbol,
                    observed = %failure.observed,
                    "Validation failure"
                );
            }
        }

        ValidatedMessage {
            message,
            validation: MessageValidation { schema, results },
            after_unsubscribe,
        }
    }

    fn is_draining(&self, message: &DataMessage) -> bool {
        let symbols = message.symbols();
        !symbols.is_empty()
            && symbols.iter().all(|symbol| {
                self.registry.get(message.channel, symbol).is_none()
                    && self.draining.contains(&(message.channel, (*symbol).to_string()))
            })
    }

    fn absorb_response(&mut self, response: &MethodResponse) {
        match response.method {
            Method::Subscribe => self.absorb_subscribe_response(response),
            Method::Unsubscribe => self.absorb_unsubscribe_response(response),
            Method::Pong => {
                if let Some(req_id) = response.req_id {
                    self.pongs.insert(req_id);
                }
            }
            Method::Ping => {}
        }
    }

    /// Correlate by `req_id` first, then by (channel, symbol).
    fn absorb_subscribe_response(&mut self, response: &MethodResponse) {
        let status = if response.success {
            AckStatus::Confirmed
        } else {
            AckStatus::Rejected(response.error_reason())
        };

        let channel = match response.req_id {
            Some(req_id) if self.registry.has_request(req_id) => {
                self.registry.channel_of_request(req_id)
            }
            Some(req_id) => {
                tracing::debug!(req_id, "Response for a request no longer registered");
                return;
            }
            None => response.channel(),
        };

        let applied = match (response.symbol(), channel, response.req_id) {
            (Some(symbol), Some(channel), _) => usize::from(self.registry.ack(channel, symbol, status.clone())),
            (None, _, Some(req_id)) => self.registry.ack_request(req_id, &status),
            _ => 0,
        };

        if applied == 0 {
            tracing::warn!(
                req_id = ?response.req_id,
                symbol = ?response.symbol(),
                "Subscribe response matches no subscription"
            );
            return;
        }

        match status {
            AckStatus::Confirmed => tracing::info!(
                req_id = ?response.req_id,
                symbol = ?response.symbol(),
                "Subscription confirmed"
            ),
            AckStatus::Rejected(reason) => tracing::warn!(
                req_id = ?response.req_id,
                symbol = ?response.symbol(),
                reason = %reason,
                "Subscription rejected"
            ),
        }
    }

    fn absorb_unsubscribe_response(&mut self, response: &MethodResponse) {
        let Some(progress) = response.req_id.and_then(|id| self.unsubscribes.get_mut(&id)) else {
            tracing::debug!(req_id = ?response.req_id, "Unsubscribe response without pending ticket");
            return;
        };

        if !response.success {
            progress.rejected = Some(response.error_reason());
            return;
        }
        match response.symbol() {
            Some(symbol) => {
                progress.confirmed.insert(symbol.to_string());
            }
            None => progress.confirmed.extend(progress.symbols.iter().cloned()),
        }
    }
}

fn covers(handle: &SubscriptionHandle, message: &DataMessage) -> bool {
    message.channel == handle.channel && message.symbols().iter().any(|s| handle.covers(message.channel, s))
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::application::ports::{FrameTransport, TransportError};
    use crate::domain::validation::Rule;

    /// Replays scripted frames, then stalls; records everything sent.
    struct ScriptedTransport {
        frames: VecDeque<Result<String, TransportError>>,
        sent: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl FrameTransport for ScriptedTransport {
        async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
            self.sent.lock().unwrap().push(text);
            Ok(())
        }

        async fn next_frame(&mut self) -> Option<Result<String, TransportError>> {
            match self.frames.pop_front() {
                Some(frame) => Some(frame),
                None => std::future::pending().await,
            }
        }

        async fn close(&mut self) -> Result<(), TransportError> {
            Ok(())
        }
    }

    fn session(frames: &[&str]) -> (StreamSession, Arc<Mutex<Vec<String>>>) {
        scripted(frames.iter().map(|f| Ok((*f).to_string())).collect())
    }

    fn scripted(
        frames: VecDeque<Result<String, TransportError>>,
    ) -> (StreamSession, Arc<Mutex<Vec<String>>>) {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let transport = ScriptedTransport {
            frames,
            sent: Arc::clone(&sent),
        };
        let connection = Connection::with_transport("ws://test", Box::new(transport));
        let schemas = Arc::new(SchemaRegistry::builtin().unwrap());
        (
            StreamSession::with_connection(SessionConfig::default(), schemas, connection),
            sent,
        )
    }

    const SHORT: Duration = Duration::from_millis(50);
    const LONG: Duration = Duration::from_secs(2);

    fn symbols(s: &[&str]) -> Vec<Symbol> {
        s.iter().map(|s| (*s).to_string()).collect()
    }

    const TICKER_ACK: &str = r#"{"method":"subscribe","result":{"channel":"ticker","symbol":"BTC/USD"},"success":true,"req_id":1}"#;
    const TICKER_SNAPSHOT: &str = r#"{"channel":"ticker","type":"snapshot","data":[{"symbol":"BTC/USD","bid":64000.1,"bid_qty":1.5,"ask":64000.2,"ask_qty":0.3,"last":64000.1,"volume":1234.5,"vwap":63500.0,"low":62000.0,"high":65000.0,"change":100.0,"change_pct":0.16}]}"#;

    #[tokio::test]
    async fn subscribe_sends_request_and_ack_confirms() {
        let (mut session, sent) = session(&[TICKER_ACK]);

        let handle = session
            .subscribe(Channel::Ticker, symbols(&["BTC/USD"]), SubscriptionParams::default())
            .await
            .unwrap();
        assert_eq!(handle.req_id, 1);
        assert_eq!(
            sent.lock().unwrap()[0],
            r#"{"method":"subscribe","params":{"channel":"ticker","symbol":["BTC/USD"]},"req_id":1}"#
        );

        let outcome = session.await_ack(&handle, LONG).await.unwrap();
        assert_eq!(outcome, AckOutcome::Confirmed);
        assert_eq!(session.registry().stats().confirmed, 1);
    }

    #[tokio::test]
    async fn rejection_is_terminal_and_stream_reports_it() {
        let (mut session, _) = session(&[
            r#"{"method":"subscribe","error":"Currency pair not supported FAKE/COIN","success":false,"symbol":"FAKE/COIN","req_id":1}"#,
        ]);

        let handle = session
            .subscribe(Channel::Ticker, symbols(&["FAKE/COIN"]), SubscriptionParams::default())
            .await
            .unwrap();

        let outcome = session.await_ack(&handle, LONG).await.unwrap();
        assert_eq!(
            outcome,
            AckOutcome::Rejected("Currency pair not supported FAKE/COIN".to_string())
        );
        assert!(matches!(
            session.stream(&handle, SHORT).await.unwrap(),
            StreamEvent::Rejected(_)
        ));
    }

    #[tokio::test]
    async fn ack_times_out_without_response() {
        let (mut session, _) = session(&[r#"{"channel":"heartbeat"}"#]);
        let handle = session
            .subscribe(Channel::Book, symbols(&["ETH/USD"]), SubscriptionParams::default())
            .await
            .unwrap();

        assert_eq!(session.await_ack(&handle, SHORT).await.unwrap(), AckOutcome::TimedOut);
    }

    #[tokio::test]
    async fn stream_returns_validated_snapshot() {
        let (mut session, _) = session(&[TICKER_ACK, r#"{"channel":"heartbeat"}"#, TICKER_SNAPSHOT]);
        let handle = session
            .subscribe(Channel::Ticker, symbols(&["BTC/USD"]), SubscriptionParams::default())
            .await
            .unwrap();

        let StreamEvent::Message(validated) = session.stream(&handle, LONG).await.unwrap() else {
            panic!("expected a message");
        };
        assert!(validated.validation.is_clean(), "{:?}", validated.validation);
        assert!(!validated.after_unsubscribe);
        assert!(
            validated
                .validation
                .outcome(Rule::TickerBidBelowAsk, "BTC/USD")
                .is_some_and(|r| r.passed)
        );
    }

    #[tokio::test]
    async fn other_stream_data_is_validated_while_waiting() {
        let (mut session, _) = session(&[
            r#"{"method":"subscribe","result":{"channel":"trade","symbol":"BTC/USD"},"success":true,"req_id":1}"#,
            r#"{"method":"subscribe","result":{"channel":"ticker","symbol":"BTC/USD"},"success":true,"req_id":2}"#,
            r#"{"channel":"trade","type":"update","data":[{"symbol":"BTC/USD","side":"buy","price":64000.0,"qty":0.1,"ord_type":"market","trade_id":500,"timestamp":"2024-05-01T12:00:00.000000Z"}]}"#,
            TICKER_SNAPSHOT,
        ]);
        session
            .subscribe(Channel::Trade, symbols(&["BTC/USD"]), SubscriptionParams::default())
            .await
            .unwrap();
        let ticker = session
            .subscribe(Channel::Ticker, symbols(&["BTC/USD"]), SubscriptionParams::default())
            .await
            .unwrap();

        assert!(matches!(
            session.stream(&ticker, LONG).await.unwrap(),
            StreamEvent::Message(_)
        ));
        let trade = session.registry().get(Channel::Trade, "BTC/USD").unwrap();
        assert_eq!(trade.state.last_trade_id, Some(500));
    }

    #[tokio::test]
    async fn unclassified_frames_are_surfaced() {
        let (mut session, _) = session(&[TICKER_ACK, r#"{"channel":"level3","type":"snapshot"}"#]);
        let handle = session
            .subscribe(Channel::Ticker, symbols(&["BTC/USD"]), SubscriptionParams::default())
            .await
            .unwrap();

        let StreamEvent::Unclassified(message) = session.stream(&handle, LONG).await.unwrap() else {
            panic!("expected unclassified");
        };
        assert!(message.reason.contains("unknown channel"));
    }

    #[tokio::test]
    async fn unsubscribe_confirms_and_late_data_skips_semantics() {
        let (mut session, sent) = session(&[
            TICKER_ACK,
            TICKER_SNAPSHOT,
            r#"{"method":"unsubscribe","result":{"channel":"ticker","symbol":"BTC/USD"},"success":true,"req_id":2}"#,
        ]);
        let handle = session
            .subscribe(Channel::Ticker, symbols(&["BTC/USD"]), SubscriptionParams::default())
            .await
            .unwrap();
        session.await_ack(&handle, LONG).await.unwrap();

        let ticket = session.unsubscribe(&handle).await.unwrap();
        assert!(session.registry().is_empty());
        assert!(sent.lock().unwrap()[1].contains(r#""method":"unsubscribe""#));

        let Awaited::Matched(Observed::Data(late)) = session
            .await_message(|o| matches!(o, Observed::Data(_)), LONG)
            .await
            .unwrap()
        else {
            panic!("expected late data");
        };
        assert!(late.after_unsubscribe);
        assert!(late.validation.results.is_empty());

        assert_eq!(
            session.await_unsubscribe(&ticket, LONG).await.unwrap(),
            UnsubscribeOutcome::Confirmed
        );
    }

    #[tokio::test]
    async fn unsubscribe_timeout_tolerance_follows_channel() {
        let (mut session, _) = session(&[]);
        let book = session
            .subscribe(Channel::Book, symbols(&["ETH/USD"]), SubscriptionParams::default())
            .await
            .unwrap();
        let ticker = session
            .subscribe(Channel::Ticker, symbols(&["BTC/USD"]), SubscriptionParams::default())
            .await
            .unwrap();

        let book_ticket = session.unsubscribe(&book).await.unwrap();
        let ticker_ticket = session.unsubscribe(&ticker).await.unwrap();

        assert_eq!(
            session.await_unsubscribe(&book_ticket, SHORT).await.unwrap(),
            UnsubscribeOutcome::TimedOut { tolerated: true }
        );
        assert_eq!(
            session.await_unsubscribe(&ticker_ticket, SHORT).await.unwrap(),
            UnsubscribeOutcome::TimedOut { tolerated: false }
        );
    }

    #[tokio::test]
    async fn ping_waits_for_matching_pong() {
        let (mut session, sent) = session(&[
            r#"{"method":"pong","req_id":99}"#,
            r#"{"method":"pong","req_id":1}"#,
        ]);

        let outcome = session.ping(LONG).await.unwrap();
        assert!(matches!(outcome, PingOutcome::Pong { .. }));
        assert_eq!(sent.lock().unwrap()[0], r#"{"method":"ping","req_id":1}"#);
    }

    #[tokio::test]
    async fn await_message_reports_time_waited() {
        let (mut session, _) = session(&[r#"{"channel":"heartbeat"}"#]);
        let Awaited::TimeoutExceeded { waited } = session
            .await_message(|o| matches!(o, Observed::Status(_)), SHORT)
            .await
            .unwrap()
        else {
            panic!("expected timeout");
        };
        assert!(waited >= SHORT);
    }

    #[tokio::test]
    async fn connection_error_clears_registry() {
        let (mut session, _) = scripted(VecDeque::from([Err(TransportError::Socket(
            "reset by peer".to_string(),
        ))]));
        let handle = session
            .subscribe(Channel::Ticker, symbols(&["BTC/USD"]), SubscriptionParams::default())
            .await
            .unwrap();

        let err = session.await_ack(&handle, LONG).await.unwrap_err();
        assert!(matches!(err, SessionError::Connection(ConnectionError::Transport(_))));
        assert!(session.registry().is_empty());
        assert!(!session.is_open());

        let err = session
            .subscribe(Channel::Ticker, symbols(&["BTC/USD"]), SubscriptionParams::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Connection(ConnectionError::NotOpen)));
    }

    #[tokio::test]
    async fn shared_session_serializes_access() {
        let (session, _) = session(&[r#"{"method":"pong","req_id":1}"#]);
        let shared = session.into_shared();

        let task = {
            let shared = Arc::clone(&shared);
            tokio::spawn(async move { shared.lock().await.ping(LONG).await })
        };
        assert!(matches!(task.await.unwrap().unwrap(), PingOutcome::Pong { .. }));
        assert!(shared.lock().await.is_open());
    }
}
