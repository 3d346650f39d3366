#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::needless_collect,
        clippy::option_if_let_else,
        clippy::default_trait_access,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! Kraken Feed Validator - Streaming Session Manager and Message Validator
//!
//! Maintains one WebSocket connection to Kraken's public v2 market data
//! feed, multiplexes channel subscriptions over it, and validates every
//! inbound data message structurally (schema) and semantically (business
//! rules, order book checksum).
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Market data types and validation rules
//!   - `market`: Channels and typed payloads (ticker, book, candles, trades)
//!   - `order_book`: Book reconstruction from snapshot and deltas
//!   - `subscription`: Subscription registry and per-stream state
//!   - `validation`: Schema registry, semantic rules, checksum
//!
//! - **Application**: Ports and services
//!   - `ports`: The frame transport seam
//!   - `services`: Named validation scenarios
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `kraken`: Transport, classifier, session, timeouts, reconnect
//!   - `config`: Environment configuration
//!   - `metrics`: Prometheus counters
//!   - `telemetry`: Tracing subscriber and OTLP export
//!
//! # Data Flow
//!
//! ```text
//!                       ┌────────────┐     ┌──────────────┐
//! Kraken WS v2 ────────►│ Classifier │────►│ Schema check │──┐
//!                       └────────────┘     └──────────────┘  │
//!                             │                              ▼
//!                     responses, pongs            ┌──────────────────┐
//!                             │                   │ Semantic rules + │
//!                             ▼                   │  stream state    │
//!                    ┌──────────────────┐         └──────────────────┘
//!                    │   Subscription   │◄─────────────────┘
//!                    │     registry     │
//!                    └──────────────────┘
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Market data types and validation rules with no I/O.
pub mod domain;

/// Application layer - Ports and scenario services.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::market::{Channel, DataKind, DataMessage, Payload, Symbol};
pub use domain::subscription::{
    AckState, SubscriptionHandle, SubscriptionParams, SubscriptionRegistry,
};
pub use domain::validation::{
    MessageValidation, Rule, RuleClass, SchemaRegistry, SchemaViolation, SemanticValidator,
    ValidationResult, compute_checksum,
};

// Scenarios
pub use application::services::{Scenario, ScenarioReport, ScenarioSuite, Verdict};

// Session
pub use infrastructure::kraken::{
    AckOutcome, Awaited, ConnectError, Connection, ConnectionError, DEFAULT_ENDPOINT, Observed,
    PingOutcome, SessionConfig, SessionError, SharedSession, StreamEvent, StreamSession,
    TimeoutPolicy, UnsubscribeOutcome, UnsubscribeTicket, ValidatedMessage,
};

// Infrastructure config
pub use infrastructure::config::{ConfigError, ReconnectSettings, ValidatorConfig};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
