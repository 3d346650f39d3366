//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the WebSocket adapter for the Kraken feed and the
//! ambient services (configuration, metrics, telemetry).

/// Kraken WebSocket v2 session, classifier and timeout controller.
pub mod kraken;

/// Configuration from environment variables.
pub mod config;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// OpenTelemetry tracing integration.
pub mod telemetry;
