//! Kraken Feed Validator Binary
//!
//! Runs the validation scenarios against the live feed and exits non-zero
//! if any scenario fails.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin kraken-feed-validator
//! VALIDATOR_SCENARIOS=book_depth,trade_sequence cargo run --bin kraken-feed-validator
//! ```
//!
//! # Environment Variables
//!
//! - `KRAKEN_WS_URL`: Feed endpoint (default: wss://ws.kraken.com/v2)
//! - `VALIDATOR_SCENARIOS`: Comma-separated scenario names (default: all)
//! - `VALIDATOR_SCHEMA_DIR`: Directory of per-channel schema overrides
//! - `VALIDATOR_METRICS_PORT`: Prometheus port, 0 disables (default: 0)
//! - `VALIDATOR_*_TIMEOUT_SECS`: Wait bounds (see `ValidatorConfig`)
//! - `OTEL_ENABLED`: Export spans over OTLP (default: false)
//! - `RUST_LOG`: Log level (default: `kraken_feed_validator=info`)

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use kraken_feed_validator::infrastructure::kraken::{ReconnectPolicy, retry_connect};
use kraken_feed_validator::infrastructure::telemetry;
use kraken_feed_validator::{
    Scenario, ScenarioReport, ScenarioSuite, SchemaRegistry, SessionError, StreamSession,
    ValidatorConfig, Verdict, init_metrics,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Runs of one scenario before a connection failure is reported as final.
const MAX_SCENARIO_RUNS: u32 = 2;

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;

    load_dotenv();

    // Initialize telemetry (tracing + optional OTLP export)
    let _telemetry_guard = telemetry::init();

    tracing::info!("Starting Kraken feed validator");

    let config = ValidatorConfig::from_env()?;
    log_config(&config);

    let metrics_handle = init_metrics(config.metrics_port)?;

    let schemas = Arc::new(match &config.schema_dir {
        Some(dir) => SchemaRegistry::from_dir(dir)
            .with_context(|| format!("loading schemas from {}", dir.display()))?,
        None => SchemaRegistry::builtin()?,
    });

    let suite = ScenarioSuite::from_filter(&config.scenarios)?;

    let shutdown_token = CancellationToken::new();
    tokio::spawn(await_shutdown(shutdown_token.clone()));

    let mut reports = Vec::with_capacity(suite.scenarios().len());
    for &scenario in suite.scenarios() {
        if shutdown_token.is_cancelled() {
            break;
        }
        let outcome = tokio::select! {
            () = shutdown_token.cancelled() => None,
            report = run_scenario(&suite, scenario, &config, &schemas, &shutdown_token) => Some(report?),
        };
        let Some(report) = outcome else {
            break;
        };
        println!("{report}");
        reports.push(report);
    }

    let failed = reports.iter().filter(|r| r.verdict.is_failure()).count();
    let inconclusive = reports
        .iter()
        .filter(|r| matches!(r.verdict, Verdict::Inconclusive(_)))
        .count();
    tracing::info!(
        run = reports.len(),
        failed,
        inconclusive,
        "Feed validation finished"
    );

    if let Some(handle) = &metrics_handle {
        tracing::debug!(metrics = %handle.render(), "Final metrics");
    }

    Ok(if failed == 0 && !shutdown_token.is_cancelled() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// Run one scenario on a fresh session.
///
/// A fatal connection error re-opens the session (with backoff) and runs the
/// scenario again from the start.
async fn run_scenario(
    suite: &ScenarioSuite,
    scenario: Scenario,
    config: &ValidatorConfig,
    schemas: &Arc<SchemaRegistry>,
    shutdown_token: &CancellationToken,
) -> anyhow::Result<ScenarioReport> {
    let mut policy = ReconnectPolicy::new(config.reconnect.to_reconnect_config());
    let mut runs = 0;

    loop {
        runs += 1;
        let mut session = retry_connect(&mut policy, shutdown_token, || {
            StreamSession::connect(config.session_config(), Arc::clone(schemas))
        })
        .await
        .with_context(|| format!("connecting for {scenario}"))?;

        let result = suite.run(scenario, &mut session).await;
        session.close().await;

        match result {
            Ok(report) => return Ok(report),
            Err(SessionError::Connection(e)) if runs < MAX_SCENARIO_RUNS => {
                tracing::warn!(scenario = %scenario, error = %e, "Connection lost, re-running scenario");
            }
            Err(e) => {
                return Ok(ScenarioReport {
                    scenario,
                    verdict: Verdict::Failed(vec![format!("session error: {e}")]),
                    messages_validated: 0,
                });
            }
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &ValidatorConfig) {
    tracing::info!(
        endpoint = %config.endpoint,
        scenarios = ?config.scenarios,
        metrics_port = config.metrics_port,
        "Configuration loaded"
    );
    tracing::debug!(
        fast_channel_secs = config.timeouts.fast_channel.as_secs(),
        book_secs = config.timeouts.book.as_secs(),
        ack_secs = config.timeouts.ack.as_secs(),
        unsubscribe_secs = config.timeouts.unsubscribe.as_secs(),
        candle_tolerance_ms = config.candle_tolerance.as_millis(),
        "Timeouts"
    );
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
#[allow(clippy::expect_used)]
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, stopping");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, stopping");
        }
    }

    shutdown_token.cancel();
}
