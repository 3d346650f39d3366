//! Validator Configuration Settings
//!
//! Configuration types for the validator, loaded from environment variables
//! (optionally seeded from a `.env` file by the binary).

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use chrono::TimeDelta;

use crate::domain::market::Channel;
use crate::domain::validation::semantic::DEFAULT_CANDLE_TOLERANCE;
use crate::infrastructure::kraken::reconnect::ReconnectConfig;
use crate::infrastructure::kraken::session::{DEFAULT_ENDPOINT, SessionConfig};
use crate::infrastructure::kraken::timeout::TimeoutPolicy;

/// Largest accepted backoff multiplier.
pub const MAX_DELAY_MULTIPLIER: f64 = 10.0;

/// Reconnect backoff settings for the binary's connect loop.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectSettings {
    /// Initial reconnection delay.
    pub delay_initial: Duration,
    /// Maximum reconnection delay.
    pub delay_max: Duration,
    /// Reconnection delay multiplier for exponential backoff.
    pub delay_multiplier: f64,
    /// Maximum attempts before giving up (0 = unlimited).
    pub max_attempts: u32,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        let defaults = ReconnectConfig::default();
        Self {
            delay_initial: defaults.initial_delay,
            delay_max: defaults.max_delay,
            delay_multiplier: defaults.multiplier,
            max_attempts: defaults.max_attempts,
        }
    }
}

impl ReconnectSettings {
    /// Backoff configuration for [`ReconnectPolicy`](crate::infrastructure::kraken::ReconnectPolicy).
    #[must_use]
    pub fn to_reconnect_config(&self) -> ReconnectConfig {
        ReconnectConfig {
            initial_delay: self.delay_initial,
            max_delay: self.delay_max,
            multiplier: self.delay_multiplier,
            max_attempts: self.max_attempts,
            ..ReconnectConfig::default()
        }
    }
}

/// Complete validator configuration.
#[derive(Debug, Clone)]
pub struct ValidatorConfig {
    /// WebSocket endpoint.
    pub endpoint: String,
    /// Wait bounds.
    pub timeouts: TimeoutPolicy,
    /// Allowed deviation between candle elapsed time and its interval.
    pub candle_tolerance: Duration,
    /// Directory with schema overrides (`<channel>.json`).
    pub schema_dir: Option<PathBuf>,
    /// Reconnect backoff.
    pub reconnect: ReconnectSettings,
    /// Prometheus metrics port (0 = disabled).
    pub metrics_port: u16,
    /// Scenario names to run (empty = all).
    pub scenarios: Vec<String>,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            timeouts: TimeoutPolicy::default(),
            candle_tolerance: Duration::from_secs(1),
            schema_dir: None,
            reconnect: ReconnectSettings::default(),
            metrics_port: 0,
            scenarios: Vec::new(),
        }
    }
}

impl ValidatorConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable holds an unusable value.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// Unset keys take their defaults. Numeric values that do not parse fall
    /// back to the default as well.
    ///
    /// # Errors
    ///
    /// Returns an error if the endpoint is not a WebSocket URL, the
    /// tolerant channel list names an unknown channel, or the backoff
    /// multiplier lies outside `1..=MAX_DELAY_MULTIPLIER`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let env = EnvReader { lookup };

        let endpoint = match env.get("KRAKEN_WS_URL") {
            Some(url) if url.is_empty() => {
                return Err(ConfigError::EmptyValue("KRAKEN_WS_URL".to_string()));
            }
            Some(url) if !(url.starts_with("ws://") || url.starts_with("wss://")) => {
                return Err(ConfigError::InvalidValue {
                    key: "KRAKEN_WS_URL".to_string(),
                    value: url,
                    reason: "expected a ws:// or wss:// URL".to_string(),
                });
            }
            Some(url) => url,
            None => defaults.endpoint,
        };

        let default_timeouts = TimeoutPolicy::default();
        let unsubscribe_tolerant = match env.get("VALIDATOR_UNSUBSCRIBE_TOLERANT_CHANNELS") {
            Some(list) => parse_channel_list("VALIDATOR_UNSUBSCRIBE_TOLERANT_CHANNELS", &list)?,
            None => default_timeouts.unsubscribe_tolerant.clone(),
        };

        let timeouts = TimeoutPolicy {
            fast_channel: env.duration_secs(
                "VALIDATOR_FAST_CHANNEL_TIMEOUT_SECS",
                default_timeouts.fast_channel,
            ),
            book: env.duration_secs("VALIDATOR_BOOK_TIMEOUT_SECS", default_timeouts.book),
            candle_grace: env.duration_secs(
                "VALIDATOR_CANDLE_GRACE_SECS",
                default_timeouts.candle_grace,
            ),
            ack: env.duration_secs("VALIDATOR_ACK_TIMEOUT_SECS", default_timeouts.ack),
            unsubscribe: env.duration_secs(
                "VALIDATOR_UNSUBSCRIBE_TIMEOUT_SECS",
                default_timeouts.unsubscribe,
            ),
            connect: env.duration_secs("VALIDATOR_CONNECT_TIMEOUT_SECS", default_timeouts.connect),
            unsubscribe_tolerant,
        };

        let reconnect = ReconnectSettings {
            delay_initial: env.duration_millis(
                "VALIDATOR_RECONNECT_DELAY_INITIAL_MS",
                defaults.reconnect.delay_initial,
            ),
            delay_max: env.duration_secs(
                "VALIDATOR_RECONNECT_DELAY_MAX_SECS",
                defaults.reconnect.delay_max,
            ),
            delay_multiplier: parse_multiplier(&env, defaults.reconnect.delay_multiplier)?,
            max_attempts: env.parse(
                "VALIDATOR_MAX_RECONNECT_ATTEMPTS",
                defaults.reconnect.max_attempts,
            ),
        };

        let scenarios = env
            .get("VALIDATOR_SCENARIOS")
            .map(|list| {
                list.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(ToString::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            endpoint,
            timeouts,
            candle_tolerance: env.duration_millis(
                "VALIDATOR_CANDLE_TOLERANCE_MS",
                defaults.candle_tolerance,
            ),
            schema_dir: env
                .get("VALIDATOR_SCHEMA_DIR")
                .filter(|dir| !dir.is_empty())
                .map(PathBuf::from),
            reconnect,
            metrics_port: env.parse("VALIDATOR_METRICS_PORT", defaults.metrics_port),
            scenarios,
        })
    }

    /// Session settings derived from this configuration.
    #[must_use]
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            endpoint: self.endpoint.clone(),
            timeouts: self.timeouts.clone(),
            candle_tolerance: TimeDelta::from_std(self.candle_tolerance)
                .unwrap_or(DEFAULT_CANDLE_TOLERANCE),
        }
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),

    /// Environment variable holds an unusable value.
    #[error("invalid value {value:?} for {key}: {reason}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// Value found.
        value: String,
        /// Why it was rejected.
        reason: String,
    },
}

struct EnvReader<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> EnvReader<F> {
    fn get(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
    }

    fn parse<T: std::str::FromStr>(&self, key: &str, default: T) -> T {
        self.get(key)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }

    fn duration_secs(&self, key: &str, default: Duration) -> Duration {
        self.get(key)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map_or(default, Duration::from_secs)
    }

    fn duration_millis(&self, key: &str, default: Duration) -> Duration {
        self.get(key)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map_or(default, Duration::from_millis)
    }
}

fn parse_multiplier<F: Fn(&str) -> Option<String>>(
    env: &EnvReader<F>,
    default: f64,
) -> Result<f64, ConfigError> {
    const KEY: &str = "VALIDATOR_RECONNECT_DELAY_MULTIPLIER";
    let multiplier = env.parse(KEY, default);
    if (1.0..=MAX_DELAY_MULTIPLIER).contains(&multiplier) {
        Ok(multiplier)
    } else {
        Err(ConfigError::InvalidValue {
            key: KEY.to_string(),
            value: multiplier.to_string(),
            reason: format!("expected a multiplier between 1 and {MAX_DELAY_MULTIPLIER}"),
        })
    }
}

fn parse_channel_list(key: &str, list: &str) -> Result<HashSet<Channel>, ConfigError> {
    list.split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(|name| {
            Channel::from_str_case_insensitive(name).ok_or_else(|| ConfigError::InvalidValue {
                key: key.to_string(),
                value: name.to_string(),
                reason: "unknown channel".to_string(),
            })
        })
        .collect()
}
