//! Reconnection Policy
//!
//! Exponential backoff with jitter for re-opening a session after a
//! connect failure or a fatal connection error.
//!
//! The session never reconnects on its own. Callers that want retries wrap
//! their connect call in [`retry_connect`], then re-issue their
//! subscriptions on the new session.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;

/// Backoff parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound on any delay.
    pub max_delay: Duration,
    /// Growth factor per attempt.
    pub multiplier: f64,
    /// Jitter as a fraction of the delay (0.1 = +/-10%).
    pub jitter_factor: f64,
    /// Attempts before giving up (0 = unlimited).
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter_factor: 0.1,
            max_attempts: 5,
        }
    }
}

/// Backoff state across consecutive failures.
///
/// # Example
///
/// ```rust
/// use kraken_feed_validator::infrastructure::kraken::reconnect::{ReconnectConfig, ReconnectPolicy};
///
/// let mut policy = ReconnectPolicy::new(ReconnectConfig::default());
/// assert!(policy.next_delay().is_some());
/// policy.reset();
/// assert_eq!(policy.attempt_count(), 0);
/// ```
#[derive(Debug)]
pub struct ReconnectPolicy {
    config: ReconnectConfig,
    current_delay: Duration,
    attempt_count: u32,
}

impl ReconnectPolicy {
    /// Create a policy at its initial delay.
    #[must_use]
    pub const fn new(config: ReconnectConfig) -> Self {
        let initial_delay = config.initial_delay;
        Self {
            config,
            current_delay: initial_delay,
            attempt_count: 0,
        }
    }

    /// Delay before the next attempt, or `None` once attempts are exhausted.
    #[must_use]
    pub fn next_delay(&mut self) -> Option<Duration> {
        if !self.should_retry() {
            return None;
        }
        self.attempt_count += 1;

        let delay = self.apply_jitter(self.current_delay);
        self.current_delay = self.grow(self.current_delay);

        Some(delay)
    }

    /// Back to the initial delay after a successful connect.
    pub const fn reset(&mut self) {
        self.current_delay = self.config.initial_delay;
        self.attempt_count = 0;
    }

    /// Attempts made since the last reset.
    #[must_use]
    pub const fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    /// Whether another attempt is allowed.
    #[must_use]
    pub const fn should_retry(&self) -> bool {
        self.config.max_attempts == 0 || self.attempt_count < self.config.max_attempts
    }

    /// Next base delay. Saturates at `max_delay`, including when the
    /// product is not representable.
    fn grow(&self, delay: Duration) -> Duration {
        let scaled = delay.as_secs_f64() * self.config.multiplier.max(1.0);
        Duration::try_from_secs_f64(scaled)
            .map_or(self.config.max_delay, |next| next.min(self.config.max_delay))
    }

    fn apply_jitter(&self, duration: Duration) -> Duration {
        let base = duration.as_secs_f64();
        let range = base * self.config.jitter_factor;
        if !range.is_finite() || range <= 0.0 {
            return duration;
        }

        let jitter: f64 = rand::rng().random_range(-range..=range);
        Duration::try_from_secs_f64((base + jitter).max(0.001)).unwrap_or(duration)
    }
}

/// Errors from a retried connect.
#[derive(Debug, thiserror::Error)]
pub enum ReconnectError<E: std::error::Error + 'static> {
    /// Every attempt failed.
    #[error("gave up after {attempts} attempts: {last}")]
    MaxAttemptsExceeded {
        /// Attempts made.
        attempts: u32,
        /// Error from the last attempt.
        #[source]
        last: E,
    },

    /// Cancelled while waiting to retry.
    #[error("cancelled while reconnecting")]
    Cancelled,
}

/// Run `connect` until it succeeds, attempts are exhausted or `cancel` fires.
///
/// # Errors
///
/// Returns [`ReconnectError::MaxAttemptsExceeded`] with the last error, or
/// [`ReconnectError::Cancelled`].
pub async fn retry_connect<T, E, F, Fut>(
    policy: &mut ReconnectPolicy,
    cancel: &CancellationToken,
    mut connect: F,
) -> Result<T, ReconnectError<E>>
where
    E: std::error::Error + 'static,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    loop {
        let error = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(ReconnectError::Cancelled),
            result = connect() => match result {
                Ok(value) => {
                    policy.reset();
                    return Ok(value);
                }
                Err(e) => e,
            },
        };

        let Some(delay) = policy.next_delay() else {
            return Err(ReconnectError::MaxAttemptsExceeded {
                attempts: policy.attempt_count() + 1,
                last: error,
            });
        };

        tracing::warn!(
            error = %error,
            attempt = policy.attempt_count(),
            delay_ms = delay.as_millis(),
            "Connect failed, retrying"
        );

        tokio::select! {
            () = cancel.cancelled() => return Err(ReconnectError::Cancelled),
            () = tokio::time::sleep(delay) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn no_jitter(max_attempts: u32) -> ReconnectConfig {
        ReconnectConfig {
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(40),
            multiplier: 2.0,
            jitter_factor: 0.0,
            max_attempts,
        }
    }

    #[derive(Debug, thiserror::Error)]
    #[error("refused")]
    struct Refused;

    #[test]
    fn backoff_doubles_up_to_cap() {
        let mut policy = ReconnectPolicy::new(no_jitter(0));
        let delays: Vec<u128> = (0..4)
            .filter_map(|_| policy.next_delay())
            .map(|d| d.as_millis())
            .collect();
        assert_eq!(delays, vec![10, 20, 40, 40]);
    }

    #[test]
    fn unrepresentable_growth_saturates_at_cap() {
        for multiplier in [1e30, f64::INFINITY, f64::NAN] {
            let mut policy = ReconnectPolicy::new(ReconnectConfig {
                multiplier,
                ..no_jitter(0)
            });
            let delays: Vec<u128> = (0..3)
                .filter_map(|_| policy.next_delay())
                .map(|d| d.as_millis())
                .collect();
            let expected = if multiplier.is_nan() { vec![10, 10, 10] } else { vec![10, 40, 40] };
            assert_eq!(delays, expected, "multiplier {multiplier}");
        }
    }

    #[test]
    fn attempts_are_bounded() {
        let mut policy = ReconnectPolicy::new(no_jitter(2));
        assert!(policy.next_delay().is_some());
        assert!(policy.next_delay().is_some());
        assert!(policy.next_delay().is_none());
        assert!(!policy.should_retry());

        policy.reset();
        assert!(policy.should_retry());
        assert_eq!(policy.next_delay(), Some(Duration::from_millis(10)));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        for _ in 0..100 {
            let mut policy = ReconnectPolicy::new(ReconnectConfig {
                initial_delay: Duration::from_millis(1000),
                jitter_factor: 0.1,
                ..ReconnectConfig::default()
            });
            let millis = policy.next_delay().unwrap().as_millis();
            assert!((900..=1100).contains(&millis), "delay {millis}ms out of bounds");
        }
    }

    #[tokio::test]
    async fn retry_succeeds_after_failures() {
        let calls = AtomicU32::new(0);
        let mut policy = ReconnectPolicy::new(no_jitter(5));

        let result = retry_connect(&mut policy, &CancellationToken::new(), || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(Refused)
            } else {
                Ok("connected")
            }
        })
        .await;

        assert_eq!(result.unwrap(), "connected");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(policy.attempt_count(), 0);
    }

    #[tokio::test]
    async fn retry_gives_up_with_last_error() {
        let mut policy = ReconnectPolicy::new(no_jitter(2));
        let result: Result<(), _> =
            retry_connect(&mut policy, &CancellationToken::new(), || async { Err(Refused) }).await;

        assert!(matches!(
            result,
            Err(ReconnectError::MaxAttemptsExceeded { attempts: 3, .. })
        ));
    }

    #[tokio::test]
    async fn retry_stops_on_cancel() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut policy = ReconnectPolicy::new(no_jitter(0));
        let result: Result<(), ReconnectError<Refused>> =
            retry_connect(&mut policy, &cancel, || async { Err(Refused) }).await;

        assert!(matches!(result, Err(ReconnectError::Cancelled)));
    }

    #[tokio::test]
    async fn cancel_interrupts_backoff_sleep() {
        let cancel = CancellationToken::new();
        let mut policy = ReconnectPolicy::new(ReconnectConfig {
            initial_delay: Duration::from_secs(60),
            max_delay: Duration::from_secs(60),
            ..no_jitter(0)
        });

        let mut retry = tokio_test::task::spawn(retry_connect(&mut policy, &cancel, || async {
            Err::<(), _>(Refused)
        }));
        tokio_test::assert_pending!(retry.poll());

        cancel.cancel();
        assert!(retry.is_woken());
        let result = tokio_test::assert_ready!(retry.poll());
        assert!(matches!(result, Err(ReconnectError::Cancelled)));
    }
}
