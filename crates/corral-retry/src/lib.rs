//! Retry strategies and backoff policies for corral's per-repository
//! state machine (§4.3).
//!
//! A repository's clone/sync attempt moves `pending -> in_progress ->
//! {completed|failed}`, with a failed attempt re-entering `in_progress`
//! for as long as the configured strategy allows. This crate owns the
//! backoff arithmetic and the error classification that decides whether
//! a given failure is worth retrying at all.

use std::time::Duration;

use corral_types::CorralError;
use serde::{Deserialize, Serialize};

/// Strategy type for retry behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryStrategyType {
    /// No delay between retries - retry immediately
    Immediate,
    /// Exponential backoff: delay doubles each attempt (default)
    #[default]
    Exponential,
    /// Linear backoff: delay increases linearly each attempt
    Linear,
    /// Constant delay: same delay every attempt
    Constant,
}

/// Predefined retry policies with sensible defaults for different use cases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryPolicy {
    /// Default balanced retry behavior - good for most orgs
    #[default]
    Default,
    /// Aggressive retries - more attempts, faster recovery
    Aggressive,
    /// Conservative retries - fewer attempts, longer delays
    Conservative,
    /// Fully custom configuration via the config file's `retry` section
    Custom,
}

impl RetryPolicy {
    pub fn to_config(self) -> RetryStrategyConfig {
        match self {
            RetryPolicy::Default => RetryStrategyConfig {
                strategy: RetryStrategyType::Exponential,
                max_attempts: 5,
                base_delay: Duration::from_secs(2),
                max_delay: Duration::from_secs(60),
                jitter: 0.5,
            },
            RetryPolicy::Aggressive => RetryStrategyConfig {
                strategy: RetryStrategyType::Exponential,
                max_attempts: 10,
                base_delay: Duration::from_millis(500),
                max_delay: Duration::from_secs(30),
                jitter: 0.3,
            },
            RetryPolicy::Conservative => RetryStrategyConfig {
                strategy: RetryStrategyType::Linear,
                max_attempts: 3,
                base_delay: Duration::from_secs(5),
                max_delay: Duration::from_secs(60),
                jitter: 0.1,
            },
            RetryPolicy::Custom => RetryStrategyConfig::default(),
        }
    }
}

/// Configuration for a retry strategy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryStrategyConfig {
    #[serde(default)]
    pub strategy: RetryStrategyType,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay")]
    #[serde(with = "humantime_serde")]
    pub base_delay: Duration,
    #[serde(default = "default_max_delay")]
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

fn default_max_attempts() -> u32 {
    5
}

fn default_base_delay() -> Duration {
    Duration::from_secs(2)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(60)
}

fn default_jitter() -> f64 {
    0.5
}

impl Default for RetryStrategyConfig {
    fn default() -> Self {
        RetryPolicy::Default.to_config()
    }
}

/// Error classification for retry decisions, derived from
/// [`CorralError::retryable`] (§4.1's classifier table).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    #[default]
    Retryable,
    Permanent,
}

impl ErrorClass {
    pub fn classify(error: &CorralError) -> Self {
        if error.retryable() {
            ErrorClass::Retryable
        } else {
            ErrorClass::Permanent
        }
    }
}

/// Calculate the delay before the next retry attempt (1-indexed).
pub fn calculate_delay(config: &RetryStrategyConfig, attempt: u32) -> Duration {
    let delay = match config.strategy {
        RetryStrategyType::Immediate => Duration::ZERO,
        RetryStrategyType::Exponential => {
            let pow = attempt.saturating_sub(1).min(16);
            config.base_delay.saturating_mul(2_u32.saturating_pow(pow))
        }
        RetryStrategyType::Linear => config.base_delay.saturating_mul(attempt),
        RetryStrategyType::Constant => config.base_delay,
    };

    let capped = delay.min(config.max_delay);

    if config.jitter > 0.0 {
        apply_jitter(capped, config.jitter)
    } else {
        capped
    }
}

/// Apply jitter to a delay value. Jitter factor of 0.5 means delay * (0.5 to 1.5).
fn apply_jitter(delay: Duration, jitter: f64) -> Duration {
    use rand::Rng;

    let jitter_range = 2.0 * jitter;
    let mut rng = rand::thread_rng();
    let random_value: f64 = rng.r#gen();
    let random_factor = 1.0 - jitter + (random_value * jitter_range);
    let millis = (delay.as_millis() as f64 * random_factor).round() as u64;
    Duration::from_millis(millis)
}

/// Runs a fallible operation under a configured retry strategy, checking a
/// caller-supplied cancellation predicate before each attempt and before
/// each backoff sleep so a `Ctrl-C` during a long wait doesn't block
/// shutdown (§5 "Cancellation").
pub struct RetryExecutor {
    config: RetryStrategyConfig,
}

impl RetryExecutor {
    pub fn new(config: RetryStrategyConfig) -> Self {
        Self { config }
    }

    pub fn from_policy(policy: RetryPolicy) -> Self {
        Self::new(policy.to_config())
    }

    pub fn max_attempts(&self) -> u32 {
        self.config.max_attempts
    }

    /// Run `operation` (receiving the 1-indexed attempt number), retrying
    /// per the configured strategy as long as `is_cancelled` returns
    /// false. Returns `CorralError::Cancelled` immediately if cancellation
    /// is observed either before an attempt or during a backoff wait.
    pub fn run<T>(
        &self,
        is_cancelled: impl Fn() -> bool,
        mut operation: impl FnMut(u32) -> Result<T, CorralError>,
    ) -> Result<T, CorralError> {
        let mut attempt = 1;

        loop {
            if is_cancelled() {
                return Err(CorralError::cancelled(corral_types::ErrorContext::new(
                    "retry",
                )));
            }

            match operation(attempt) {
                Ok(result) => return Ok(result),
                Err(e) => {
                    if !e.retryable() || attempt >= self.config.max_attempts {
                        return Err(e);
                    }

                    let delay = calculate_delay(&self.config, attempt);
                    if wait_or_cancel(delay, &is_cancelled) {
                        return Err(CorralError::cancelled(corral_types::ErrorContext::new(
                            "retry",
                        )));
                    }
                    attempt += 1;
                }
            }
        }
    }
}

/// Sleep for `delay`, polling `is_cancelled` in short slices so a
/// cancellation during a multi-second backoff wait is noticed promptly.
/// Returns `true` if cancellation was observed.
fn wait_or_cancel(delay: Duration, is_cancelled: &impl Fn() -> bool) -> bool {
    const SLICE: Duration = Duration::from_millis(100);
    let mut remaining = delay;
    while remaining > Duration::ZERO {
        if is_cancelled() {
            return true;
        }
        let step = remaining.min(SLICE);
        std::thread::sleep(step);
        remaining -= step;
    }
    is_cancelled()
}

#[cfg(test)]
mod tests {
    use super::*;
    use corral_types::ErrorContext;

    fn network_err() -> CorralError {
        CorralError::Network {
            ctx: ErrorContext::new("clone"),
            message: "connection reset".into(),
        }
    }

    fn auth_err() -> CorralError {
        CorralError::Auth {
            ctx: ErrorContext::new("clone"),
            message: "bad token".into(),
        }
    }

    #[test]
    fn policy_default_matches_documented_shape() {
        let config = RetryPolicy::Default.to_config();
        assert_eq!(config.strategy, RetryStrategyType::Exponential);
        assert_eq!(config.max_attempts, 5);
    }

    #[test]
    fn calculate_delay_exponential_doubles_and_caps() {
        let config = RetryStrategyConfig {
            strategy: RetryStrategyType::Exponential,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            jitter: 0.0,
            max_attempts: 10,
        };
        assert_eq!(calculate_delay(&config, 1), Duration::from_secs(1));
        assert_eq!(calculate_delay(&config, 2), Duration::from_secs(2));
        assert_eq!(calculate_delay(&config, 4), Duration::from_secs(8));
        assert_eq!(calculate_delay(&config, 10), Duration::from_secs(10));
    }

    #[test]
    fn calculate_delay_linear_and_constant() {
        let linear = RetryStrategyConfig {
            strategy: RetryStrategyType::Linear,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(100),
            jitter: 0.0,
            max_attempts: 10,
        };
        assert_eq!(calculate_delay(&linear, 3), Duration::from_secs(3));

        let constant = RetryStrategyConfig {
            strategy: RetryStrategyType::Constant,
            base_delay: Duration::from_secs(4),
            max_delay: Duration::from_secs(100),
            jitter: 0.0,
            max_attempts: 10,
        };
        assert_eq!(calculate_delay(&constant, 1), Duration::from_secs(4));
        assert_eq!(calculate_delay(&constant, 9), Duration::from_secs(4));
    }

    #[test]
    fn classify_matches_retryable_table() {
        assert_eq!(ErrorClass::classify(&network_err()), ErrorClass::Retryable);
        assert_eq!(ErrorClass::classify(&auth_err()), ErrorClass::Permanent);
    }

    #[test]
    fn executor_succeeds_after_transient_failures() {
        let executor = RetryExecutor::new(RetryStrategyConfig {
            strategy: RetryStrategyType::Immediate,
            max_attempts: 5,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter: 0.0,
        });

        let mut attempts = 0;
        let result = executor.run(
            || false,
            |attempt| {
                attempts = attempt;
                if attempt < 3 {
                    Err(network_err())
                } else {
                    Ok("cloned")
                }
            },
        );
        assert_eq!(result.unwrap(), "cloned");
        assert_eq!(attempts, 3);
    }

    #[test]
    fn executor_does_not_retry_permanent_errors() {
        let executor = RetryExecutor::from_policy(RetryPolicy::Aggressive);
        let mut calls = 0;
        let result = executor.run(
            || false,
            |_attempt| {
                calls += 1;
                Err::<(), _>(auth_err())
            },
        );
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }

    #[test]
    fn executor_stops_at_max_attempts() {
        let executor = RetryExecutor::new(RetryStrategyConfig {
            strategy: RetryStrategyType::Immediate,
            max_attempts: 3,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter: 0.0,
        });
        let mut calls = 0;
        let result = executor.run(
            || false,
            |_attempt| {
                calls += 1;
                Err::<(), _>(network_err())
            },
        );
        assert!(result.is_err());
        assert_eq!(calls, 3);
    }

    #[test]
    fn executor_honors_cancellation_before_attempt() {
        let executor = RetryExecutor::from_policy(RetryPolicy::Default);
        let mut calls = 0;
        let result = executor.run(
            || true,
            |_attempt| {
                calls += 1;
                Ok::<_, CorralError>(())
            },
        );
        assert!(matches!(result, Err(CorralError::Cancelled { .. })));
        assert_eq!(calls, 0);
    }

    #[test]
    fn executor_honors_cancellation_during_backoff() {
        let executor = RetryExecutor::new(RetryStrategyConfig {
            strategy: RetryStrategyType::Constant,
            max_attempts: 5,
            base_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(5),
            jitter: 0.0,
        });
        let mut calls = 0;
        let result = executor.run(
            || calls >= 1,
            |_attempt| {
                calls += 1;
                Err::<(), _>(network_err())
            },
        );
        assert!(matches!(result, Err(CorralError::Cancelled { .. })));
        assert_eq!(calls, 1);
    }

    proptest::proptest! {
        #[test]
        fn delay_never_exceeds_max(base_ms in 1u64..5000, max_ms in 1u64..60_000, attempt in 1u32..20) {
            let config = RetryStrategyConfig {
                strategy: RetryStrategyType::Exponential,
                base_delay: Duration::from_millis(base_ms),
                max_delay: Duration::from_millis(max_ms),
                jitter: 0.0,
                max_attempts: 20,
            };
            let delay = calculate_delay(&config, attempt);
            proptest::prop_assert!(delay <= Duration::from_millis(max_ms));
        }
    }
}
