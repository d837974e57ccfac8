//! Retry policy for network calls.
//!
//! A policy is a value handed to each client at construction, so every call
//! site that performs network I/O retries the same way and the behavior is
//! configurable rather than baked into one method.

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

use drivelink_common::config::{RETRY_ATTEMPTS, RETRY_DELAY_MS};
use drivelink_common::{Configuration, Error, Result};

/// How long to wait between attempts.
#[derive(Debug, Clone, PartialEq)]
pub enum Backoff {
    /// Same delay before every retry.
    Fixed(Duration),
    /// Delay grows by `multiplier` per attempt, capped at `max`.
    Exponential {
        initial: Duration,
        max: Duration,
        multiplier: f64,
    },
}

/// Configuration for retry behavior.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one. Never less than 1.
    pub max_attempts: u32,
    /// Delay schedule.
    pub backoff: Backoff,
    /// Whether to add +/- 25% jitter to delays.
    pub jitter: bool,
}

impl RetryPolicy {
    /// Single attempt, no retry.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            backoff: Backoff::Fixed(Duration::ZERO),
            jitter: false,
        }
    }

    /// Fixed delay between attempts.
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff: Backoff::Fixed(delay),
            jitter: false,
        }
    }

    /// Exponential backoff starting at one second, capped at a minute.
    pub fn exponential(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff: Backoff::Exponential {
                initial: Duration::from_secs(1),
                max: Duration::from_secs(60),
                multiplier: 2.0,
            },
            jitter: true,
        }
    }

    /// Enable or disable jitter.
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Apply `DRIVELINK_RETRY_ATTEMPTS` / `DRIVELINK_RETRY_DELAY_MS` on top of
    /// `self`. A delay override switches the schedule to a fixed delay.
    pub fn overridden_by(mut self, config: &Configuration) -> Result<Self> {
        if let Some(attempts) = config.get_parsed::<u32>(RETRY_ATTEMPTS)? {
            if attempts == 0 {
                return Err(Error::Config(format!(
                    "{} must be at least 1",
                    RETRY_ATTEMPTS
                )));
            }
            self.max_attempts = attempts;
        }
        if let Some(delay_ms) = config.get_parsed::<u64>(RETRY_DELAY_MS)? {
            self.backoff = Backoff::Fixed(Duration::from_millis(delay_ms));
        }
        Ok(self)
    }

    /// Calculate delay before retry number `attempt` (0-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_delay = match &self.backoff {
            Backoff::Fixed(delay) => delay.as_millis() as f64,
            Backoff::Exponential {
                initial,
                max,
                multiplier,
            } => {
                let grown = initial.as_millis() as f64 * multiplier.powi(attempt as i32);
                grown.min(max.as_millis() as f64)
            }
        };

        let final_delay = if self.jitter {
            let jitter_factor = 0.75 + (rand::random::<f64>() * 0.5);
            base_delay * jitter_factor
        } else {
            base_delay
        };

        Duration::from_millis(final_delay as u64)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::none()
    }
}

/// Runs operations under a retry policy.
#[derive(Debug, Clone, Default)]
pub struct RetryExecutor {
    policy: RetryPolicy,
}

impl RetryExecutor {
    /// Create a new retry executor.
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    /// Execute an operation, retrying transient errors.
    ///
    /// `operation_name` only feeds the log lines.
    pub async fn execute<F, Fut, T>(&self, operation_name: &str, operation: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.execute_with_condition(operation_name, operation, Error::is_transient)
            .await
    }

    /// Execute with a custom retry condition.
    pub async fn execute_with_condition<F, Fut, T, C>(
        &self,
        operation_name: &str,
        operation: F,
        should_retry: C,
    ) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
        C: Fn(&Error) -> bool,
    {
        let mut attempt = 0;

        loop {
            attempt += 1;
            match operation().await {
                Ok(result) => {
                    if attempt > 1 {
                        debug!("{} succeeded on attempt {}", operation_name, attempt);
                    }
                    return Ok(result);
                }
                Err(err) => {
                    if !should_retry(&err) || attempt >= self.policy.max_attempts {
                        if attempt > 1 {
                            warn!(
                                "{} failed after {} attempts: {}",
                                operation_name, attempt, err
                            );
                        }
                        return Err(err);
                    }

                    let delay = self.policy.delay_for_attempt(attempt - 1);
                    warn!(
                        "{} attempt {} failed: {}. Retrying in {:?}...",
                        operation_name, attempt, err, delay
                    );
                    sleep(delay).await;
                }
            }
        }
    }

    /// Get the retry policy.
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_fixed_delay() {
        let policy = RetryPolicy::fixed(3, Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(0), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(5), Duration::from_secs(2));
    }

    #[test]
    fn test_exponential_delay_calculation() {
        let policy = RetryPolicy::exponential(3).with_jitter(false);

        assert_eq!(policy.delay_for_attempt(0), Duration::from_secs(1));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(4));
        assert_eq!(policy.delay_for_attempt(10), Duration::from_secs(60));
    }

    #[test]
    fn test_zero_attempts_clamped() {
        assert_eq!(RetryPolicy::fixed(0, Duration::ZERO).max_attempts, 1);
    }

    #[test]
    fn test_config_overrides() {
        let config = Configuration::from_pairs([(RETRY_ATTEMPTS, "5"), (RETRY_DELAY_MS, "250")]);
        let policy = RetryPolicy::exponential(2).overridden_by(&config).unwrap();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.backoff, Backoff::Fixed(Duration::from_millis(250)));

        let config = Configuration::from_pairs([(RETRY_ATTEMPTS, "0")]);
        assert!(RetryPolicy::none().overridden_by(&config).is_err());

        let unchanged = RetryPolicy::none()
            .overridden_by(&Configuration::default())
            .unwrap();
        assert_eq!(unchanged, RetryPolicy::none());
    }

    #[tokio::test]
    async fn test_successful_operation() {
        let executor = RetryExecutor::default();
        let result: Result<i32> = executor.execute("answer", || async { Ok(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_retry_on_network_error() {
        let attempt_count = Arc::new(AtomicU32::new(0));
        let count_clone = attempt_count.clone();

        let executor = RetryExecutor::new(RetryPolicy::fixed(3, Duration::from_millis(1)));

        let result: Result<i32> = executor
            .execute("flaky read", move || {
                let count = count_clone.clone();
                async move {
                    let current = count.fetch_add(1, Ordering::SeqCst);
                    if current < 2 {
                        Err(Error::Network("Connection reset".to_string()))
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempt_count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_error() {
        let attempt_count = Arc::new(AtomicU32::new(0));
        let count_clone = attempt_count.clone();

        let executor = RetryExecutor::new(RetryPolicy::fixed(3, Duration::from_millis(1)));

        let result: Result<i32> = executor
            .execute("lookup", move || {
                let count = count_clone.clone();
                async move {
                    count.fetch_add(1, Ordering::SeqCst);
                    Err(Error::NotFound("photo.jpg".to_string()))
                }
            })
            .await;

        assert!(matches!(result, Err(Error::NotFound(_))));
        assert_eq!(attempt_count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_max_attempts_exceeded() {
        let attempt_count = Arc::new(AtomicU32::new(0));
        let count_clone = attempt_count.clone();

        let executor = RetryExecutor::new(RetryPolicy::fixed(3, Duration::from_millis(1)));

        let result: Result<i32> = executor
            .execute("read", move || {
                let count = count_clone.clone();
                async move {
                    count.fetch_add(1, Ordering::SeqCst);
                    Err(Error::remote("read", 503, None, "unavailable"))
                }
            })
            .await;

        assert_eq!(result.unwrap_err().status(), Some(503));
        assert_eq!(attempt_count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_no_retry_policy_runs_once() {
        let attempt_count = Arc::new(AtomicU32::new(0));
        let count_clone = attempt_count.clone();

        let result: Result<()> = RetryExecutor::new(RetryPolicy::none())
            .execute("create", move || {
                let count = count_clone.clone();
                async move {
                    count.fetch_add(1, Ordering::SeqCst);
                    Err(Error::Network("down".to_string()))
                }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(attempt_count.load(Ordering::SeqCst), 1);
    }
}
