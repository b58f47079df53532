//! Retry logic with exponential backoff for handling transient failures.
//!
//! Used wherever the system talks to infrastructure that can fail
//! transiently: bus publishes, saga log appends, compensation dispatch.
//! Backoff is exponential with jitter to avoid thundering herds, capped at a
//! maximum delay, and always bounded in attempts — at-least-once delivery
//! plus idempotency makes giving up safe.
//!
//! # Example
//!
//! ```rust
//! use partnerflow_runtime::retry::{RetryPolicy, retry_with_backoff};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let policy = RetryPolicy::builder()
//!     .max_retries(5)
//!     .initial_delay(Duration::from_millis(100))
//!     .max_delay(Duration::from_secs(10))
//!     .multiplier(2.0)
//!     .build();
//!
//! let result = retry_with_backoff(&policy, || async {
//!     Ok::<_, String>(42)
//! }).await?;
//! # Ok(())
//! # }
//! ```

use std::time::Duration;
use tokio::time::sleep;

/// Retry policy configuration for exponential backoff.
///
/// # Default Values
///
/// - `max_retries`: 3
/// - `initial_delay`: 100ms
/// - `max_delay`: 30 seconds
/// - `multiplier`: 2.0 (delay doubles each retry)
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts (beyond the initial attempt).
    pub max_retries: usize,
    /// Initial delay before first retry.
    pub initial_delay: Duration,
    /// Maximum delay between retries (cap for exponential backoff).
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Create a new policy builder.
    #[must_use]
    pub const fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder {
            max_retries: None,
            initial_delay: None,
            max_delay: None,
            multiplier: None,
        }
    }

    /// Calculate delay for a given attempt number (0-indexed).
    ///
    /// Exponential backoff with jitter:
    /// `min(initial_delay * multiplier^attempt, max_delay) * random(0.5..=1.0)`.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        use rand::Rng;

        let base_ms = self.initial_delay.as_millis() as f64
            * self.multiplier.powi(attempt.min(i32::MAX as usize) as i32);
        let capped_ms = base_ms.min(self.max_delay.as_millis() as f64);

        // Jitter spreads out retries from concurrent callers.
        let jitter = rand::thread_rng().gen_range(0.5..=1.0);
        Duration::from_millis((capped_ms * jitter) as u64)
    }
}

/// Builder for [`RetryPolicy`].
#[derive(Debug, Clone)]
pub struct RetryPolicyBuilder {
    max_retries: Option<usize>,
    initial_delay: Option<Duration>,
    max_delay: Option<Duration>,
    multiplier: Option<f64>,
}

impl RetryPolicyBuilder {
    /// Set maximum number of retries.
    #[must_use]
    pub const fn max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Set initial delay before first retry.
    #[must_use]
    pub const fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = Some(delay);
        self
    }

    /// Set maximum delay (cap for exponential backoff).
    #[must_use]
    pub const fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = Some(delay);
        self
    }

    /// Set multiplier for exponential backoff.
    #[must_use]
    pub const fn multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = Some(multiplier);
        self
    }

    /// Build the [`RetryPolicy`].
    #[must_use]
    pub fn build(self) -> RetryPolicy {
        let defaults = RetryPolicy::default();
        RetryPolicy {
            max_retries: self.max_retries.unwrap_or(defaults.max_retries),
            initial_delay: self.initial_delay.unwrap_or(defaults.initial_delay),
            max_delay: self.max_delay.unwrap_or(defaults.max_delay),
            multiplier: self.multiplier.unwrap_or(defaults.multiplier),
        }
    }
}

/// Retry an async operation with exponential backoff, retrying every error.
///
/// # Errors
///
/// Returns the last error once `policy.max_retries` is exhausted.
pub async fn retry_with_backoff<F, Fut, T, E>(policy: &RetryPolicy, operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    retry_while(policy, operation, |_| true).await
}

/// Retry an async operation with exponential backoff while `retryable`
/// classifies the error as worth retrying.
///
/// Non-retryable errors are returned immediately without sleeping.
///
/// # Errors
///
/// Returns the first non-retryable error, or the last error once
/// `policy.max_retries` is exhausted.
pub async fn retry_while<F, Fut, T, E, P>(
    policy: &RetryPolicy,
    mut operation: F,
    retryable: P,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let mut attempt = 0;

    loop {
        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    tracing::info!(attempt, "operation succeeded after retry");
                }
                return Ok(result);
            },
            Err(err) => {
                if !retryable(&err) {
                    return Err(err);
                }
                if attempt >= policy.max_retries {
                    tracing::warn!(
                        attempt,
                        error = %err,
                        "retries exhausted"
                    );
                    return Err(err);
                }

                let delay = policy.delay_for_attempt(attempt);
                tracing::debug!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "operation failed, backing off"
                );
                sleep(delay).await;
                attempt += 1;
            },
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fast_policy(max_retries: usize) -> RetryPolicy {
        RetryPolicy::builder()
            .max_retries(max_retries)
            .initial_delay(Duration::from_millis(1))
            .max_delay(Duration::from_millis(4))
            .build()
    }

    #[tokio::test]
    async fn succeeds_first_try() {
        let result: Result<i32, String> =
            retry_with_backoff(&fast_policy(3), || async { Ok(7) }).await;
        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test]
    async fn retries_until_success() {
        let calls = AtomicUsize::new(0);
        let result: Result<i32, String> = retry_with_backoff(&fast_policy(5), || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err("transient".to_string())
                } else {
                    Ok(99)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 99);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausts_bounded_attempts() {
        let calls = AtomicUsize::new(0);
        let result: Result<i32, String> = retry_with_backoff(&fast_policy(2), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err("still down".to_string()) }
        })
        .await;

        assert!(result.is_err());
        // Initial attempt plus two retries.
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_errors_return_immediately() {
        let calls = AtomicUsize::new(0);
        let result: Result<i32, String> = retry_while(
            &fast_policy(5),
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("schema".to_string()) }
            },
            |e| e != "schema",
        )
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn delay_is_capped() {
        let policy = RetryPolicy::builder()
            .initial_delay(Duration::from_millis(100))
            .max_delay(Duration::from_millis(250))
            .multiplier(10.0)
            .build();

        // Attempt 3 would be 100s uncapped; jitter keeps it in [125, 250].
        let delay = policy.delay_for_attempt(3);
        assert!(delay <= Duration::from_millis(250));
    }
}
