//! Exponential backoff for job redelivery and outbound gateway calls.
//!
//! Jobs that fail with [`JobError::Retryable`] are redelivered after
//! [`RetryPolicy::delay_for_attempt`] until `max_attempts` deliveries have
//! failed, after which [`RetryPolicy::decide`] sends them to the dead-letter
//! table. Fatal failures skip the retries entirely.
//!
//! # Example
//!
//! ```rust
//! use boxoffice_runtime::retry::{RetryDecision, RetryPolicy};
//! use boxoffice_core::JobError;
//! use std::time::Duration;
//!
//! let policy = RetryPolicy::builder()
//!     .max_attempts(3)
//!     .initial_delay(Duration::from_secs(1))
//!     .jitter(false)
//!     .build();
//!
//! let transient = JobError::Retryable("store unavailable".into());
//! assert_eq!(
//!     policy.decide(0, &transient),
//!     RetryDecision::Redeliver(Duration::from_secs(1))
//! );
//! assert_eq!(policy.decide(2, &transient), RetryDecision::DeadLetter);
//! ```

use boxoffice_core::JobError;
use std::time::Duration;
use tokio::time::sleep;

/// Backoff configuration.
///
/// # Default Values
///
/// - `max_attempts`: 8
/// - `initial_delay`: 1 second
/// - `max_delay`: 10 minutes
/// - `multiplier`: 2.0
/// - `jitter`: on
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Deliveries allowed before giving up
    pub max_attempts: u32,
    /// Delay before the first redelivery
    pub initial_delay: Duration,
    /// Cap for the exponential growth
    pub max_delay: Duration,
    /// Growth factor per attempt
    pub multiplier: f64,
    /// Spread delays over `[0.5, 1.0]` of the computed value
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 8,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(600),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

/// What to do with a job whose delivery failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Deliver again after the delay
    Redeliver(Duration),
    /// Park in the dead-letter table
    DeadLetter,
}

impl RetryPolicy {
    /// Create a new policy builder.
    #[must_use]
    pub fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder {
            policy: Self::default(),
        }
    }

    /// Delay before redelivery number `attempt + 1` (0-indexed).
    ///
    /// `initial_delay * multiplier^attempt`, capped at `max_delay`, then
    /// jittered when enabled.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        use rand::Rng;

        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let base_secs = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let capped_secs = base_secs.min(self.max_delay.as_secs_f64());

        let secs = if self.jitter {
            capped_secs * rand::thread_rng().gen_range(0.5..=1.0)
        } else {
            capped_secs
        };
        Duration::try_from_secs_f64(secs).unwrap_or(self.max_delay)
    }

    /// Disposition of a job that has already failed `previous_attempts` times
    /// and just failed again with `error`.
    #[must_use]
    pub fn decide(&self, previous_attempts: u32, error: &JobError) -> RetryDecision {
        match error {
            JobError::Fatal(_) => RetryDecision::DeadLetter,
            JobError::Retryable(_) if previous_attempts.saturating_add(1) >= self.max_attempts => {
                RetryDecision::DeadLetter
            },
            JobError::Retryable(_) => {
                RetryDecision::Redeliver(self.delay_for_attempt(previous_attempts))
            },
        }
    }
}

/// Builder for [`RetryPolicy`].
#[derive(Debug, Clone)]
pub struct RetryPolicyBuilder {
    policy: RetryPolicy,
}

impl RetryPolicyBuilder {
    /// Set the number of deliveries allowed.
    #[must_use]
    pub const fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.policy.max_attempts = max_attempts;
        self
    }

    /// Set the delay before the first redelivery.
    #[must_use]
    pub const fn initial_delay(mut self, delay: Duration) -> Self {
        self.policy.initial_delay = delay;
        self
    }

    /// Set the cap for exponential backoff.
    #[must_use]
    pub const fn max_delay(mut self, delay: Duration) -> Self {
        self.policy.max_delay = delay;
        self
    }

    /// Set the growth factor.
    #[must_use]
    pub const fn multiplier(mut self, multiplier: f64) -> Self {
        self.policy.multiplier = multiplier;
        self
    }

    /// Enable or disable jitter.
    #[must_use]
    pub const fn jitter(mut self, jitter: bool) -> Self {
        self.policy.jitter = jitter;
        self
    }

    /// Build the [`RetryPolicy`].
    #[must_use]
    pub fn build(self) -> RetryPolicy {
        self.policy
    }
}

/// Retry an async operation while `is_retryable` says the error is transient.
///
/// The operation runs at most `policy.max_attempts` times (at least once).
///
/// # Errors
///
/// Returns the first non-retryable error, or the last error once the
/// attempts are used up.
///
/// # Example
///
/// ```rust
/// use boxoffice_runtime::retry::{RetryPolicy, retry_with_predicate};
///
/// # async fn example() -> Result<(), String> {
/// let result = retry_with_predicate(
///     &RetryPolicy::default(),
///     || async { Ok::<_, String>(42) },
///     |err: &String| err.contains("transient"),
/// ).await?;
/// assert_eq!(result, 42);
/// # Ok(())
/// # }
/// ```
pub async fn retry_with_predicate<F, Fut, T, E, P>(
    policy: &RetryPolicy,
    mut operation: F,
    is_retryable: P,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let mut attempt: u32 = 0;

    loop {
        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    tracing::info!(attempt, "Operation succeeded after retry");
                }
                return Ok(result);
            },
            Err(err) => {
                if !is_retryable(&err) {
                    tracing::debug!(error = %err, "Error is not retryable, failing immediately");
                    return Err(err);
                }
                attempt += 1;
                if attempt >= policy.max_attempts {
                    tracing::error!(attempt, error = %err, "Operation failed after max attempts");
                    return Err(err);
                }

                let delay = policy.delay_for_attempt(attempt - 1);
                tracing::warn!(
                    attempt,
                    delay_ms = delay.as_millis(),
                    error = %err,
                    "Operation failed, retrying"
                );
                sleep(delay).await;
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fixed() -> RetryPolicy {
        RetryPolicy::builder()
            .initial_delay(Duration::from_millis(100))
            .multiplier(2.0)
            .max_delay(Duration::from_secs(10))
            .jitter(false)
            .build()
    }

    #[test]
    fn test_delay_grows_exponentially() {
        let policy = fixed();
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(800));
    }

    #[test]
    fn test_delay_is_capped() {
        let policy = RetryPolicy::builder()
            .initial_delay(Duration::from_secs(1))
            .multiplier(10.0)
            .max_delay(Duration::from_secs(2))
            .jitter(false)
            .build();
        assert_eq!(policy.delay_for_attempt(5), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(u32::MAX), Duration::from_secs(2));
    }

    #[test]
    fn test_jitter_stays_within_half_to_full_delay() {
        let policy = RetryPolicy::builder()
            .initial_delay(Duration::from_secs(4))
            .build();
        for _ in 0..50 {
            let delay = policy.delay_for_attempt(0);
            assert!(delay >= Duration::from_secs(2) && delay <= Duration::from_secs(4));
        }
    }

    #[test]
    fn test_fatal_errors_are_dead_lettered_immediately() {
        let policy = fixed();
        assert_eq!(
            policy.decide(0, &JobError::Fatal("unknown event".into())),
            RetryDecision::DeadLetter
        );
    }

    #[test]
    fn test_retryable_errors_dead_letter_after_max_attempts() {
        let policy = RetryPolicy::builder().max_attempts(3).jitter(false).build();
        let error = JobError::Retryable("down".into());
        assert!(matches!(policy.decide(0, &error), RetryDecision::Redeliver(_)));
        assert!(matches!(policy.decide(1, &error), RetryDecision::Redeliver(_)));
        assert_eq!(policy.decide(2, &error), RetryDecision::DeadLetter);
    }

    #[tokio::test]
    async fn test_retry_succeeds_after_transient_failures() {
        let policy = RetryPolicy::builder()
            .max_attempts(3)
            .initial_delay(Duration::from_millis(5))
            .build();
        let counter = Arc::new(AtomicUsize::new(0));
        let calls = Arc::clone(&counter);

        let result = retry_with_predicate(
            &policy,
            || {
                let c = Arc::clone(&calls);
                async move {
                    let attempt = c.fetch_add(1, Ordering::SeqCst);
                    if attempt < 2 { Err(format!("transient {attempt}")) } else { Ok(42) }
                }
            },
            |err: &String| err.contains("transient"),
        )
        .await;

        assert_eq!(result, Ok(42));
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_stops_at_max_attempts() {
        let policy = RetryPolicy::builder()
            .max_attempts(2)
            .initial_delay(Duration::from_millis(5))
            .build();
        let counter = Arc::new(AtomicUsize::new(0));
        let calls = Arc::clone(&counter);

        let result = retry_with_predicate(
            &policy,
            || {
                let c = Arc::clone(&calls);
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err::<i32, _>("transient failure")
                }
            },
            |_: &&str| true,
        )
        .await;

        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_non_retryable_error_fails_immediately() {
        let counter = Arc::new(AtomicUsize::new(0));
        let calls = Arc::clone(&counter);

        let result = retry_with_predicate(
            &RetryPolicy::default(),
            || {
                let c = Arc::clone(&calls);
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err::<i32, _>("permanent error")
                }
            },
            |err: &&str| err.contains("transient"),
        )
        .await;

        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
