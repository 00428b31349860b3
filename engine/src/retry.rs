//! Bounded exponential backoff for transient ledger and gateway failures.
//!
//! The delay doubles from `initial_delay` up to `max_delay`. Whether an error
//! is worth another attempt is decided by the caller, usually with
//! [`EngineError::is_retryable`](ferry_core::error::EngineError::is_retryable):
//! a refused posting or a declined card fails at once, a store timeout does
//! not.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

/// How often and how patiently to retry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: usize,
    /// Wait before the first retry
    pub initial_delay: Duration,
    /// Longest wait between two attempts
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(100), Duration::from_secs(5))
    }
}

impl RetryPolicy {
    /// Policy with the given bounds
    #[must_use]
    pub const fn new(max_retries: usize, initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            initial_delay,
            max_delay,
        }
    }

    /// Retries back to back, used by replays and tests
    #[must_use]
    pub const fn without_delay(max_retries: usize) -> Self {
        Self::new(max_retries, Duration::ZERO, Duration::ZERO)
    }

    /// Total calls made before giving up
    #[must_use]
    pub fn attempts(&self) -> u32 {
        u32::try_from(self.max_retries.saturating_add(1)).unwrap_or(u32::MAX)
    }

    /// Wait before retry `retry` (zero-based)
    #[must_use]
    pub fn backoff(&self, retry: usize) -> Duration {
        let doubled = u32::try_from(retry)
            .ok()
            .and_then(|exp| 2u32.checked_pow(exp))
            .and_then(|factor| self.initial_delay.checked_mul(factor));
        doubled.map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }
}

/// Runs `operation` until it succeeds, fails permanently or the policy is spent
///
/// # Errors
///
/// Returns the first error `is_retryable` rejects, or the last error once
/// every attempt failed.
pub async fn retry_with_predicate<F, Fut, T, E, P>(
    policy: &RetryPolicy,
    mut operation: F,
    is_retryable: P,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
    P: Fn(&E) -> bool,
{
    let mut retry = 0;
    let error = loop {
        let err = match operation().await {
            Ok(value) => {
                if retry > 0 {
                    tracing::info!(retries = retry, "Recovered after transient failures");
                }
                return Ok(value);
            }
            Err(err) => err,
        };
        if !is_retryable(&err) || retry >= policy.max_retries {
            break err;
        }

        let wait = policy.backoff(retry);
        tracing::warn!(retry, wait_ms = wait.as_millis(), error = %err, "Transient failure, backing off");
        tokio::time::sleep(wait).await;
        retry += 1;
    };

    if is_retryable(&error) {
        tracing::error!(attempts = retry + 1, error = %error, "Giving up after repeated transient failures");
    }
    Err(error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug, PartialEq, Eq)]
    enum Fault {
        Timeout,
        Refused,
    }

    impl Display for Fault {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{self:?}")
        }
    }

    fn transient(fault: &Fault) -> bool {
        *fault == Fault::Timeout
    }

    #[test]
    fn test_backoff_doubles_up_to_the_cap() {
        let policy = RetryPolicy::new(5, Duration::from_millis(100), Duration::from_millis(500));

        let waits: Vec<_> = (0..4).map(|retry| policy.backoff(retry)).collect();
        assert_eq!(
            waits,
            [100, 200, 400, 500].map(Duration::from_millis).to_vec()
        );
        assert_eq!(policy.backoff(usize::MAX), Duration::from_millis(500));
        assert_eq!(policy.attempts(), 6);
    }

    #[tokio::test]
    async fn test_timeouts_are_retried_until_the_store_answers() {
        let calls = AtomicU32::new(0);
        let counter = &calls;

        let result = retry_with_predicate(
            &RetryPolicy::without_delay(3),
            || async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(Fault::Timeout)
                } else {
                    Ok("posted")
                }
            },
            transient,
        )
        .await;

        assert_eq!(result, Ok("posted"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_refusals_are_not_retried() {
        let calls = AtomicU32::new(0);
        let counter = &calls;

        let result: Result<(), Fault> = retry_with_predicate(
            &RetryPolicy::without_delay(5),
            || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(Fault::Refused)
            },
            transient,
        )
        .await;

        assert_eq!(result, Err(Fault::Refused));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_persistent_timeouts_use_every_attempt() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let policy = RetryPolicy::without_delay(2);

        let result: Result<(), Fault> = retry_with_predicate(
            &policy,
            || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(Fault::Timeout)
            },
            transient,
        )
        .await;

        assert_eq!(result, Err(Fault::Timeout));
        assert_eq!(calls.load(Ordering::SeqCst), policy.attempts());
    }
}
