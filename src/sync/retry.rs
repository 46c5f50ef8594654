use std::future::Future;
use std::time::Duration;

use crate::config::{SyncConfig, MAX_RETRIES, RETRY_BASE_DELAY_MS};

/// How often a queued mutation is tried and how long to back off between tries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MAX_RETRIES,
            base_delay: Duration::from_millis(RETRY_BASE_DELAY_MS),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    pub fn from_config(config: &SyncConfig) -> Self {
        Self::new(config.max_retries, config.retry_base_delay)
    }

    /// `base_delay * 2^previous_failures`, saturating.
    pub fn backoff(&self, previous_failures: u32) -> Duration {
        let factor = 2u32.checked_pow(previous_failures).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }

    /// Whether `failures` failed attempts use up the budget.
    pub fn is_exhausted(&self, failures: u32) -> bool {
        failures >= self.max_attempts
    }
}

/// Result of one delivery attempt under a [`RetryPolicy`].
#[derive(Debug)]
pub enum AttemptOutcome<T, E> {
    Succeeded(T),
    /// Failed with budget left; wait `backoff` before the next delivery.
    Retry {
        failures: u32,
        backoff: Duration,
        error: E,
    },
    /// Failed and the budget is spent; the work item should be dropped.
    Exhausted { failures: u32, error: E },
}

impl<T, E> AttemptOutcome<T, E> {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded(_))
    }
}

/// Run `op` once for a work item that has already failed `previous_failures` times.
pub async fn attempt<T, E, F, Fut>(
    policy: &RetryPolicy,
    previous_failures: u32,
    op: F,
) -> AttemptOutcome<T, E>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    match op().await {
        Ok(value) => AttemptOutcome::Succeeded(value),
        Err(error) => {
            let failures = previous_failures.saturating_add(1);
            if policy.is_exhausted(failures) {
                AttemptOutcome::Exhausted { failures, error }
            } else {
                AttemptOutcome::Retry {
                    failures,
                    backoff: policy.backoff(previous_failures),
                    error,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.base_delay, Duration::from_secs(5));
    }

    #[test]
    fn backoff_doubles() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(0), Duration::from_secs(5));
        assert_eq!(policy.backoff(1), Duration::from_secs(10));
        assert_eq!(policy.backoff(2), Duration::from_secs(20));
    }

    #[test]
    fn backoff_saturates() {
        let policy = RetryPolicy::new(3, Duration::from_secs(5));
        assert_eq!(policy.backoff(64), Duration::from_secs(5).saturating_mul(u32::MAX));
    }

    #[test]
    fn zero_attempts_still_allows_one() {
        let policy = RetryPolicy::new(0, Duration::ZERO);
        assert_eq!(policy.max_attempts, 1);
        assert!(policy.is_exhausted(1));
    }

    #[tokio::test]
    async fn success_passes_value_through() {
        let outcome: AttemptOutcome<u8, String> =
            attempt(&RetryPolicy::default(), 2, || async { Ok(7) }).await;
        assert!(matches!(outcome, AttemptOutcome::Succeeded(7)));
    }

    #[tokio::test]
    async fn failures_retry_until_budget_spent() {
        let policy = RetryPolicy::default();

        let first: AttemptOutcome<(), &str> = attempt(&policy, 0, || async { Err("down") }).await;
        match first {
            AttemptOutcome::Retry { failures, backoff, .. } => {
                assert_eq!(failures, 1);
                assert_eq!(backoff, Duration::from_secs(5));
            }
            other => panic!("expected retry, got {other:?}"),
        }

        let second: AttemptOutcome<(), &str> = attempt(&policy, 1, || async { Err("down") }).await;
        assert!(matches!(second, AttemptOutcome::Retry { failures: 2, .. }));

        let third: AttemptOutcome<(), &str> = attempt(&policy, 2, || async { Err("down") }).await;
        assert!(matches!(
            third,
            AttemptOutcome::Exhausted { failures: 3, error: "down" }
        ));
    }
}
