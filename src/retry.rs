//! Retry backoff policies
//!
//! A `RetryPolicy` is a stateless value object mapping a retry attempt index
//! to a wait delay. It is advisory: the job's own `can_retry()` budget is the
//! authoritative enforcement, and the worker pool keeps the two in sync by
//! constructing jobs with the policy's `max_retries` and sleeping
//! `get_delay(retry_count)` before requeueing.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Backoff strategy for computing retry delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffStrategy {
    /// Retry immediately with no delay.
    Immediate,
    /// `base_delay * (attempt + 1)`.
    Linear,
    /// `base_delay * 2^attempt`.
    Exponential,
    /// `base_delay * fib(attempt + 1)`.
    Fibonacci,
}

/// Retry policy: budget plus backoff curve. Stateless, safe to share.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub strategy: BackoffStrategy,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            strategy: BackoffStrategy::Exponential,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Delay before the given retry attempt (0-based), capped at `max_delay`.
    pub fn get_delay(&self, attempt: u32) -> Duration {
        let base_ms = self.base_delay.as_millis();
        let factor: u128 = match self.strategy {
            BackoffStrategy::Immediate => return Duration::ZERO,
            BackoffStrategy::Linear => u128::from(attempt) + 1,
            BackoffStrategy::Exponential => 1u128 << attempt.min(63),
            BackoffStrategy::Fibonacci => u128::from(fibonacci(attempt + 1)),
        };

        let delay_ms = base_ms
            .saturating_mul(factor)
            .min(self.max_delay.as_millis());
        Duration::from_millis(delay_ms as u64)
    }

    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_retries
    }
}

/// fib(0) = 0, fib(1) = 1. Saturating: delays are capped downstream anyway.
fn fibonacci(n: u32) -> u64 {
    let (mut prev, mut curr) = (0u64, 1u64);
    for _ in 0..n {
        let next = prev.saturating_add(curr);
        prev = curr;
        curr = next;
    }
    prev
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(strategy: BackoffStrategy) -> RetryPolicy {
        RetryPolicy {
            max_retries: 3,
            strategy,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(3600),
        }
    }

    #[test]
    fn test_immediate_backoff() {
        let policy = policy(BackoffStrategy::Immediate);
        for attempt in 0..5 {
            assert_eq!(policy.get_delay(attempt), Duration::ZERO);
        }
    }

    #[test]
    fn test_linear_backoff() {
        let policy = policy(BackoffStrategy::Linear);
        let expected = [1, 2, 3, 4, 5];
        for (attempt, secs) in expected.iter().enumerate() {
            assert_eq!(
                policy.get_delay(attempt as u32),
                Duration::from_secs(*secs)
            );
        }
    }

    #[test]
    fn test_exponential_backoff() {
        let policy = policy(BackoffStrategy::Exponential);
        let expected = [1, 2, 4, 8, 16];
        for (attempt, secs) in expected.iter().enumerate() {
            assert_eq!(
                policy.get_delay(attempt as u32),
                Duration::from_secs(*secs)
            );
        }
    }

    #[test]
    fn test_fibonacci_backoff() {
        let policy = policy(BackoffStrategy::Fibonacci);
        let expected = [1, 1, 2, 3, 5];
        for (attempt, secs) in expected.iter().enumerate() {
            assert_eq!(
                policy.get_delay(attempt as u32),
                Duration::from_secs(*secs)
            );
        }
    }

    #[test]
    fn test_delay_capped_at_max() {
        let policy = RetryPolicy {
            max_retries: 10,
            strategy: BackoffStrategy::Exponential,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
        };
        assert_eq!(policy.get_delay(3), Duration::from_secs(8));
        assert_eq!(policy.get_delay(4), Duration::from_secs(10));
        assert_eq!(policy.get_delay(20), Duration::from_secs(10));
    }

    #[test]
    fn test_should_retry_respects_budget() {
        let policy = policy(BackoffStrategy::Exponential);
        assert!(policy.should_retry(0));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
        assert!(!policy.should_retry(4));
    }

    #[test]
    fn test_large_exponent_does_not_overflow() {
        let policy = RetryPolicy {
            max_retries: 100,
            strategy: BackoffStrategy::Exponential,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        };
        assert_eq!(policy.get_delay(90), Duration::from_secs(30));
    }
}
