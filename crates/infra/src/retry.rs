//! Retry policies shared by the migration runner and the job executor.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Backoff strategy for retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Fixed delay between retries
    Fixed,
    /// Exponential backoff: base * 2^(n-1)
    #[default]
    Exponential,
    /// Linear backoff: base * n
    Linear,
}

/// Retry policy configuration.
///
/// `max_attempts` counts every attempt, the first one included: a policy with
/// `max_attempts == 3` runs at most three times and waits at most twice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
    pub strategy: BackoffStrategy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(60),
            strategy: BackoffStrategy::Exponential,
        }
    }
}

impl RetryPolicy {
    /// A single attempt, never retried.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay: delay,
            max_delay: delay,
            strategy: BackoffStrategy::Fixed,
        }
    }

    pub fn linear(max_attempts: u32, step: Duration) -> Self {
        Self {
            max_attempts,
            base_delay: step,
            max_delay: step.saturating_mul(max_attempts.max(1)),
            strategy: BackoffStrategy::Linear,
        }
    }

    pub fn exponential(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
            strategy: BackoffStrategy::Exponential,
        }
    }

    /// Delay after the `failures`-th failure (1-indexed). Zero for 0.
    pub fn delay_for_attempt(&self, failures: u32) -> Duration {
        if failures == 0 {
            return Duration::ZERO;
        }

        let delay = match self.strategy {
            BackoffStrategy::Fixed => self.base_delay,
            BackoffStrategy::Linear => self.base_delay.saturating_mul(failures),
            BackoffStrategy::Exponential => {
                let factor = 1u32.checked_shl(failures - 1).unwrap_or(u32::MAX);
                self.base_delay.saturating_mul(factor)
            }
        };

        delay.min(self.max_delay)
    }

    /// Whether another attempt may follow `attempts_made` attempts.
    pub fn should_retry(&self, attempts_made: u32) -> bool {
        attempts_made < self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exponential_backoff_doubles_until_cap() {
        let policy = RetryPolicy::exponential(10, Duration::from_millis(100), Duration::from_secs(1));

        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for_attempt(5), Duration::from_secs(1));
        assert_eq!(policy.delay_for_attempt(64), Duration::from_secs(1));
    }

    #[test]
    fn fixed_backoff_is_constant() {
        let policy = RetryPolicy::fixed(3, Duration::from_millis(500));

        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(500));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(500));
    }

    #[test]
    fn linear_backoff_matches_migration_schedule() {
        let policy = RetryPolicy::linear(3, Duration::from_secs(5));

        assert_eq!(policy.delay_for_attempt(0), Duration::ZERO);
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(5));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(10));
    }

    #[test]
    fn should_retry_counts_total_attempts() {
        let policy = RetryPolicy::linear(3, Duration::from_secs(5));

        assert!(policy.should_retry(1));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
        assert!(!RetryPolicy::no_retry().should_retry(1));
    }
}
