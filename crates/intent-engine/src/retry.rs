//! Exponential backoff for transient device errors

use crate::config::RetryConfig;
use std::time::Duration;

/// Bounded exponential backoff
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    max_attempts: u32,
    initial: Duration,
    max: Duration,
    multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial: Duration::from_millis(config.initial_backoff_ms),
            max: Duration::from_millis(config.max_backoff_ms),
            multiplier: config.multiplier.max(1.0),
        }
    }
}

impl RetryPolicy {
    /// Attempts per batch, including the first
    #[inline]
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay after failed attempt number `attempt` (0-based)
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let scaled = self.initial.as_secs_f64() * self.multiplier.powi(exponent);
        if !scaled.is_finite() || scaled >= self.max.as_secs_f64() {
            self.max
        } else {
            Duration::from_secs_f64(scaled)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn doubles_until_capped() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay(0), Duration::from_millis(50));
        assert_eq!(policy.delay(1), Duration::from_millis(100));
        assert_eq!(policy.delay(3), Duration::from_millis(400));
        assert_eq!(policy.delay(30), Duration::from_millis(5_000));
        assert_eq!(policy.max_attempts(), 5);
    }

    proptest! {
        #[test]
        fn delays_are_bounded_and_non_decreasing(
            initial in 0u64..1_000,
            extra in 0u64..10_000,
            multiplier in 1.0f64..8.0,
            attempt in 0u32..64,
        ) {
            let config = RetryConfig {
                max_attempts: 3,
                initial_backoff_ms: initial,
                max_backoff_ms: initial + extra,
                multiplier,
            };
            let policy = RetryPolicy::from(&config);
            let cap = Duration::from_millis(initial + extra);
            prop_assert!(policy.delay(attempt) <= cap);
            prop_assert!(policy.delay(attempt) <= policy.delay(attempt + 1));
        }
    }
}
