//! Retry policy with jittered exponential backoff for broker calls.
//!
//! Only transient failures ([`crate::broker::BrokerError::is_retryable`])
//! are retried, on the same backend, up to the policy ceiling; exhausting
//! the ceiling hands the request to the failover router.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Retry policy for broker calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum retry attempts per backend.
    pub max_attempts: u32,
    /// First backoff duration.
    pub initial_backoff: Duration,
    /// Backoff ceiling.
    pub max_backoff: Duration,
    /// Exponential growth factor.
    pub multiplier: f64,
    /// Jitter factor (0.2 = ±20%).
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(10),
            multiplier: 2.0,
            jitter: 0.2,
        }
    }
}

/// Stateful backoff calculator for one request against one backend.
#[derive(Debug)]
pub struct ExponentialBackoff {
    attempt: u32,
    max_attempts: u32,
    initial_ms: u64,
    max_ms: u64,
    multiplier: f64,
    jitter: f64,
}

impl ExponentialBackoff {
    /// Create a calculator from a policy.
    #[must_use]
    pub const fn new(policy: &RetryPolicy) -> Self {
        Self {
            attempt: 0,
            max_attempts: policy.max_attempts,
            initial_ms: policy.initial_backoff.as_millis() as u64,
            max_ms: policy.max_backoff.as_millis() as u64,
            multiplier: policy.multiplier,
            jitter: policy.jitter,
        }
    }

    /// Next backoff duration with jitter, or `None` once the ceiling is hit.
    pub fn next_backoff(&mut self) -> Option<Duration> {
        if self.attempt >= self.max_attempts {
            return None;
        }

        let base = self.base_ms();
        let jittered = self.apply_jitter(base).min(self.max_ms);
        self.attempt += 1;
        Some(Duration::from_millis(jittered))
    }

    /// Attempts consumed so far.
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        self.attempt
    }

    fn base_ms(&self) -> u64 {
        let factor = self.multiplier.powi(self.attempt as i32);
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let ms = (self.initial_ms as f64 * factor) as u64;
        ms.min(self.max_ms)
    }

    fn apply_jitter(&self, ms: u64) -> u64 {
        if self.jitter <= 0.0 {
            return ms;
        }
        let mut rng = rand::rng();
        let range = ms as f64 * self.jitter;
        let min = (ms as f64 - range).max(0.0);
        let max = ms as f64 + range;
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let jittered = rng.random_range(min..=max) as u64;
        jittered
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_sequence_without_jitter() {
        let policy = RetryPolicy {
            jitter: 0.0,
            ..Default::default()
        };
        let mut backoff = ExponentialBackoff::new(&policy);

        assert_eq!(backoff.next_backoff(), Some(Duration::from_millis(100)));
        assert_eq!(backoff.next_backoff(), Some(Duration::from_millis(200)));
        assert_eq!(backoff.next_backoff(), Some(Duration::from_millis(400)));
        assert!(backoff.next_backoff().is_none());
        assert_eq!(backoff.attempts(), 3);
    }

    #[test]
    fn test_backoff_cap() {
        let policy = RetryPolicy {
            max_attempts: 10,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(4),
            multiplier: 10.0,
            jitter: 0.0,
        };
        let mut backoff = ExponentialBackoff::new(&policy);

        assert_eq!(backoff.next_backoff(), Some(Duration::from_secs(1)));
        assert_eq!(backoff.next_backoff(), Some(Duration::from_secs(4)));
        assert_eq!(backoff.next_backoff(), Some(Duration::from_secs(4)));
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let policy = RetryPolicy {
            jitter: 0.2,
            ..Default::default()
        };

        for _ in 0..100 {
            let mut backoff = ExponentialBackoff::new(&policy);
            let duration = backoff.next_backoff().unwrap();
            assert!(
                duration >= Duration::from_millis(80) && duration <= Duration::from_millis(120),
                "duration {duration:?} outside 80-120ms"
            );
        }
    }
}
