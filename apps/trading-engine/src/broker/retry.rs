//! Retry policy with exponential backoff and jitter.
//!
//! Shared by the order manager (transient submission failures) and the
//! connection monitor (reconnect pacing).

use std::time::Duration;

use rand::Rng;

/// Configuration for bounded retry with exponential backoff.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum attempts (0 = unlimited).
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
    /// Multiplier applied to the delay after each attempt.
    pub multiplier: f64,
    /// Jitter factor as a fraction (0.2 = ±20% randomization).
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: 0.2,
        }
    }
}

impl RetryPolicy {
    /// Create a policy with custom values.
    #[must_use]
    pub const fn new(
        max_attempts: u32,
        initial_delay: Duration,
        max_delay: Duration,
        multiplier: f64,
        jitter: f64,
    ) -> Self {
        Self {
            max_attempts,
            initial_delay,
            max_delay,
            multiplier,
            jitter,
        }
    }

    /// Fast retries for latency-sensitive paths.
    #[must_use]
    pub const fn aggressive() -> Self {
        Self {
            max_attempts: 10,
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(10),
            multiplier: 1.5,
            jitter: 0.2,
        }
    }

    /// Slow retries for rate-limited venues.
    #[must_use]
    pub const fn conservative() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(60),
            multiplier: 3.0,
            jitter: 0.2,
        }
    }

    /// Start a backoff schedule under this policy.
    #[must_use]
    pub fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff::new(self.clone())
    }
}

/// Stateful exponential backoff schedule.
#[derive(Debug)]
pub struct ExponentialBackoff {
    policy: RetryPolicy,
    current_delay: Duration,
    attempts: u32,
}

impl ExponentialBackoff {
    /// Create a schedule from a policy.
    #[must_use]
    pub const fn new(policy: RetryPolicy) -> Self {
        let initial = policy.initial_delay;
        Self {
            policy,
            current_delay: initial,
            attempts: 0,
        }
    }

    /// Get the next delay, applying exponential growth and jitter.
    ///
    /// Returns `None` once the attempt bound is exhausted.
    #[must_use]
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.policy.max_attempts > 0 && self.attempts >= self.policy.max_attempts {
            return None;
        }
        self.attempts += 1;

        let delay = self.apply_jitter(self.current_delay);

        #[allow(clippy::cast_precision_loss)]
        let scaled = (self.current_delay.as_millis() as f64 * self.policy.multiplier).round();
        let next_millis = if scaled.is_finite() && scaled > 0.0 {
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            {
                scaled as u128
            }
        } else {
            0
        };
        let capped = next_millis.min(self.policy.max_delay.as_millis());
        self.current_delay = Duration::from_millis(u64::try_from(capped).unwrap_or(u64::MAX));

        Some(delay)
    }

    /// Reset after a success.
    pub const fn reset(&mut self) {
        self.current_delay = self.policy.initial_delay;
        self.attempts = 0;
    }

    /// Attempts consumed so far.
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Returns true while further attempts remain.
    #[must_use]
    pub const fn should_retry(&self) -> bool {
        self.policy.max_attempts == 0 || self.attempts < self.policy.max_attempts
    }

    fn apply_jitter(&self, duration: Duration) -> Duration {
        if self.policy.jitter <= 0.0 {
            return duration;
        }

        #[allow(clippy::cast_precision_loss)]
        let base_millis = duration.as_millis() as f64;
        let jitter_range = base_millis * self.policy.jitter;
        let mut rng = rand::rng();
        let jitter: f64 = rng.random_range(-jitter_range..=jitter_range);
        let adjusted = (base_millis + jitter).max(1.0);

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        Duration::from_millis(adjusted as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_jitter(max_attempts: u32, initial_ms: u64, max_ms: u64, multiplier: f64) -> RetryPolicy {
        RetryPolicy::new(
            max_attempts,
            Duration::from_millis(initial_ms),
            Duration::from_millis(max_ms),
            multiplier,
            0.0,
        )
    }

    #[test]
    fn test_default_policy_values() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.initial_delay, Duration::from_millis(100));
        assert_eq!(policy.max_delay, Duration::from_secs(30));
        assert!((policy.multiplier - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_exponential_progression() {
        let mut backoff = no_jitter(0, 100, 10_000, 2.0).backoff();
        assert_eq!(backoff.next_delay().unwrap(), Duration::from_millis(100));
        assert_eq!(backoff.next_delay().unwrap(), Duration::from_millis(200));
        assert_eq!(backoff.next_delay().unwrap(), Duration::from_millis(400));
        assert_eq!(backoff.next_delay().unwrap(), Duration::from_millis(800));
    }

    #[test]
    fn test_delay_capped_at_max() {
        let mut backoff = no_jitter(0, 1000, 2000, 4.0).backoff();
        let _ = backoff.next_delay();
        assert_eq!(backoff.next_delay().unwrap(), Duration::from_millis(2000));
        assert_eq!(backoff.next_delay().unwrap(), Duration::from_millis(2000));
    }

    #[test]
    fn test_attempt_bound_exhausts() {
        let mut backoff = no_jitter(3, 100, 1000, 2.0).backoff();
        assert!(backoff.next_delay().is_some());
        assert!(backoff.next_delay().is_some());
        assert!(backoff.next_delay().is_some());
        assert_eq!(backoff.attempts(), 3);
        assert!(backoff.next_delay().is_none());
        assert!(!backoff.should_retry());
    }

    #[test]
    fn test_reset_restores_initial_state() {
        let mut backoff = no_jitter(3, 100, 10_000, 2.0).backoff();
        let _ = backoff.next_delay();
        let _ = backoff.next_delay();
        assert_eq!(backoff.attempts(), 2);

        backoff.reset();
        assert_eq!(backoff.attempts(), 0);
        assert!(backoff.should_retry());
        assert_eq!(backoff.next_delay().unwrap(), Duration::from_millis(100));
    }

    #[test]
    fn test_jitter_stays_in_bounds() {
        for _ in 0..100 {
            let mut backoff = RetryPolicy::new(
                0,
                Duration::from_millis(1000),
                Duration::from_secs(10),
                2.0,
                0.1,
            )
            .backoff();
            let millis = backoff.next_delay().unwrap().as_millis();
            assert!(millis >= 900, "delay {millis}ms below minimum 900ms");
            assert!(millis <= 1100, "delay {millis}ms above maximum 1100ms");
        }
    }

    #[test]
    fn test_unlimited_attempts() {
        let mut backoff = no_jitter(0, 1, 10, 2.0).backoff();
        for _ in 0..1000 {
            assert!(backoff.should_retry());
            assert!(backoff.next_delay().is_some());
        }
    }
}
