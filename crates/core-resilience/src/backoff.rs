//! Linear backoff schedule with optional jitter
//!
//! The delay before retry `n` (1-based: the attempt that just failed) is
//! `n × base`, plus a uniformly distributed jitter in `0..=jitter` when a
//! jitter bound is configured.

use rand::Rng;
use std::time::Duration;

/// Linear backoff: `attempt × base (+ jitter)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinearBackoff {
    /// Delay unit multiplied by the attempt number
    pub base: Duration,
    /// Upper bound of the random jitter added to every delay
    pub jitter: Duration,
}

impl Default for LinearBackoff {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(1000),
            jitter: Duration::ZERO,
        }
    }
}

impl LinearBackoff {
    /// Create a jitter-free schedule
    pub fn new(base: Duration) -> Self {
        Self {
            base,
            jitter: Duration::ZERO,
        }
    }

    /// Add a random jitter bound (network-layer variant)
    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    /// Schedule that never sleeps (tests)
    pub fn immediate() -> Self {
        Self::new(Duration::ZERO)
    }

    /// Delay to wait after `attempt` (1-based) failed
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let linear = self.base.saturating_mul(attempt.max(1));
        if self.jitter.is_zero() {
            return linear;
        }

        let bound = self.jitter.as_millis().min(u64::MAX as u128) as u64;
        let extra = rand::rng().random_range(0..=bound);
        linear.saturating_add(Duration::from_millis(extra))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_schedule() {
        let backoff = LinearBackoff::new(Duration::from_millis(1000));
        assert_eq!(backoff.delay_for(1), Duration::from_millis(1000));
        assert_eq!(backoff.delay_for(2), Duration::from_millis(2000));
        assert_eq!(backoff.delay_for(3), Duration::from_millis(3000));
    }

    #[test]
    fn test_attempt_zero_treated_as_first() {
        let backoff = LinearBackoff::new(Duration::from_millis(500));
        assert_eq!(backoff.delay_for(0), Duration::from_millis(500));
    }

    #[test]
    fn test_jitter_stays_in_bounds() {
        let backoff = LinearBackoff::new(Duration::from_millis(100))
            .with_jitter(Duration::from_millis(50));

        for _ in 0..200 {
            let delay = backoff.delay_for(2);
            assert!(delay >= Duration::from_millis(200));
            assert!(delay <= Duration::from_millis(250));
        }
    }

    #[test]
    fn test_immediate() {
        let backoff = LinearBackoff::immediate();
        assert_eq!(backoff.delay_for(3), Duration::ZERO);
    }
}
