//! Shared exponential backoff policy.
//!
//! Both retry sites (generation invocation and embedding batches) compute
//! their delays through this one policy so the behavior stays consistent.

use std::time::Duration;

/// Exponential backoff: `base * multiplier^attempt`, capped.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub multiplier: u32,
    pub cap: Duration,
}

impl BackoffPolicy {
    pub fn new(base: Duration) -> Self {
        Self {
            base,
            multiplier: 2,
            cap: Duration::from_secs(60),
        }
    }

    /// Delay before retrying after the given 0-indexed failed attempt.
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.saturating_pow(attempt.min(16));
        let delay = self.base.saturating_mul(factor);
        delay.min(self.cap)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubles_per_attempt() {
        let p = BackoffPolicy::new(Duration::from_secs(1));
        assert_eq!(p.delay(0), Duration::from_secs(1));
        assert_eq!(p.delay(1), Duration::from_secs(2));
        assert_eq!(p.delay(2), Duration::from_secs(4));
    }

    #[test]
    fn caps_at_ceiling() {
        let p = BackoffPolicy {
            base: Duration::from_secs(1),
            multiplier: 2,
            cap: Duration::from_secs(5),
        };
        assert_eq!(p.delay(10), Duration::from_secs(5));
    }

    #[test]
    fn huge_attempt_does_not_overflow() {
        let p = BackoffPolicy::default();
        assert_eq!(p.delay(u32::MAX), p.cap);
    }
}
