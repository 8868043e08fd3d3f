//! Reconnection backoff policy.

use std::time::Duration;

/// Exponential backoff with a ceiling on delay and on attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Delay after the first failed round.
    pub base_delay: Duration,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
    /// Failed rounds after which the network is declared unavailable.
    pub max_attempts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            max_attempts: 10,
        }
    }
}

impl BackoffPolicy {
    /// `min(base_delay * 2^attempt, max_delay)`; `attempt` starts at 0.
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Whether `failed_rounds` has reached the attempt ceiling.
    pub fn exhausted(&self, failed_rounds: u32) -> bool {
        failed_rounds >= self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubles_from_base() {
        let policy = BackoffPolicy::default();
        let delays: Vec<u64> = (0..4).map(|a| policy.delay(a).as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8]);
    }

    #[test]
    fn non_decreasing_and_capped() {
        let policy = BackoffPolicy {
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(30),
            max_attempts: 100,
        };
        let mut previous = Duration::ZERO;
        for attempt in 0..100 {
            let delay = policy.delay(attempt);
            assert!(delay >= previous, "attempt {attempt} went down");
            assert!(delay <= policy.max_delay);
            previous = delay;
        }
        assert_eq!(policy.delay(99), policy.max_delay);
    }

    #[test]
    fn exhausted_at_ceiling() {
        let policy = BackoffPolicy::default();
        assert!(!policy.exhausted(9));
        assert!(policy.exhausted(10));
    }
}
