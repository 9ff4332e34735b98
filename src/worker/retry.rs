//! Retry policy — exponential backoff with jitter.

use std::time::Duration;

use rand::Rng;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
        }
    }

    /// Backoff before retrying after a failed `attempt` (1-based):
    /// base * 2^(attempt-1), capped at max, with up to 25% added jitter.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let backoff = self
            .base_delay
            .saturating_mul(1u32 << exp)
            .min(self.max_delay);
        let jitter_ms = rand::thread_rng().gen_range(0..=backoff.as_millis() as u64 / 4);
        backoff + Duration::from_millis(jitter_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy::new(5, Duration::from_secs(2), Duration::from_secs(10));
        assert!(policy.delay_for(1) >= Duration::from_secs(2));
        assert!(policy.delay_for(1) < Duration::from_secs(3));
        assert!(policy.delay_for(2) >= Duration::from_secs(4));
        assert!(policy.delay_for(3) >= Duration::from_secs(8));
        // Capped at max plus jitter.
        assert!(policy.delay_for(10) <= Duration::from_millis(12_500));
    }

    #[test]
    fn huge_attempt_numbers_do_not_overflow() {
        let policy = RetryPolicy::default();
        assert!(policy.delay_for(u32::MAX) <= Duration::from_secs(75));
    }
}
