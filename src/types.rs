use std::time::Duration;

use rand::Rng;

/// Retry policy for optimistic-concurrency conflicts on a conversation.
///
/// Attempts back off exponentially from `base_delay`, capped at `max_delay`,
/// with up to 50% random jitter so racing writers spread out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    /// Total number of attempts, including the first one
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub base_delay: Duration,
    /// Upper bound for any single delay
    pub max_delay: Duration,
}

impl RetryConfig {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay: Duration::from_millis(500),
        }
    }

    /// Delay to wait after the given failed attempt (1-based), without jitter.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(2_u32.pow(exponent))
            .min(self.max_delay)
    }

    /// Delay to wait after the given failed attempt (1-based), with jitter applied.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let backoff = self.backoff(attempt);
        let jitter_cap = (backoff.as_micros() / 2) as u64;
        if jitter_cap == 0 {
            return backoff;
        }
        let jitter = rand::rng().random_range(0..=jitter_cap);
        backoff + Duration::from_micros(jitter)
    }

    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(5, Duration::from_millis(10))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_retry_config() {
        let config = RetryConfig::default();
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.base_delay, Duration::from_millis(10));
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let config = RetryConfig::new(10, Duration::from_millis(10));
        assert_eq!(config.backoff(1), Duration::from_millis(10));
        assert_eq!(config.backoff(2), Duration::from_millis(20));
        assert_eq!(config.backoff(3), Duration::from_millis(40));
        assert_eq!(config.backoff(10), Duration::from_millis(500));
    }

    #[test]
    fn test_delay_for_stays_within_jitter_bounds() {
        let config = RetryConfig::new(5, Duration::from_millis(20));
        for attempt in 1..=5 {
            let delay = config.delay_for(attempt);
            let backoff = config.backoff(attempt);
            assert!(delay >= backoff);
            assert!(delay <= backoff + backoff / 2);
        }
    }

    #[test]
    fn test_zero_attempts_clamped_to_one() {
        let config = RetryConfig::new(0, Duration::ZERO);
        assert_eq!(config.max_attempts, 1);
        assert!(!config.should_retry(1));
        assert_eq!(config.delay_for(1), Duration::ZERO);
    }

    #[test]
    fn test_should_retry() {
        let config = RetryConfig::new(3, Duration::from_millis(1));
        assert!(config.should_retry(1));
        assert!(config.should_retry(2));
        assert!(!config.should_retry(3));
    }
}
