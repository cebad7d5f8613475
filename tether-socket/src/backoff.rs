//! Exponential reconnection backoff.

use std::time::Duration;

/// Reconnect attempt counter with a fixed budget.
///
/// Attempt `k` (1-indexed) waits `base_delay * 2^(k-1)`. The counter is
/// reset after every successful open.
#[derive(Debug, Clone)]
pub struct Backoff {
    attempt: u32,
    max_attempts: u32,
    base_delay: Duration,
}

impl Backoff {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            attempt: 0,
            max_attempts,
            base_delay,
        }
    }

    /// Reconnect attempts made since the last successful open.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempt >= self.max_attempts
    }

    /// Delay for the 1-indexed attempt `k`, saturating instead of overflowing.
    pub fn delay_for(&self, k: u32) -> Duration {
        let factor = 1u32.checked_shl(k.saturating_sub(1)).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }

    /// Claim the next attempt and return how long to wait before it, or
    /// `None` once the budget is spent.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.is_exhausted() {
            return None;
        }
        self.attempt += 1;
        Some(self.delay_for(self.attempt))
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_doubles_from_base() {
        let backoff = Backoff::new(10, Duration::from_millis(250));
        assert_eq!(backoff.delay_for(1), Duration::from_millis(250));
        assert_eq!(backoff.delay_for(2), Duration::from_millis(500));
        assert_eq!(backoff.delay_for(3), Duration::from_millis(1000));
        assert_eq!(backoff.delay_for(6), Duration::from_millis(8000));
    }

    #[test]
    fn test_budget_then_exhausted() {
        let mut backoff = Backoff::new(3, Duration::from_secs(1));
        assert_eq!(backoff.next_delay(), Some(Duration::from_secs(1)));
        assert_eq!(backoff.next_delay(), Some(Duration::from_secs(2)));
        assert_eq!(backoff.next_delay(), Some(Duration::from_secs(4)));
        assert_eq!(backoff.next_delay(), None);
        assert_eq!(backoff.attempt(), 3);
        assert!(backoff.is_exhausted());

        backoff.reset();
        assert_eq!(backoff.attempt(), 0);
        assert_eq!(backoff.next_delay(), Some(Duration::from_secs(1)));
    }

    #[test]
    fn test_zero_budget_never_retries() {
        let mut backoff = Backoff::new(0, Duration::from_secs(1));
        assert_eq!(backoff.next_delay(), None);
    }

    #[test]
    fn test_huge_attempt_saturates() {
        let backoff = Backoff::new(u32::MAX, Duration::from_secs(1));
        assert_eq!(backoff.delay_for(40), Duration::from_secs(u64::from(u32::MAX)));
    }
}
