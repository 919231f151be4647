//! Exponential backoff with a ceiling
//!
//! Drives the retry delay for a failing service: each failure roughly
//! doubles the wait until the ceiling, and one success resets to base.

use std::time::Duration;

/// Default base delay: 1 second.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(1_000);

/// Default ceiling: 5 minutes.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_millis(300_000);

/// Default growth factor.
pub const DEFAULT_MULTIPLIER: f64 = 2.0;

/// Exponential-with-ceiling delay calculator
#[derive(Debug, Clone)]
pub struct Backoff {
    base_delay: Duration,
    max_delay: Duration,
    multiplier: f64,
    attempt: u32,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_DELAY, DEFAULT_MAX_DELAY, DEFAULT_MULTIPLIER)
    }
}

impl Backoff {
    pub fn new(base_delay: Duration, max_delay: Duration, multiplier: f64) -> Self {
        Self {
            base_delay,
            max_delay,
            multiplier,
            attempt: 0,
        }
    }

    /// Return the delay for the current attempt and advance to the next one.
    ///
    /// The sequence is `base * multiplier^attempt` capped at the ceiling.
    /// The attempt counter saturates, so the delay stays pinned at the
    /// ceiling no matter how long a target keeps failing.
    pub fn next_delay(&mut self) -> Duration {
        let factor = self.multiplier.powi(self.attempt.min(64) as i32);
        let delay_ms = (self.base_delay.as_millis() as f64 * factor)
            .min(self.max_delay.as_millis() as f64);
        self.attempt = self.attempt.saturating_add(1);
        Duration::from_millis(delay_ms as u64)
    }

    /// Reset to the base delay.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Number of delays handed out since the last reset.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_doubles_until_ceiling() {
        let mut backoff = Backoff::default();

        assert_eq!(backoff.next_delay(), Duration::from_millis(1_000));
        assert_eq!(backoff.next_delay(), Duration::from_millis(2_000));
        assert_eq!(backoff.next_delay(), Duration::from_millis(4_000));
        assert_eq!(backoff.next_delay(), Duration::from_millis(8_000));
    }

    #[test]
    fn test_caps_at_max() {
        let mut backoff = Backoff::default();
        let mut last = Duration::ZERO;
        for _ in 0..20 {
            last = backoff.next_delay();
        }
        assert_eq!(last, DEFAULT_MAX_DELAY);

        // Stays pinned.
        assert_eq!(backoff.next_delay(), DEFAULT_MAX_DELAY);
    }

    #[test]
    fn test_reset_returns_to_base() {
        let mut backoff = Backoff::default();
        backoff.next_delay();
        backoff.next_delay();
        backoff.next_delay();

        backoff.reset();
        assert_eq!(backoff.next_delay(), DEFAULT_BASE_DELAY);
    }

    #[test]
    fn test_custom_parameters() {
        let mut backoff = Backoff::new(
            Duration::from_millis(500),
            Duration::from_millis(2_000),
            3.0,
        );

        assert_eq!(backoff.next_delay(), Duration::from_millis(500));
        assert_eq!(backoff.next_delay(), Duration::from_millis(1_500));
        // 4500 would exceed the ceiling.
        assert_eq!(backoff.next_delay(), Duration::from_millis(2_000));
    }

    #[test]
    fn test_deep_attempt_does_not_overflow() {
        let mut backoff = Backoff::default();
        for _ in 0..10_000 {
            let delay = backoff.next_delay();
            assert!(delay <= DEFAULT_MAX_DELAY);
        }
    }
}
