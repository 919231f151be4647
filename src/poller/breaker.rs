//! Per-service circuit breaker
//!
//! Three-state admission filter shielding a repeatedly-failing target:
//!
//! ```text
//! Closed:    all attempts allowed; N consecutive failures → Open
//! Open:      attempts refused until the cooldown elapses, then the next
//!            admission check transitions to HalfOpen
//! HalfOpen:  one probe allowed; success → Closed, failure → Open
//!            (cooldown restarts)
//! ```
//!
//! Fatal errors (SSRF violation, invalid URL) never reach the breaker: the
//! poller neither consults nor records on those paths, so a misconfigured
//! endpoint does not mask a later recovery probe.

use std::time::{Duration, Instant};

/// Default consecutive-failure threshold before opening.
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 10;

/// Default cooldown before a half-open probe: 5 minutes.
pub const DEFAULT_COOLDOWN: Duration = Duration::from_millis(300_000);

/// Breaker admission state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

/// Circuit breaker keyed per service
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    failure_threshold: u32,
    cooldown: Duration,
    state: BreakerState,
    failures: u32,
    last_failure: Option<Instant>,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(DEFAULT_FAILURE_THRESHOLD, DEFAULT_COOLDOWN)
    }
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            failure_threshold,
            cooldown,
            state: BreakerState::Closed,
            failures: 0,
            last_failure: None,
        }
    }

    /// Whether an attempt may proceed right now.
    ///
    /// In `Open`, the first call after the cooldown elapses transitions to
    /// `HalfOpen` and admits the probe.
    pub fn can_attempt(&mut self) -> bool {
        match self.state {
            BreakerState::Closed | BreakerState::HalfOpen => true,
            BreakerState::Open => {
                let cooled_down = self
                    .last_failure
                    .is_none_or(|at| at.elapsed() >= self.cooldown);
                if cooled_down {
                    self.state = BreakerState::HalfOpen;
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Record a successful attempt: close and reset.
    pub fn record_success(&mut self) {
        self.state = BreakerState::Closed;
        self.failures = 0;
        self.last_failure = None;
    }

    /// Record a failed attempt.
    ///
    /// A failure in `HalfOpen` re-opens immediately; in `Closed`, the
    /// breaker opens once the threshold is reached.
    pub fn record_failure(&mut self) {
        self.failures = self.failures.saturating_add(1);
        self.last_failure = Some(Instant::now());

        match self.state {
            BreakerState::HalfOpen => self.state = BreakerState::Open,
            BreakerState::Closed | BreakerState::Open => {
                if self.failures >= self.failure_threshold {
                    self.state = BreakerState::Open;
                }
            }
        }
    }

    pub fn state(&self) -> BreakerState {
        self.state
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closed_allows_attempts() {
        let mut breaker = CircuitBreaker::default();
        assert!(breaker.can_attempt());
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[test]
    fn test_opens_at_exact_threshold() {
        let mut breaker = CircuitBreaker::new(3, Duration::from_secs(60));

        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Closed);
        assert!(breaker.can_attempt());

        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Open);
        assert!(!breaker.can_attempt());
    }

    #[test]
    fn test_half_open_after_cooldown() {
        let mut breaker = CircuitBreaker::new(1, Duration::from_millis(10));

        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Open);
        assert!(!breaker.can_attempt());

        std::thread::sleep(Duration::from_millis(20));

        // First admission check after cooldown flips to half-open.
        assert!(breaker.can_attempt());
        assert_eq!(breaker.state(), BreakerState::HalfOpen);
    }

    #[test]
    fn test_half_open_success_closes() {
        let mut breaker = CircuitBreaker::new(1, Duration::from_millis(10));
        breaker.record_failure();
        std::thread::sleep(Duration::from_millis(20));
        assert!(breaker.can_attempt());

        breaker.record_success();
        assert_eq!(breaker.state(), BreakerState::Closed);
        assert_eq!(breaker.failures(), 0);
    }

    #[test]
    fn test_half_open_failure_reopens_with_fresh_cooldown() {
        let mut breaker = CircuitBreaker::new(1, Duration::from_millis(40));
        breaker.record_failure();
        std::thread::sleep(Duration::from_millis(50));
        assert!(breaker.can_attempt());
        assert_eq!(breaker.state(), BreakerState::HalfOpen);

        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Open);

        // Cooldown restarted: still refused immediately after.
        assert!(!breaker.can_attempt());
    }

    #[test]
    fn test_success_resets_failure_count() {
        let mut breaker = CircuitBreaker::new(3, Duration::from_secs(60));
        breaker.record_failure();
        breaker.record_failure();
        breaker.record_success();

        // Needs the full threshold again.
        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Closed);
    }
}
