//! Property-based tests for polling-core invariants using proptest
//!
//! These tests verify that certain properties hold true for all inputs:
//! - Backoff delays never exceed the ceiling and reset to base
//! - The circuit breaker opens at exactly the configured threshold
//! - Sanitized error messages never leak addresses and respect the length cap
//! - The host limiter's admission count never exceeds its capacity
//! - Parsed payloads preserve every item

use std::time::Duration;

use proptest::prelude::*;
use service_observatory::poller::backoff::Backoff;
use service_observatory::poller::breaker::{BreakerState, CircuitBreaker};
use service_observatory::poller::host_limit::HostRateLimiter;
use service_observatory::poller::parser::parse_dependencies;
use service_observatory::sanitize::sanitize_error_message;

// Property: backoff is nondecreasing and never exceeds the ceiling
proptest! {
    #[test]
    fn prop_backoff_nondecreasing_and_capped(
        base_ms in 1u64..5_000,
        max_ms in 5_000u64..600_000,
        attempts in 1usize..40,
    ) {
        let mut backoff = Backoff::new(
            Duration::from_millis(base_ms),
            Duration::from_millis(max_ms),
            2.0,
        );

        let mut previous = Duration::ZERO;
        for _ in 0..attempts {
            let delay = backoff.next_delay();
            prop_assert!(delay >= previous);
            prop_assert!(delay <= Duration::from_millis(max_ms));
            previous = delay;
        }
    }
}

// Property: reset always returns the next delay to base
proptest! {
    #[test]
    fn prop_backoff_reset_returns_to_base(
        base_ms in 1u64..5_000,
        warmup in 0usize..30,
    ) {
        let mut backoff = Backoff::new(
            Duration::from_millis(base_ms),
            Duration::from_millis(600_000),
            2.0,
        );
        for _ in 0..warmup {
            backoff.next_delay();
        }

        backoff.reset();
        prop_assert_eq!(backoff.next_delay(), Duration::from_millis(base_ms));
    }
}

// Property: exactly N failures (N = threshold) opens the breaker, N-1 does not
proptest! {
    #[test]
    fn prop_breaker_opens_at_exact_threshold(threshold in 1u32..50) {
        let mut breaker = CircuitBreaker::new(threshold, Duration::from_secs(300));

        for _ in 0..threshold - 1 {
            breaker.record_failure();
        }
        prop_assert_eq!(breaker.state(), BreakerState::Closed);

        breaker.record_failure();
        prop_assert_eq!(breaker.state(), BreakerState::Open);
    }
}

// Property: sanitized messages never leak private or loopback addresses
proptest! {
    #[test]
    fn prop_sanitizer_redacts_private_addresses(
        prefix in "[a-zA-Z ]{0,30}",
        octet2 in 0u8..=255,
        octet3 in 0u8..=255,
        octet4 in 0u8..=255,
        port in 1u16..65535,
    ) {
        for first in ["10", "127", "192.168"] {
            let address = if first == "192.168" {
                format!("192.168.{octet3}.{octet4}")
            } else {
                format!("{first}.{octet2}.{octet3}.{octet4}")
            };
            let message = format!("{prefix} failed for {address}:{port}");
            let sanitized = sanitize_error_message(&message);
            prop_assert!(
                !sanitized.contains(&address),
                "leaked {} in {}",
                address,
                sanitized
            );
        }
    }
}

// Property: sanitized output never exceeds the cap (plus the ellipsis)
proptest! {
    #[test]
    fn prop_sanitizer_respects_length_cap(message in ".{0,600}") {
        let sanitized = sanitize_error_message(&message);
        prop_assert!(sanitized.chars().count() <= 201);
    }
}

// Property: admissions never exceed capacity, and full release empties the map
proptest! {
    #[test]
    fn prop_host_limiter_counts_bounded(
        capacity in 1usize..20,
        attempts in 1usize..60,
    ) {
        let limiter = HostRateLimiter::new(capacity);

        let mut admitted = 0usize;
        for _ in 0..attempts {
            if limiter.acquire("shared.example.com") {
                admitted += 1;
            }
        }
        prop_assert!(admitted <= capacity);
        prop_assert_eq!(admitted, attempts.min(capacity));

        for _ in 0..admitted {
            limiter.release("shared.example.com");
        }
        prop_assert_eq!(limiter.tracked_hosts(), 0);
    }
}

// Property: every well-formed payload item survives parsing with its fields
proptest! {
    #[test]
    fn prop_parser_preserves_items(
        items in prop::collection::vec(("[a-z][a-z0-9-]{0,20}", any::<bool>()), 0..20)
    ) {
        // Duplicate names are legal on the wire; the upsert collapses them
        // later, the parser must not.
        let body = serde_json::Value::Array(
            items
                .iter()
                .map(|(name, healthy)| {
                    serde_json::json!({"name": name, "healthy": healthy})
                })
                .collect(),
        );

        let parsed = parse_dependencies(&body, None, chrono::Utc::now()).unwrap();
        prop_assert_eq!(parsed.len(), items.len());
        for (dep, (name, healthy)) in parsed.iter().zip(&items) {
            prop_assert_eq!(&dep.name, name);
            prop_assert_eq!(dep.healthy, *healthy);
        }
    }
}

// Sequence check: a breaker driven through failure, cooldown, and probe
// follows the documented transitions.
#[test]
fn test_breaker_transition_sequence() {
    let mut breaker = CircuitBreaker::new(2, Duration::from_millis(20));

    assert!(breaker.can_attempt());
    breaker.record_failure();
    breaker.record_failure();
    assert_eq!(breaker.state(), BreakerState::Open);
    assert!(!breaker.can_attempt());

    std::thread::sleep(Duration::from_millis(30));
    assert!(breaker.can_attempt());
    assert_eq!(breaker.state(), BreakerState::HalfOpen);

    breaker.record_success();
    assert_eq!(breaker.state(), BreakerState::Closed);
    assert!(breaker.can_attempt());
}
