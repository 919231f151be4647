//! Per-host concurrency limiter
//!
//! Bounds the number of in-flight fetches sharing a hostname so that a
//! registry full of services on one box cannot stampede it. Admission is an
//! atomic check-and-increment under a single mutex guard.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::config::DEFAULT_MAX_CONCURRENT_PER_HOST;

/// In-flight fetch counter keyed by hostname
#[derive(Debug)]
pub struct HostRateLimiter {
    max_per_host: usize,
    in_flight: Mutex<HashMap<String, usize>>,
}

impl Default for HostRateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CONCURRENT_PER_HOST)
    }
}

impl HostRateLimiter {
    pub fn new(max_per_host: usize) -> Self {
        Self {
            max_per_host,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Try to admit one fetch for `host`. Returns `false` at capacity.
    pub fn acquire(&self, host: &str) -> bool {
        let mut in_flight = self.in_flight.lock().expect("host limiter poisoned");
        let count = in_flight.entry(host.to_string()).or_insert(0);
        if *count >= self.max_per_host {
            return false;
        }
        *count += 1;
        true
    }

    /// Release one admission for `host`. Unknown hosts are a no-op; the
    /// entry is dropped when its count reaches zero.
    pub fn release(&self, host: &str) {
        let mut in_flight = self.in_flight.lock().expect("host limiter poisoned");
        if let Some(count) = in_flight.get_mut(host) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                in_flight.remove(host);
            }
        }
    }

    /// Current in-flight count for `host`.
    pub fn in_flight(&self, host: &str) -> usize {
        self.in_flight
            .lock()
            .expect("host limiter poisoned")
            .get(host)
            .copied()
            .unwrap_or(0)
    }

    /// Number of hosts with at least one in-flight fetch.
    pub fn tracked_hosts(&self) -> usize {
        self.in_flight.lock().expect("host limiter poisoned").len()
    }
}

/// Extract the hostname from a URL, falling back to the raw string when the
/// input does not parse as one.
pub fn host_of(raw: &str) -> String {
    url::Url::parse(raw)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_string()))
        .unwrap_or_else(|| raw.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_admits_up_to_capacity() {
        let limiter = HostRateLimiter::new(2);

        assert!(limiter.acquire("db.example.com"));
        assert!(limiter.acquire("db.example.com"));
        assert!(!limiter.acquire("db.example.com"));

        // A different host has its own counter.
        assert!(limiter.acquire("api.example.com"));
    }

    #[test]
    fn test_release_readmits() {
        let limiter = HostRateLimiter::new(1);

        assert!(limiter.acquire("db.example.com"));
        assert!(!limiter.acquire("db.example.com"));

        limiter.release("db.example.com");
        assert!(limiter.acquire("db.example.com"));
    }

    #[test]
    fn test_release_unknown_host_is_noop() {
        let limiter = HostRateLimiter::new(1);
        limiter.release("never-seen.example.com");
        assert_eq!(limiter.tracked_hosts(), 0);
    }

    #[test]
    fn test_entry_removed_at_zero() {
        let limiter = HostRateLimiter::new(2);
        assert!(limiter.acquire("db.example.com"));
        assert_eq!(limiter.tracked_hosts(), 1);

        limiter.release("db.example.com");
        assert_eq!(limiter.tracked_hosts(), 0);
        assert_eq!(limiter.in_flight("db.example.com"), 0);
    }

    #[test]
    fn test_host_of_extracts_hostname() {
        assert_eq!(host_of("https://db.example.com:8443/health"), "db.example.com");
        assert_eq!(host_of("http://10.1.2.3/health"), "10.1.2.3");
    }

    #[test]
    fn test_host_of_falls_back_to_raw() {
        assert_eq!(host_of("not a url"), "not a url");
    }
}
