//! Runtime configuration for the polling core
//!
//! Everything here comes from the environment with hard-coded fallbacks, so
//! a bare deployment works without any configuration at all. The two
//! externally-tunable knobs (`POLL_CYCLE_MS`, `POLL_MAX_CONCURRENT_PER_HOST`)
//! are read once at startup; breaker and backoff defaults are constants
//! shared with their modules.

use std::time::Duration;

const POLL_CYCLE_MS: &str = "POLL_CYCLE_MS";
const POLL_MAX_CONCURRENT_PER_HOST: &str = "POLL_MAX_CONCURRENT_PER_HOST";

/// Default scheduler cycle: 30 seconds.
pub const DEFAULT_POLL_CYCLE_MS: u64 = 30_000;

/// Default per-host concurrent fetch cap.
pub const DEFAULT_MAX_CONCURRENT_PER_HOST: usize = 10;

/// Absolute HTTP timeout for a single health fetch.
pub const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// How long shutdown waits for in-flight polls to settle.
pub const SHUTDOWN_DRAIN: Duration = Duration::from_secs(5);

/// Interval between drain checks during shutdown.
pub const SHUTDOWN_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Smallest accepted per-service poll interval (5 seconds).
pub const MIN_POLL_INTERVAL_MS: i64 = 5_000;

/// Largest accepted per-service poll interval (1 hour).
pub const MAX_POLL_INTERVAL_MS: i64 = 3_600_000;

/// Configuration for the scheduler and its shared limiters
#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Cycle loop period
    pub poll_cycle: Duration,

    /// Per-hostname in-flight fetch cap
    pub max_concurrent_per_host: usize,

    /// Absolute fetch timeout
    pub fetch_timeout: Duration,

    /// Shutdown drain ceiling
    pub shutdown_drain: Duration,

    /// Admit private/loopback health endpoints (development setups where
    /// the monitored services live on the local network)
    pub allow_private_endpoints: bool,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            poll_cycle: Duration::from_millis(DEFAULT_POLL_CYCLE_MS),
            max_concurrent_per_host: DEFAULT_MAX_CONCURRENT_PER_HOST,
            fetch_timeout: FETCH_TIMEOUT,
            shutdown_drain: SHUTDOWN_DRAIN,
            allow_private_endpoints: false,
        }
    }
}

impl PollerConfig {
    /// Read configuration from the environment, falling back to defaults for
    /// anything unset or unparseable.
    pub fn from_env() -> Self {
        let poll_cycle_ms = std::env::var(POLL_CYCLE_MS)
            .map_or(DEFAULT_POLL_CYCLE_MS, |v| {
                v.parse().unwrap_or(DEFAULT_POLL_CYCLE_MS)
            });

        let max_per_host = std::env::var(POLL_MAX_CONCURRENT_PER_HOST)
            .map_or(DEFAULT_MAX_CONCURRENT_PER_HOST, |v| {
                v.parse().unwrap_or(DEFAULT_MAX_CONCURRENT_PER_HOST)
            });

        Self {
            poll_cycle: Duration::from_millis(poll_cycle_ms),
            max_concurrent_per_host: max_per_host,
            ..Self::default()
        }
    }

    /// Validate configuration parameters
    pub fn validate(&self) -> Result<(), String> {
        if self.poll_cycle < Duration::from_millis(1_000) {
            return Err("poll cycle must be at least 1000ms".to_string());
        }
        if self.max_concurrent_per_host == 0 {
            return Err("max_concurrent_per_host must be at least 1".to_string());
        }
        if self.poll_cycle > self.fetch_timeout {
            tracing::warn!(
                "poll cycle ({:?}) exceeds the fetch timeout ({:?}); slow endpoints \
                 will overlap into the next cycle",
                self.poll_cycle,
                self.fetch_timeout
            );
        }
        Ok(())
    }
}

/// Bounds check applied wherever a per-service poll interval enters the
/// system (service CRUD, drift-accept).
pub fn validate_poll_interval_ms(interval_ms: i64) -> Result<(), String> {
    if !(MIN_POLL_INTERVAL_MS..=MAX_POLL_INTERVAL_MS).contains(&interval_ms) {
        return Err(format!(
            "poll_interval_ms must be between {} and {}",
            MIN_POLL_INTERVAL_MS, MAX_POLL_INTERVAL_MS
        ));
    }
    Ok(())
}
