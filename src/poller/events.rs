//! Result and event types for the polling core
//!
//! ## Design Principles
//!
//! 1. **Results**: `PollResult` is the return value of a single poll and is
//!    consumed by the scheduler; it never propagates as an `Err`.
//! 2. **Events**: `PollEvent` variants are broadcast notifications published
//!    to every subscriber. Delivery is best-effort within the process: the
//!    broadcast channel may lag or drop for slow subscribers, and the core
//!    never blocks on a listener.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome record of one poll attempt
#[derive(Debug, Clone)]
pub struct PollResult {
    /// Whether fetch, parse, and commit all succeeded
    pub success: bool,

    /// Number of dependency rows written in this poll
    pub dependencies_updated: usize,

    /// Dependencies whose `healthy` flag flipped
    pub status_changes: Vec<StatusChange>,

    /// Sanitized failure message
    pub error: Option<String>,

    /// Wall time of the whole attempt
    pub latency_ms: u64,
}

impl PollResult {
    /// A failed result carrying only an error message.
    pub fn failure(error: impl Into<String>, latency_ms: u64) -> Self {
        Self {
            success: false,
            dependencies_updated: 0,
            status_changes: Vec::new(),
            error: Some(error.into()),
            latency_ms,
        }
    }
}

/// A dependency's `healthy` flag flipped between two polls
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusChange {
    pub service_id: String,
    pub service_name: String,
    pub dependency_name: String,

    /// `None` when the dependency had never reported health before
    pub previous_healthy: Option<bool>,

    pub current_healthy: bool,
    pub timestamp: DateTime<Utc>,
}

/// Events published on the scheduler's broadcast channel
///
/// One channel carries every kind; consumers match on the variant they care
/// about. Listeners are best-effort: a lagging subscriber loses events
/// rather than slowing the polling core down.
#[derive(Debug, Clone)]
pub enum PollEvent {
    /// A dependency transitioned between healthy and unhealthy
    StatusChange(StatusChange),

    /// A poll finished (successfully or not)
    PollComplete {
        service_id: String,
        service_name: String,
        success: bool,
        dependencies_updated: usize,
        latency_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// A poll failed; `error` is sanitized
    PollError {
        service_id: String,
        service_name: String,
        error: String,
        consecutive_failures: u32,
        timestamp: DateTime<Utc>,
    },

    /// A service was added to the polling set
    ServiceStarted {
        service_id: String,
        service_name: String,
    },

    /// A service was removed from the polling set
    ServiceStopped {
        service_id: String,
        service_name: String,
    },
}
