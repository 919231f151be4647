//! One-shot service poller
//!
//! Runs the whole acquisition pipeline for a single service once:
//!
//! ```text
//! SSRF gate → breaker admission → host-limiter admission →
//!     deduplicated HTTP GET (30 s timeout) → parse → transactional upsert
//! ```
//!
//! Failures surface as a `PollResult` with a sanitized error string; the
//! poller never returns `Err`. The circuit breaker only hears about
//! target-attributable failures (network, non-2xx, unparseable payload).
//! Fatal misconfiguration (SSRF, invalid URL) and local refusals (breaker
//! open, host at capacity, store trouble) bypass it so they cannot mask a
//! recovery probe.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::FutureExt;
use reqwest::header::{ACCEPT, USER_AGENT};
use tracing::{debug, instrument, trace, warn};

use crate::poller::backoff::Backoff;
use crate::poller::breaker::{BreakerState, CircuitBreaker};
use crate::poller::dedup::{FetchOutcome, FetchResponse, PollDeduplicator};
use crate::poller::events::PollResult;
use crate::poller::host_limit::{HostRateLimiter, host_of};
use crate::poller::parser::parse_dependencies;
use crate::poller::upsert::DependencyUpsertEngine;
use crate::sanitize::sanitize_error_message;
use crate::ssrf::SsrfPolicy;
use crate::store::schema::ServiceRow;
use crate::store::sqlite::SqliteStore;

/// User-Agent sent on every health fetch.
pub const POLL_USER_AGENT: &str = "Dependencies-Dashboard/1.0";

/// Polls a single service's health endpoint
pub struct ServicePoller {
    service: ServiceRow,
    backoff: Backoff,
    breaker: CircuitBreaker,
    consecutive_failures: u32,

    client: reqwest::Client,
    store: Arc<SqliteStore>,
    engine: Arc<DependencyUpsertEngine>,
    host_limiter: Arc<HostRateLimiter>,
    dedup: Arc<PollDeduplicator>,
    ssrf: SsrfPolicy,
}

impl ServicePoller {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        service: ServiceRow,
        client: reqwest::Client,
        store: Arc<SqliteStore>,
        engine: Arc<DependencyUpsertEngine>,
        host_limiter: Arc<HostRateLimiter>,
        dedup: Arc<PollDeduplicator>,
        ssrf: SsrfPolicy,
    ) -> Self {
        Self {
            service,
            backoff: Backoff::default(),
            breaker: CircuitBreaker::default(),
            consecutive_failures: 0,
            client,
            store,
            engine,
            host_limiter,
            dedup,
            ssrf,
        }
    }

    /// Perform one poll attempt end to end.
    #[instrument(skip(self), fields(service = %self.service.name))]
    pub async fn poll(&mut self) -> PollResult {
        let start = Instant::now();
        let endpoint = self.service.health_endpoint.clone();

        trace!("polling {endpoint}");

        // Fatal gate: a blocked or malformed URL never produces outbound
        // I/O and never touches the breaker.
        if let Err(violation) = self.ssrf.validate(&endpoint) {
            warn!("endpoint rejected: {violation}");
            return self.fail(violation.to_string(), start, false);
        }

        if !self.breaker.can_attempt() {
            return self.fail("Circuit breaker is open".to_string(), start, false);
        }

        let host = host_of(&endpoint);
        if !self.host_limiter.acquire(&host) {
            return self.fail(
                format!("Rate limited: too many concurrent polls for {host}"),
                start,
                false,
            );
        }

        let outcome = self
            .dedup
            .fetch(&endpoint, {
                let client = self.client.clone();
                let url = endpoint.clone();
                move || execute_fetch(client, url).boxed()
            })
            .await;

        self.host_limiter.release(&host);

        let response = match outcome {
            Ok(response) => response,
            Err(message) => return self.fail(message, start, true),
        };

        if !response.is_success() {
            let reason = response.reason.unwrap_or("");
            return self.fail(format!("HTTP {}: {}", response.status, reason), start, true);
        }

        let body: serde_json::Value = match serde_json::from_str(&response.body) {
            Ok(value) => value,
            // No payload snippets in the message: the body is untrusted.
            Err(_) => return self.fail("health response is not valid JSON".to_string(), start, true),
        };

        let now = Utc::now();
        let parsed = match parse_dependencies(&body, self.service.schema_config.as_ref(), now) {
            Ok(parsed) => parsed,
            Err(e) => return self.fail(e.to_string(), start, true),
        };

        // All writes for one poll commit atomically.
        let mut tx = match self.store.begin().await {
            Ok(tx) => tx,
            Err(e) => return self.fail(e.to_string(), start, false),
        };
        let applied = self
            .engine
            .apply(&mut tx, &self.service, &parsed, now)
            .await;
        let outcome = match applied {
            Ok(outcome) => match tx.commit().await {
                Ok(()) => outcome,
                Err(e) => return self.fail(e.to_string(), start, false),
            },
            Err(e) => {
                // Local trouble, not the target's: roll back and move on.
                let _ = tx.rollback().await;
                return self.fail(e.to_string(), start, false);
            }
        };

        // Best-effort hook, after the commit so suggestion consumers never
        // hold the poll transaction open.
        self.engine
            .notify_new_dependencies(&self.service.id, &outcome.new_dependency_ids)
            .await;

        self.breaker.record_success();
        self.backoff.reset();
        self.consecutive_failures = 0;

        let latency_ms = start.elapsed().as_millis() as u64;
        debug!(
            dependencies = outcome.rows_written,
            status_changes = outcome.status_changes.len(),
            latency_ms,
            "poll complete"
        );

        PollResult {
            success: true,
            dependencies_updated: outcome.rows_written,
            status_changes: outcome.status_changes,
            error: None,
            latency_ms,
        }
    }

    /// Delay before this service's next poll: backoff while failing, the
    /// configured interval otherwise.
    pub fn get_next_poll_delay(&mut self) -> Duration {
        if self.consecutive_failures > 0 {
            self.backoff.next_delay()
        } else {
            Duration::from_millis(self.service.poll_interval_ms.max(0) as u64)
        }
    }

    /// Replace the registry snapshot (endpoint change, interval change).
    /// An in-flight fetch is not cancelled; the next poll uses the new
    /// snapshot.
    pub fn update_service(&mut self, service: ServiceRow) {
        if service.health_endpoint != self.service.health_endpoint {
            debug!(
                service = %service.name,
                "health endpoint changed, next poll targets the new URL"
            );
        }
        self.service = service;
    }

    pub fn service(&self) -> &ServiceRow {
        &self.service
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn breaker_state(&self) -> BreakerState {
        self.breaker.state()
    }

    fn fail(&mut self, message: String, start: Instant, target_failure: bool) -> PollResult {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        if target_failure {
            self.breaker.record_failure();
        }

        let sanitized = sanitize_error_message(&message);
        warn!(
            service = %self.service.name,
            consecutive_failures = self.consecutive_failures,
            "poll failed: {sanitized}"
        );

        PollResult::failure(sanitized, start.elapsed().as_millis() as u64)
    }
}

/// Execute the HTTP exchange. Reads the body eagerly so the outcome is
/// cloneable across coalesced callers.
async fn execute_fetch(client: reqwest::Client, url: String) -> FetchOutcome {
    let response = client
        .get(&url)
        .header(ACCEPT, "application/json")
        .header(USER_AGENT, POLL_USER_AGENT)
        .send()
        .await
        .map_err(|e| fetch_error_message(&e))?;

    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| fetch_error_message(&e))?;

    Ok(FetchResponse {
        status: status.as_u16(),
        reason: status.canonical_reason(),
        body,
    })
}

/// Flatten a reqwest error with its source chain. The top-level display is
/// deliberately terse ("error sending request"); the chain carries the OS
/// phrase the sanitizer keys on.
fn fetch_error_message(error: &reqwest::Error) -> String {
    if error.is_timeout() {
        return "Connection timed out".to_string();
    }

    let mut message = error.to_string();
    let mut source = std::error::Error::source(error);
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
