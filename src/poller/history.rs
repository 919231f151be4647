//! Transition-only history recorders
//!
//! Both recorders append a row only when the observed state differs from the
//! last recorded one, so the history is an event log of transitions rather
//! than of polls. Given the last entry `L` and the new observation `O`:
//!
//! ```text
//! L = none,          O = healthy            → skip (first success is silent)
//! L = none,          O = unhealthy(E)       → record
//! L = unhealthy(E),  O = unhealthy(E)       → skip (duplicate)
//! L = unhealthy(E1), O = unhealthy(E2)      → record (error changed)
//! L = unhealthy(E),  O = healthy            → record recovery (all null)
//! L = recovery,      O = healthy            → skip
//! L = recovery,      O = unhealthy(E)       → record
//! ```
//!
//! Dependency-level identity is the serialized `error` JSON; the message
//! accompanies it but does not by itself trigger records. Service-level
//! identity is the error-message string, with `"Unknown poll error"`
//! substituted for message-less failures.
//!
//! Both run inside the caller's transaction.

use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;
use tracing::trace;

use crate::store::error::StoreResult;
use crate::store::sqlite::SqliteStore;

/// Synthetic key for service poll failures without a message.
pub const UNKNOWN_POLL_ERROR: &str = "Unknown poll error";

/// Dependency-level transition recorder
pub struct ErrorHistoryRecorder;

impl ErrorHistoryRecorder {
    /// Record the observation if it constitutes a transition.
    ///
    /// `error` is the serialized error JSON. Returns whether a row was
    /// written.
    pub async fn record(
        conn: &mut SqliteConnection,
        dependency_id: i64,
        healthy: bool,
        error: Option<&str>,
        error_message: Option<&str>,
        now: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let last = SqliteStore::last_error_event_tx(conn, dependency_id).await?;

        if healthy {
            match last {
                Some(ref entry) if !entry.is_recovery() => {
                    trace!(dependency_id, "recording recovery");
                    SqliteStore::append_error_event_tx(conn, dependency_id, None, None, now)
                        .await?;
                    Ok(true)
                }
                // Never errored, or already recovered: silent.
                _ => Ok(false),
            }
        } else {
            let should_record = match last {
                None => true,
                Some(ref entry) if entry.is_recovery() => true,
                Some(ref entry) => entry.error.as_deref() != error,
            };

            if should_record {
                trace!(dependency_id, "recording error transition");
                SqliteStore::append_error_event_tx(
                    conn,
                    dependency_id,
                    error,
                    error_message,
                    now,
                )
                .await?;
            }
            Ok(should_record)
        }
    }
}

/// Service-level transition recorder
pub struct ServicePollHistoryRecorder;

impl ServicePollHistoryRecorder {
    /// Record the poll outcome if it constitutes a transition. Returns
    /// whether a row was written.
    pub async fn record(
        conn: &mut SqliteConnection,
        service_id: &str,
        success: bool,
        error_message: Option<&str>,
        now: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let last = SqliteStore::last_poll_event_tx(conn, service_id).await?;

        if success {
            match last {
                Some(ref entry) if !entry.is_recovery() => {
                    trace!(service_id, "recording poll recovery");
                    SqliteStore::append_poll_event_tx(conn, service_id, None, now).await?;
                    Ok(true)
                }
                _ => Ok(false),
            }
        } else {
            let message = error_message.unwrap_or(UNKNOWN_POLL_ERROR);

            let should_record = match last {
                None => true,
                Some(ref entry) if entry.is_recovery() => true,
                Some(ref entry) => entry.error.as_deref() != Some(message),
            };

            if should_record {
                trace!(service_id, "recording poll error transition");
                SqliteStore::append_poll_event_tx(conn, service_id, Some(message), now).await?;
            }
            Ok(should_record)
        }
    }
}
