//! Dependency upsert engine
//!
//! Commits one poll's parsed dependencies: alias resolution, insert/update
//! by `(service_id, name)`, transition detection, error-history recording,
//! and latency sampling, all against the caller's transaction so a poll is
//! atomic. The new-arrival hook runs after commit and is best-effort.
//!
//! `last_status_change` advances only when `healthy` actually flips (or on
//! first observation); the user-edited override columns are out of reach by
//! construction, since `DependencyWrite` simply has no fields for them.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;
use tracing::{debug, instrument, warn};

use crate::poller::events::StatusChange;
use crate::poller::history::ErrorHistoryRecorder;
use crate::poller::parser::ParsedDependency;
use crate::store::error::StoreResult;
use crate::store::schema::{DependencyWrite, ServiceRow};
use crate::store::sqlite::SqliteStore;

/// Seam to the association-matching subsystem
///
/// Freshly-inserted dependency ids are handed over for background
/// suggestion generation. Implementations must tolerate redelivery; the
/// engine does not retry.
#[async_trait]
pub trait SuggestionSink: Send + Sync {
    async fn on_new_dependencies(
        &self,
        service_id: &str,
        dependency_ids: &[i64],
    ) -> anyhow::Result<()>;
}

/// What one upsert batch did
#[derive(Debug, Default)]
pub struct UpsertOutcome {
    /// Dependencies whose `healthy` flag flipped
    pub status_changes: Vec<StatusChange>,

    /// Ids of rows inserted for the first time, for the suggestion hook
    pub new_dependency_ids: Vec<i64>,

    /// Total rows written (inserted + updated)
    pub rows_written: usize,
}

/// Writes parsed dependency batches through the store
#[derive(Default)]
pub struct DependencyUpsertEngine {
    suggestions: Option<Arc<dyn SuggestionSink>>,
}

impl DependencyUpsertEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_suggestion_sink(sink: Arc<dyn SuggestionSink>) -> Self {
        Self {
            suggestions: Some(sink),
        }
    }

    /// Commit a batch of parsed dependencies inside `conn`'s transaction.
    #[instrument(skip_all, fields(service_id = %service.id, count = parsed.len()))]
    pub async fn apply(
        &self,
        conn: &mut SqliteConnection,
        service: &ServiceRow,
        parsed: &[ParsedDependency],
        now: DateTime<Utc>,
    ) -> StoreResult<UpsertOutcome> {
        let mut outcome = UpsertOutcome::default();

        for dep in parsed {
            let canonical_name = SqliteStore::resolve_alias_tx(conn, &dep.name).await?;

            let error_json = dep
                .error
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?;
            let check_details_json = dep
                .check_details
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?;

            let write = DependencyWrite {
                service_id: service.id.clone(),
                name: dep.name.clone(),
                canonical_name,
                description: dep.description.clone(),
                impact: dep.impact.clone(),
                kind: dep.kind,
                healthy: dep.healthy,
                health_state: dep.health_state,
                health_code: dep.health_code,
                latency_ms: dep.latency_ms,
                check_details: check_details_json,
                error: error_json.clone(),
                error_message: dep.error_message.clone(),
                last_checked: dep.last_checked,
            };

            let existing = SqliteStore::find_dependency_tx(conn, &service.id, &dep.name).await?;

            let dependency_id = match existing {
                None => {
                    let id = SqliteStore::insert_dependency_tx(conn, &write, now).await?;
                    debug!(dependency = %dep.name, id, "new dependency observed");
                    outcome.new_dependency_ids.push(id);
                    id
                }
                Some(previous) => {
                    let flipped = previous.healthy != Some(dep.healthy);
                    let last_status_change = if flipped {
                        Some(now)
                    } else {
                        previous.last_status_change
                    };

                    SqliteStore::update_dependency_tx(
                        conn,
                        previous.id,
                        &write,
                        last_status_change,
                        now,
                    )
                    .await?;

                    if let Some(previous_healthy) = previous.healthy
                        && previous_healthy != dep.healthy
                    {
                        outcome.status_changes.push(StatusChange {
                            service_id: service.id.clone(),
                            service_name: service.name.clone(),
                            dependency_name: dep.name.clone(),
                            previous_healthy: Some(previous_healthy),
                            current_healthy: dep.healthy,
                            timestamp: now,
                        });
                    }

                    previous.id
                }
            };

            ErrorHistoryRecorder::record(
                conn,
                dependency_id,
                dep.healthy,
                error_json.as_deref(),
                dep.error_message.as_deref(),
                now,
            )
            .await?;

            if let Some(latency_ms) = dep.latency_ms
                && latency_ms > 0
            {
                SqliteStore::append_latency_tx(conn, dependency_id, latency_ms, now).await?;
            }

            outcome.rows_written += 1;
        }

        Ok(outcome)
    }

    /// Hand freshly-inserted dependency ids to the suggestion subsystem.
    ///
    /// Called after the poll's transaction commits. Failures are logged and
    /// never propagate: suggestion generation must not fail a poll.
    pub async fn notify_new_dependencies(&self, service_id: &str, dependency_ids: &[i64]) {
        if dependency_ids.is_empty() {
            return;
        }
        let Some(sink) = &self.suggestions else {
            return;
        };

        if let Err(e) = sink.on_new_dependencies(service_id, dependency_ids).await {
            warn!(
                service_id,
                count = dependency_ids.len(),
                "suggestion generation failed: {e:#}"
            );
        }
    }
}
