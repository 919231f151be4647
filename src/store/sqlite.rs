//! SQLite store for the observatory
//!
//! Typed accessors over the six polling-core tables plus a transaction
//! helper. The polling path commits each poll's writes atomically: the
//! upsert engine and the history recorders all take a live connection so
//! they compose inside one transaction.
//!
//! ## Configuration
//!
//! - **WAL mode**: readers do not block the polling writer
//! - **Connection pooling**: 5 connections
//! - **Migrations**: automatic schema versioning with sqlx
//! - **Foreign keys**: enabled so service deletion cascades through
//!   dependencies and their histories

use std::path::Path;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Pool, Row, Sqlite, SqliteConnection, Transaction};
use tracing::{debug, info, instrument};

use crate::config::validate_poll_interval_ms;

use super::error::{StoreError, StoreResult};
use super::schema::{
    DependencyAliasRow, DependencyKind, DependencyRow, DependencyWrite, ErrorHistoryRow,
    LatencySampleRow, NewService, ServicePollHistoryRow, ServiceRow,
};

/// SQLite-backed store
pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

impl SqliteStore {
    /// Open (creating if missing) the database at `db_path` and run
    /// migrations.
    #[instrument(skip_all)]
    pub async fn new(db_path: impl AsRef<Path>) -> StoreResult<Self> {
        let db_path_str = db_path.as_ref().to_string_lossy().to_string();

        info!("initializing SQLite store at: {}", db_path_str);

        let options = SqliteConnectOptions::new()
            .filename(&db_path_str)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(std::time::Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::ConnectionFailed(e.to_string()))?;

        debug!("running database migrations");
        sqlx::migrate!("./migrations").run(&pool).await?;

        info!("database migrations complete");

        Ok(Self { pool })
    }

    /// Begin a transaction. Callers pass `&mut *tx` to the `_tx` accessors
    /// and must `commit()` themselves.
    pub async fn begin(&self) -> StoreResult<Transaction<'static, Sqlite>> {
        Ok(self.pool.begin().await?)
    }

    /// Run `f` inside a transaction: commit on `Ok`, roll back on `Err`.
    pub async fn with_transaction<T, F>(&self, f: F) -> StoreResult<T>
    where
        F: for<'t> FnOnce(&'t mut Transaction<'static, Sqlite>) -> BoxFuture<'t, StoreResult<T>>,
    {
        let mut tx = self.begin().await?;
        match f(&mut tx).await {
            Ok(value) => {
                tx.commit().await?;
                Ok(value)
            }
            Err(e) => {
                let _ = tx.rollback().await;
                Err(e)
            }
        }
    }

    /// Close the pool and release resources.
    pub async fn close(&self) {
        info!("closing SQLite store");
        self.pool.close().await;
    }

    fn fmt_time(dt: &DateTime<Utc>) -> String {
        dt.to_rfc3339()
    }

    fn parse_time(raw: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(raw)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now())
    }

    fn parse_opt_time(raw: Option<String>) -> Option<DateTime<Utc>> {
        raw.map(|s| Self::parse_time(&s))
    }

    // ========================================================================
    // Services (registry interface)
    // ========================================================================

    /// Register a service. Rejects out-of-range poll intervals, the same
    /// bound drift-accept validation applies.
    #[instrument(skip(self, service), fields(service_id = %service.id))]
    pub async fn insert_service(&self, service: &NewService) -> StoreResult<ServiceRow> {
        validate_poll_interval_ms(service.poll_interval_ms).map_err(StoreError::InvalidConfig)?;

        let now = Utc::now();
        let schema_config = service
            .schema_config
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        sqlx::query(
            r#"
            INSERT INTO services (
                id, name, team_id, health_endpoint, metrics_endpoint,
                poll_interval_ms, is_active, is_external, schema_config,
                created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&service.id)
        .bind(&service.name)
        .bind(&service.team_id)
        .bind(&service.health_endpoint)
        .bind(&service.metrics_endpoint)
        .bind(service.poll_interval_ms)
        .bind(service.is_active)
        .bind(service.is_external)
        .bind(schema_config)
        .bind(Self::fmt_time(&now))
        .bind(Self::fmt_time(&now))
        .execute(&self.pool)
        .await?;

        self.find_service(&service.id)
            .await?
            .ok_or_else(|| StoreError::QueryFailed("inserted service not found".to_string()))
    }

    pub async fn find_service(&self, id: &str) -> StoreResult<Option<ServiceRow>> {
        let row = sqlx::query("SELECT * FROM services WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| Self::service_from_row(&r)).transpose()
    }

    /// The set of services the scheduler polls: active, internal, with a
    /// non-empty health endpoint.
    pub async fn find_active_non_external_services(&self) -> StoreResult<Vec<ServiceRow>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM services
            WHERE is_active = 1 AND is_external = 0 AND health_endpoint != ''
            ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::service_from_row).collect()
    }

    pub async fn set_service_active(&self, id: &str, active: bool) -> StoreResult<()> {
        sqlx::query("UPDATE services SET is_active = ?, updated_at = ? WHERE id = ?")
            .bind(active)
            .bind(Self::fmt_time(&Utc::now()))
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Registry-side endpoint change (e.g. drift-accept on
    /// `health_endpoint`); the scheduler picks it up on the next sync.
    pub async fn update_service_endpoint(&self, id: &str, health_endpoint: &str) -> StoreResult<()> {
        sqlx::query("UPDATE services SET health_endpoint = ?, updated_at = ? WHERE id = ?")
            .bind(health_endpoint)
            .bind(Self::fmt_time(&Utc::now()))
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn update_poll_interval(&self, id: &str, poll_interval_ms: i64) -> StoreResult<()> {
        validate_poll_interval_ms(poll_interval_ms).map_err(StoreError::InvalidConfig)?;
        sqlx::query("UPDATE services SET poll_interval_ms = ?, updated_at = ? WHERE id = ?")
            .bind(poll_interval_ms)
            .bind(Self::fmt_time(&Utc::now()))
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Persist the service-level outcome of a poll. `error` must already be
    /// sanitized by the caller.
    pub async fn update_poll_result(
        &self,
        id: &str,
        success: bool,
        error: Option<&str>,
    ) -> StoreResult<()> {
        sqlx::query(
            r#"
            UPDATE services
            SET last_poll_success = ?, last_poll_error = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(success)
        .bind(error)
        .bind(Self::fmt_time(&Utc::now()))
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Delete a service; dependencies and histories cascade.
    pub async fn delete_service(&self, id: &str) -> StoreResult<()> {
        sqlx::query("DELETE FROM services WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    fn service_from_row(row: &SqliteRow) -> StoreResult<ServiceRow> {
        let schema_config: Option<String> = row.get("schema_config");
        let schema_config = schema_config
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?;

        Ok(ServiceRow {
            id: row.get("id"),
            name: row.get("name"),
            team_id: row.get("team_id"),
            health_endpoint: row.get("health_endpoint"),
            metrics_endpoint: row.get("metrics_endpoint"),
            poll_interval_ms: row.get("poll_interval_ms"),
            is_active: row.get("is_active"),
            is_external: row.get("is_external"),
            schema_config,
            last_poll_success: row.get("last_poll_success"),
            last_poll_error: row.get("last_poll_error"),
            created_at: Self::parse_time(&row.get::<String, _>("created_at")),
            updated_at: Self::parse_time(&row.get::<String, _>("updated_at")),
        })
    }

    // ========================================================================
    // Dependency aliases
    // ========================================================================

    pub async fn upsert_alias(&self, alias: &str, canonical_name: &str) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO dependency_aliases (alias, canonical_name)
            VALUES (?, ?)
            ON CONFLICT (alias) DO UPDATE SET canonical_name = excluded.canonical_name
            "#,
        )
        .bind(alias)
        .bind(canonical_name)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn resolve_alias(&self, alias: &str) -> StoreResult<Option<String>> {
        let mut conn = self.pool.acquire().await?;
        Self::resolve_alias_tx(&mut conn, alias).await
    }

    pub async fn resolve_alias_tx(
        conn: &mut SqliteConnection,
        alias: &str,
    ) -> StoreResult<Option<String>> {
        let row = sqlx::query("SELECT canonical_name FROM dependency_aliases WHERE alias = ?")
            .bind(alias)
            .fetch_optional(conn)
            .await?;
        Ok(row.map(|r| r.get("canonical_name")))
    }

    /// Full alias table, for admin tooling.
    pub async fn list_aliases(&self) -> StoreResult<Vec<DependencyAliasRow>> {
        let rows = sqlx::query("SELECT * FROM dependency_aliases ORDER BY alias")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .iter()
            .map(|r| DependencyAliasRow {
                id: r.get("id"),
                alias: r.get("alias"),
                canonical_name: r.get("canonical_name"),
            })
            .collect())
    }

    // ========================================================================
    // Dependencies
    // ========================================================================

    pub async fn find_dependency(
        &self,
        service_id: &str,
        name: &str,
    ) -> StoreResult<Option<DependencyRow>> {
        let mut conn = self.pool.acquire().await?;
        Self::find_dependency_tx(&mut conn, service_id, name).await
    }

    pub async fn find_dependency_tx(
        conn: &mut SqliteConnection,
        service_id: &str,
        name: &str,
    ) -> StoreResult<Option<DependencyRow>> {
        let row = sqlx::query("SELECT * FROM dependencies WHERE service_id = ? AND name = ?")
            .bind(service_id)
            .bind(name)
            .fetch_optional(conn)
            .await?;
        Ok(row.map(|r| Self::dependency_from_row(&r)))
    }

    pub async fn dependencies_for_service(
        &self,
        service_id: &str,
    ) -> StoreResult<Vec<DependencyRow>> {
        let rows = sqlx::query("SELECT * FROM dependencies WHERE service_id = ? ORDER BY name")
            .bind(service_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(Self::dependency_from_row).collect())
    }

    /// Insert a freshly-observed dependency. `last_status_change` starts at
    /// `now` (first observation).
    pub async fn insert_dependency_tx(
        conn: &mut SqliteConnection,
        write: &DependencyWrite,
        now: DateTime<Utc>,
    ) -> StoreResult<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO dependencies (
                service_id, name, canonical_name, description, impact, kind,
                healthy, health_state, health_code, latency_ms,
                check_details, error, error_message,
                last_checked, last_status_change, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&write.service_id)
        .bind(&write.name)
        .bind(&write.canonical_name)
        .bind(&write.description)
        .bind(&write.impact)
        .bind(write.kind.to_string())
        .bind(write.healthy)
        .bind(write.health_state)
        .bind(write.health_code)
        .bind(write.latency_ms)
        .bind(&write.check_details)
        .bind(&write.error)
        .bind(&write.error_message)
        .bind(Self::fmt_time(&write.last_checked))
        .bind(Self::fmt_time(&now))
        .bind(Self::fmt_time(&now))
        .bind(Self::fmt_time(&now))
        .execute(conn)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Update the polled fields of an existing dependency.
    ///
    /// The column list is explicit and closed: `contact_override` and
    /// `impact_override` do not appear here, or anywhere else the polling
    /// path can reach.
    pub async fn update_dependency_tx(
        conn: &mut SqliteConnection,
        id: i64,
        write: &DependencyWrite,
        last_status_change: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> StoreResult<()> {
        sqlx::query(
            r#"
            UPDATE dependencies SET
                canonical_name = ?,
                description = ?,
                impact = ?,
                kind = ?,
                healthy = ?,
                health_state = ?,
                health_code = ?,
                latency_ms = ?,
                check_details = ?,
                error = ?,
                error_message = ?,
                last_checked = ?,
                last_status_change = ?,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&write.canonical_name)
        .bind(&write.description)
        .bind(&write.impact)
        .bind(write.kind.to_string())
        .bind(write.healthy)
        .bind(write.health_state)
        .bind(write.health_code)
        .bind(write.latency_ms)
        .bind(&write.check_details)
        .bind(&write.error)
        .bind(&write.error_message)
        .bind(Self::fmt_time(&write.last_checked))
        .bind(last_status_change.as_ref().map(Self::fmt_time))
        .bind(Self::fmt_time(&now))
        .bind(id)
        .execute(conn)
        .await?;
        Ok(())
    }

    /// The user-edit path for override columns: a separate statement with
    /// its own explicit column list.
    pub async fn set_dependency_overrides(
        &self,
        id: i64,
        contact_override: Option<&str>,
        impact_override: Option<&str>,
    ) -> StoreResult<()> {
        sqlx::query(
            r#"
            UPDATE dependencies
            SET contact_override = ?, impact_override = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(contact_override)
        .bind(impact_override)
        .bind(Self::fmt_time(&Utc::now()))
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    fn dependency_from_row(row: &SqliteRow) -> DependencyRow {
        let kind: String = row.get("kind");
        DependencyRow {
            id: row.get("id"),
            service_id: row.get("service_id"),
            name: row.get("name"),
            canonical_name: row.get("canonical_name"),
            description: row.get("description"),
            impact: row.get("impact"),
            kind: DependencyKind::parse(&kind),
            healthy: row.get("healthy"),
            health_state: row.get("health_state"),
            health_code: row.get("health_code"),
            latency_ms: row.get("latency_ms"),
            check_details: row.get("check_details"),
            error: row.get("error"),
            error_message: row.get("error_message"),
            last_checked: Self::parse_opt_time(row.get("last_checked")),
            last_status_change: Self::parse_opt_time(row.get("last_status_change")),
            contact_override: row.get("contact_override"),
            impact_override: row.get("impact_override"),
            created_at: Self::parse_time(&row.get::<String, _>("created_at")),
            updated_at: Self::parse_time(&row.get::<String, _>("updated_at")),
        }
    }

    // ========================================================================
    // Latency history
    // ========================================================================

    /// Append one latency sample. Samples must be positive; zero and
    /// negative readings are a caller bug.
    pub async fn append_latency_tx(
        conn: &mut SqliteConnection,
        dependency_id: i64,
        latency_ms: i64,
        recorded_at: DateTime<Utc>,
    ) -> StoreResult<()> {
        if latency_ms <= 0 {
            return Err(StoreError::InvalidConfig(
                "latency samples must be positive".to_string(),
            ));
        }
        sqlx::query(
            "INSERT INTO dependency_latency_history (dependency_id, latency_ms, recorded_at) \
             VALUES (?, ?, ?)",
        )
        .bind(dependency_id)
        .bind(latency_ms)
        .bind(Self::fmt_time(&recorded_at))
        .execute(conn)
        .await?;
        Ok(())
    }

    pub async fn latency_samples(&self, dependency_id: i64) -> StoreResult<Vec<LatencySampleRow>> {
        let rows = sqlx::query(
            "SELECT * FROM dependency_latency_history WHERE dependency_id = ? ORDER BY id",
        )
        .bind(dependency_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|r| LatencySampleRow {
                id: r.get("id"),
                dependency_id: r.get("dependency_id"),
                latency_ms: r.get("latency_ms"),
                recorded_at: Self::parse_time(&r.get::<String, _>("recorded_at")),
            })
            .collect())
    }

    // ========================================================================
    // Dependency error history
    // ========================================================================

    pub async fn last_error_event_tx(
        conn: &mut SqliteConnection,
        dependency_id: i64,
    ) -> StoreResult<Option<ErrorHistoryRow>> {
        let row = sqlx::query(
            "SELECT * FROM dependency_error_history WHERE dependency_id = ? \
             ORDER BY id DESC LIMIT 1",
        )
        .bind(dependency_id)
        .fetch_optional(conn)
        .await?;
        Ok(row.map(|r| Self::error_event_from_row(&r)))
    }

    pub async fn append_error_event_tx(
        conn: &mut SqliteConnection,
        dependency_id: i64,
        error: Option<&str>,
        error_message: Option<&str>,
        recorded_at: DateTime<Utc>,
    ) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO dependency_error_history (dependency_id, error, error_message, recorded_at) \
             VALUES (?, ?, ?, ?)",
        )
        .bind(dependency_id)
        .bind(error)
        .bind(error_message)
        .bind(Self::fmt_time(&recorded_at))
        .execute(conn)
        .await?;
        Ok(())
    }

    pub async fn error_events(&self, dependency_id: i64) -> StoreResult<Vec<ErrorHistoryRow>> {
        let rows = sqlx::query(
            "SELECT * FROM dependency_error_history WHERE dependency_id = ? ORDER BY id",
        )
        .bind(dependency_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(|r| Self::error_event_from_row(r)).collect())
    }

    fn error_event_from_row(row: &SqliteRow) -> ErrorHistoryRow {
        ErrorHistoryRow {
            id: row.get("id"),
            dependency_id: row.get("dependency_id"),
            error: row.get("error"),
            error_message: row.get("error_message"),
            recorded_at: Self::parse_time(&row.get::<String, _>("recorded_at")),
        }
    }

    // ========================================================================
    // Service poll history
    // ========================================================================

    pub async fn last_poll_event_tx(
        conn: &mut SqliteConnection,
        service_id: &str,
    ) -> StoreResult<Option<ServicePollHistoryRow>> {
        let row = sqlx::query(
            "SELECT * FROM service_poll_history WHERE service_id = ? ORDER BY id DESC LIMIT 1",
        )
        .bind(service_id)
        .fetch_optional(conn)
        .await?;
        Ok(row.map(|r| Self::poll_event_from_row(&r)))
    }

    pub async fn append_poll_event_tx(
        conn: &mut SqliteConnection,
        service_id: &str,
        error: Option<&str>,
        recorded_at: DateTime<Utc>,
    ) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO service_poll_history (service_id, error, recorded_at) VALUES (?, ?, ?)",
        )
        .bind(service_id)
        .bind(error)
        .bind(Self::fmt_time(&recorded_at))
        .execute(conn)
        .await?;
        Ok(())
    }

    pub async fn poll_events(&self, service_id: &str) -> StoreResult<Vec<ServicePollHistoryRow>> {
        let rows =
            sqlx::query("SELECT * FROM service_poll_history WHERE service_id = ? ORDER BY id")
                .bind(service_id)
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.iter().map(|r| Self::poll_event_from_row(r)).collect())
    }

    fn poll_event_from_row(row: &SqliteRow) -> ServicePollHistoryRow {
        ServicePollHistoryRow {
            id: row.get("id"),
            service_id: row.get("service_id"),
            error: row.get("error"),
            recorded_at: Self::parse_time(&row.get::<String, _>("recorded_at")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::schema::SchemaConfig;
    use futures::FutureExt;

    async fn test_store() -> (tempfile::TempDir, SqliteStore) {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::new(temp_dir.path().join("test.db"))
            .await
            .unwrap();
        (temp_dir, store)
    }

    fn new_service(id: &str) -> NewService {
        NewService {
            id: id.to_string(),
            name: format!("svc-{id}"),
            team_id: "team-1".to_string(),
            health_endpoint: format!("https://{id}.example.com/health"),
            metrics_endpoint: None,
            poll_interval_ms: 30_000,
            is_active: true,
            is_external: false,
            schema_config: None,
        }
    }

    fn dependency_write(service_id: &str, name: &str, healthy: bool) -> DependencyWrite {
        DependencyWrite {
            service_id: service_id.to_string(),
            name: name.to_string(),
            canonical_name: None,
            description: None,
            impact: None,
            kind: DependencyKind::Database,
            healthy,
            health_state: if healthy { 0 } else { 2 },
            health_code: Some(200),
            latency_ms: Some(42),
            check_details: None,
            error: None,
            error_message: None,
            last_checked: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_store_creation() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::new(temp_dir.path().join("test.db")).await;
        assert!(store.is_ok());
    }

    #[tokio::test]
    async fn test_service_round_trip() {
        let (_dir, store) = test_store().await;

        let mut service = new_service("svc-1");
        service.schema_config = Some(SchemaConfig {
            root_path: Some("data.deps".to_string()),
        });

        let inserted = store.insert_service(&service).await.unwrap();
        assert_eq!(inserted.id, "svc-1");
        assert_eq!(inserted.poll_interval_ms, 30_000);
        assert_eq!(
            inserted.schema_config.unwrap().root_path.as_deref(),
            Some("data.deps")
        );

        let found = store.find_service("svc-1").await.unwrap().unwrap();
        assert_eq!(found.name, "svc-svc-1");
        assert!(found.is_pollable());
    }

    #[tokio::test]
    async fn test_insert_rejects_bad_interval() {
        let (_dir, store) = test_store().await;

        let mut service = new_service("svc-1");
        service.poll_interval_ms = 1_000;
        let err = store.insert_service(&service).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidConfig(_)));

        service.poll_interval_ms = 4_000_000;
        let err = store.insert_service(&service).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidConfig(_)));
    }

    #[tokio::test]
    async fn test_active_non_external_filter() {
        let (_dir, store) = test_store().await;

        store.insert_service(&new_service("active")).await.unwrap();

        let mut inactive = new_service("inactive");
        inactive.is_active = false;
        store.insert_service(&inactive).await.unwrap();

        let mut external = new_service("external");
        external.is_external = true;
        store.insert_service(&external).await.unwrap();

        let mut no_endpoint = new_service("no-endpoint");
        no_endpoint.health_endpoint = String::new();
        store.insert_service(&no_endpoint).await.unwrap();

        let pollable = store.find_active_non_external_services().await.unwrap();
        assert_eq!(pollable.len(), 1);
        assert_eq!(pollable[0].id, "active");
    }

    #[tokio::test]
    async fn test_update_poll_result() {
        let (_dir, store) = test_store().await;
        store.insert_service(&new_service("svc-1")).await.unwrap();

        store
            .update_poll_result("svc-1", false, Some("Connection refused"))
            .await
            .unwrap();

        let service = store.find_service("svc-1").await.unwrap().unwrap();
        assert_eq!(service.last_poll_success, Some(false));
        assert_eq!(service.last_poll_error.as_deref(), Some("Connection refused"));

        store.update_poll_result("svc-1", true, None).await.unwrap();
        let service = store.find_service("svc-1").await.unwrap().unwrap();
        assert_eq!(service.last_poll_success, Some(true));
        assert_eq!(service.last_poll_error, None);
    }

    #[tokio::test]
    async fn test_alias_upsert_and_resolve() {
        let (_dir, store) = test_store().await;

        store.upsert_alias("postgres-main", "postgres").await.unwrap();
        assert_eq!(
            store.resolve_alias("postgres-main").await.unwrap().as_deref(),
            Some("postgres")
        );

        store.upsert_alias("postgres-main", "postgresql").await.unwrap();
        assert_eq!(
            store.resolve_alias("postgres-main").await.unwrap().as_deref(),
            Some("postgresql")
        );

        assert_eq!(store.resolve_alias("unknown").await.unwrap(), None);

        let aliases = store.list_aliases().await.unwrap();
        assert_eq!(aliases.len(), 1);
        assert_eq!(aliases[0].alias, "postgres-main");
        assert_eq!(aliases[0].canonical_name, "postgresql");
    }

    #[tokio::test]
    async fn test_dependency_insert_update_preserves_overrides() {
        let (_dir, store) = test_store().await;
        store.insert_service(&new_service("svc-1")).await.unwrap();

        let now = Utc::now();
        let mut tx = store.begin().await.unwrap();
        let dep_id =
            SqliteStore::insert_dependency_tx(&mut tx, &dependency_write("svc-1", "db", true), now)
                .await
                .unwrap();
        tx.commit().await.unwrap();

        // User edits the overrides out of band.
        store
            .set_dependency_overrides(dep_id, Some("team-data@example.com"), Some("critical"))
            .await
            .unwrap();

        // A later poll updates the polled fields.
        let mut tx = store.begin().await.unwrap();
        SqliteStore::update_dependency_tx(
            &mut tx,
            dep_id,
            &dependency_write("svc-1", "db", false),
            Some(now),
            Utc::now(),
        )
        .await
        .unwrap();
        tx.commit().await.unwrap();

        let dep = store.find_dependency("svc-1", "db").await.unwrap().unwrap();
        assert_eq!(dep.healthy, Some(false));
        assert_eq!(dep.contact_override.as_deref(), Some("team-data@example.com"));
        assert_eq!(dep.impact_override.as_deref(), Some("critical"));
    }

    #[tokio::test]
    async fn test_cascade_delete() {
        let (_dir, store) = test_store().await;
        store.insert_service(&new_service("svc-1")).await.unwrap();

        let now = Utc::now();
        let mut tx = store.begin().await.unwrap();
        let dep_id =
            SqliteStore::insert_dependency_tx(&mut tx, &dependency_write("svc-1", "db", true), now)
                .await
                .unwrap();
        SqliteStore::append_latency_tx(&mut tx, dep_id, 42, now)
            .await
            .unwrap();
        SqliteStore::append_error_event_tx(&mut tx, dep_id, Some(r#"{"c":1}"#), Some("boom"), now)
            .await
            .unwrap();
        SqliteStore::append_poll_event_tx(&mut tx, "svc-1", Some("HTTP 500"), now)
            .await
            .unwrap();
        tx.commit().await.unwrap();

        store.delete_service("svc-1").await.unwrap();

        assert!(store.find_dependency("svc-1", "db").await.unwrap().is_none());
        assert!(store.latency_samples(dep_id).await.unwrap().is_empty());
        assert!(store.error_events(dep_id).await.unwrap().is_empty());
        assert!(store.poll_events("svc-1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_latency_guard_rejects_non_positive() {
        let (_dir, store) = test_store().await;
        store.insert_service(&new_service("svc-1")).await.unwrap();

        let mut tx = store.begin().await.unwrap();
        let dep_id = SqliteStore::insert_dependency_tx(
            &mut tx,
            &dependency_write("svc-1", "db", true),
            Utc::now(),
        )
        .await
        .unwrap();

        let err = SqliteStore::append_latency_tx(&mut tx, dep_id, 0, Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidConfig(_)));
    }

    #[tokio::test]
    async fn test_with_transaction_rolls_back_on_error() {
        let (_dir, store) = test_store().await;
        store.insert_service(&new_service("svc-1")).await.unwrap();

        let result: StoreResult<()> = store
            .with_transaction(|tx| {
                async move {
                    SqliteStore::insert_dependency_tx(
                        tx,
                        &dependency_write("svc-1", "db", true),
                        Utc::now(),
                    )
                    .await?;
                    Err(StoreError::QueryFailed("synthetic failure".to_string()))
                }
                .boxed()
            })
            .await;

        assert!(result.is_err());
        assert!(store.find_dependency("svc-1", "db").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_with_transaction_commits_on_ok() {
        let (_dir, store) = test_store().await;
        store.insert_service(&new_service("svc-1")).await.unwrap();

        let dep_id = store
            .with_transaction(|tx| {
                async move {
                    SqliteStore::insert_dependency_tx(
                        tx,
                        &dependency_write("svc-1", "db", true),
                        Utc::now(),
                    )
                    .await
                }
                .boxed()
            })
            .await
            .unwrap();

        assert!(dep_id > 0);
        assert!(store.find_dependency("svc-1", "db").await.unwrap().is_some());
    }
}
