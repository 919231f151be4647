//! Row types for the observatory schema
//!
//! ## Design Philosophy
//!
//! Health aggregates that drive queries and transitions (`healthy`,
//! `health_state`, `latency_ms`) are typed columns; payload fragments whose
//! shape belongs to the reporting service (`check_details`, `error`,
//! `schema_config`) are carried as opaque JSON text and never inspected by
//! SQL. Time columns are RFC3339 strings throughout.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A registered service in the registry
#[derive(Debug, Clone)]
pub struct ServiceRow {
    pub id: String,
    pub name: String,
    pub team_id: String,
    pub health_endpoint: String,
    pub metrics_endpoint: Option<String>,
    pub poll_interval_ms: i64,
    pub is_active: bool,
    pub is_external: bool,
    pub schema_config: Option<SchemaConfig>,
    pub last_poll_success: Option<bool>,
    pub last_poll_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ServiceRow {
    /// Whether the scheduler should track this service.
    pub fn is_pollable(&self) -> bool {
        self.is_active && !self.is_external && !self.health_endpoint.is_empty()
    }
}

/// Fields supplied when registering a service
#[derive(Debug, Clone)]
pub struct NewService {
    pub id: String,
    pub name: String,
    pub team_id: String,
    pub health_endpoint: String,
    pub metrics_endpoint: Option<String>,
    pub poll_interval_ms: i64,
    pub is_active: bool,
    pub is_external: bool,
    pub schema_config: Option<SchemaConfig>,
}

/// Optional parser hint stored per service
///
/// `root_path` is a dot-separated path to the dependency array inside the
/// health payload, for services that wrap it deeper than the two accepted
/// default shapes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_path: Option<String>,
}

/// Category of a reported dependency
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyKind {
    Database,
    Api,
    Cache,
    Queue,
    Storage,
    #[default]
    Other,
}

impl DependencyKind {
    /// Parse a reported type string; anything unknown maps to `Other`.
    pub fn parse(raw: &str) -> Self {
        match raw.to_lowercase().as_str() {
            "database" | "db" => DependencyKind::Database,
            "api" | "http" | "service" => DependencyKind::Api,
            "cache" => DependencyKind::Cache,
            "queue" | "broker" => DependencyKind::Queue,
            "storage" | "blob" | "disk" => DependencyKind::Storage,
            _ => DependencyKind::Other,
        }
    }
}

impl std::fmt::Display for DependencyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DependencyKind::Database => write!(f, "database"),
            DependencyKind::Api => write!(f, "api"),
            DependencyKind::Cache => write!(f, "cache"),
            DependencyKind::Queue => write!(f, "queue"),
            DependencyKind::Storage => write!(f, "storage"),
            DependencyKind::Other => write!(f, "other"),
        }
    }
}

/// Coarse health classification carried alongside the boolean flag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    Ok,
    Warn,
    Critical,
}

impl HealthState {
    pub fn as_i64(self) -> i64 {
        match self {
            HealthState::Ok => 0,
            HealthState::Warn => 1,
            HealthState::Critical => 2,
        }
    }

    pub fn from_i64(value: i64) -> Self {
        match value {
            0 => HealthState::Ok,
            1 => HealthState::Warn,
            _ => HealthState::Critical,
        }
    }
}

/// One dependency row: a named capability a service reports on
#[derive(Debug, Clone)]
pub struct DependencyRow {
    pub id: i64,
    pub service_id: String,
    pub name: String,
    pub canonical_name: Option<String>,
    pub description: Option<String>,
    pub impact: Option<String>,
    pub kind: DependencyKind,
    pub healthy: Option<bool>,
    pub health_state: Option<i64>,
    pub health_code: Option<i64>,
    pub latency_ms: Option<i64>,
    /// Opaque JSON text from the reporting service
    pub check_details: Option<String>,
    /// Opaque JSON text from the reporting service
    pub error: Option<String>,
    pub error_message: Option<String>,
    pub last_checked: Option<DateTime<Utc>>,
    pub last_status_change: Option<DateTime<Utc>>,
    /// User-edited; the polling path never writes this
    pub contact_override: Option<String>,
    /// User-edited; the polling path never writes this
    pub impact_override: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The polled fields of a dependency, as written by the upsert engine
///
/// Deliberately excludes the `*_override` columns: this struct is the only
/// thing the engine can hand to the store, so the upsert path is statically
/// unable to touch user edits.
#[derive(Debug, Clone)]
pub struct DependencyWrite {
    pub service_id: String,
    pub name: String,
    pub canonical_name: Option<String>,
    pub description: Option<String>,
    pub impact: Option<String>,
    pub kind: DependencyKind,
    pub healthy: bool,
    pub health_state: i64,
    pub health_code: Option<i64>,
    pub latency_ms: Option<i64>,
    pub check_details: Option<String>,
    pub error: Option<String>,
    pub error_message: Option<String>,
    pub last_checked: DateTime<Utc>,
}

/// Alias mapping consulted on every upsert
#[derive(Debug, Clone)]
pub struct DependencyAliasRow {
    pub id: i64,
    pub alias: String,
    pub canonical_name: String,
}

/// Append-only latency sample
#[derive(Debug, Clone)]
pub struct LatencySampleRow {
    pub id: i64,
    pub dependency_id: i64,
    pub latency_ms: i64,
    pub recorded_at: DateTime<Utc>,
}

/// Append-only dependency error-history event
///
/// A row with both fields null marks a recovery.
#[derive(Debug, Clone)]
pub struct ErrorHistoryRow {
    pub id: i64,
    pub dependency_id: i64,
    pub error: Option<String>,
    pub error_message: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

impl ErrorHistoryRow {
    pub fn is_recovery(&self) -> bool {
        self.error.is_none() && self.error_message.is_none()
    }
}

/// Append-only service-level poll-history event
///
/// A row with a null error marks a recovery.
#[derive(Debug, Clone)]
pub struct ServicePollHistoryRow {
    pub id: i64,
    pub service_id: String,
    pub error: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

impl ServicePollHistoryRow {
    pub fn is_recovery(&self) -> bool {
        self.error.is_none()
    }
}
