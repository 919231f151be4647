//! Health-payload parsing
//!
//! Converts the arbitrary JSON a health endpoint returns into canonical
//! dependency records. Two shapes are accepted:
//!
//! 1. An array of dependency objects at the root (or at the service's
//!    configured `root_path`)
//! 2. An object carrying a `dependencies` array
//!
//! Each item must carry a string `name` and boolean `healthy`; everything
//! else is optional. The health triple arrives either nested
//! (`health.{state,code,latency}`) or flat (`healthCode` / `latencyMs`,
//! with the state derived from the boolean). `checkDetails` and `error`
//! pass through as opaque JSON so consumers are not coupled to reporter
//! internals.
//!
//! Parse errors carry the offending index but never payload text: the raw
//! body stays on this side of the trust boundary.

use std::fmt;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::store::schema::{DependencyKind, HealthState, SchemaConfig};

/// A dependency record normalized from the wire payload
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedDependency {
    pub name: String,
    pub healthy: bool,
    pub description: Option<String>,
    pub impact: Option<String>,
    pub kind: DependencyKind,
    pub health_state: i64,
    pub health_code: Option<i64>,
    pub latency_ms: Option<i64>,
    /// Opaque reporter payload
    pub check_details: Option<Value>,
    /// Opaque reporter payload
    pub error: Option<Value>,
    pub error_message: Option<String>,
    pub last_checked: DateTime<Utc>,
}

/// Payload rejected by the parser
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// The resolved root is not an array of dependency objects
    ExpectedArray,

    /// The configured `root_path` does not exist in the payload
    RootPathNotFound(String),

    /// A dependency item lacks a required field
    MissingField { index: usize, field: &'static str },
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::ExpectedArray => {
                write!(f, "expected a dependency array in the health payload")
            }
            ParseError::RootPathNotFound(path) => {
                write!(f, "configured root path '{}' not found in payload", path)
            }
            ParseError::MissingField { index, field } => {
                write!(
                    f,
                    "dependency at index {} is missing required field '{}'",
                    index, field
                )
            }
        }
    }
}

impl std::error::Error for ParseError {}

/// How the health triple arrived on the wire
#[derive(Debug, Clone, Copy)]
enum HealthTriple {
    Nested {
        state: Option<i64>,
        code: Option<i64>,
        latency: Option<i64>,
    },
    Flat {
        code: Option<i64>,
        latency: Option<i64>,
    },
}

impl HealthTriple {
    fn of(item: &Value) -> Self {
        match item.get("health") {
            Some(health) if health.is_object() => HealthTriple::Nested {
                state: health.get("state").and_then(Value::as_i64),
                code: health.get("code").and_then(Value::as_i64),
                latency: health.get("latency").and_then(Value::as_i64),
            },
            _ => HealthTriple::Flat {
                code: item.get("healthCode").and_then(Value::as_i64),
                latency: item.get("latencyMs").and_then(Value::as_i64),
            },
        }
    }

    /// Normalize to `(state, code, latency)`, deriving the state from the
    /// boolean when the wire did not carry one.
    fn normalize(self, healthy: bool) -> (i64, Option<i64>, Option<i64>) {
        let derived = if healthy {
            HealthState::Ok
        } else {
            HealthState::Critical
        };
        match self {
            HealthTriple::Nested {
                state,
                code,
                latency,
            } => (state.unwrap_or(derived.as_i64()), code, latency),
            HealthTriple::Flat { code, latency } => (derived.as_i64(), code, latency),
        }
    }
}

/// Parse a health payload into dependency records.
///
/// `now` is the fallback for items without a usable `lastChecked`.
pub fn parse_dependencies(
    body: &Value,
    schema: Option<&SchemaConfig>,
    now: DateTime<Utc>,
) -> Result<Vec<ParsedDependency>, ParseError> {
    let items = resolve_root(body, schema)?;

    items
        .iter()
        .enumerate()
        .map(|(index, item)| parse_item(item, index, now))
        .collect()
}

fn resolve_root<'a>(
    body: &'a Value,
    schema: Option<&SchemaConfig>,
) -> Result<&'a Vec<Value>, ParseError> {
    if let Some(path) = schema.and_then(|s| s.root_path.as_deref()) {
        let mut cursor = body;
        for segment in path.split('.') {
            cursor = cursor
                .get(segment)
                .ok_or_else(|| ParseError::RootPathNotFound(path.to_string()))?;
        }
        return cursor.as_array().ok_or(ParseError::ExpectedArray);
    }

    if let Some(items) = body.as_array() {
        return Ok(items);
    }

    body.get("dependencies")
        .and_then(Value::as_array)
        .ok_or(ParseError::ExpectedArray)
}

fn parse_item(
    item: &Value,
    index: usize,
    now: DateTime<Utc>,
) -> Result<ParsedDependency, ParseError> {
    let name = item
        .get("name")
        .and_then(Value::as_str)
        .ok_or(ParseError::MissingField {
            index,
            field: "name",
        })?;

    let healthy = item
        .get("healthy")
        .and_then(Value::as_bool)
        .ok_or(ParseError::MissingField {
            index,
            field: "healthy",
        })?;

    let (health_state, health_code, latency_ms) = HealthTriple::of(item).normalize(healthy);

    let last_checked = item
        .get("lastChecked")
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(now);

    Ok(ParsedDependency {
        name: name.to_string(),
        healthy,
        description: string_field(item, "description"),
        impact: string_field(item, "impact"),
        kind: item
            .get("type")
            .and_then(Value::as_str)
            .map(DependencyKind::parse)
            .unwrap_or_default(),
        health_state,
        health_code,
        latency_ms,
        check_details: item.get("checkDetails").cloned(),
        error: item.get("error").filter(|v| !v.is_null()).cloned(),
        error_message: string_field(item, "errorMessage"),
        last_checked,
    })
}

fn string_field(item: &Value, field: &str) -> Option<String> {
    item.get(field).and_then(Value::as_str).map(str::to_string)
}
