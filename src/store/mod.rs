//! Persistent store for registry and polling state
//!
//! ## Design
//!
//! - **Typed accessors**: one method per query; no generic "update all
//!   provided fields" shortcut exists, so write paths are closed over
//!   explicit column lists
//! - **Async**: all operations are async for compatibility with Tokio
//! - **Transactional**: the polling path's multi-row writes compose over a
//!   live connection inside one transaction

pub mod error;
pub mod schema;
pub mod sqlite;

pub use error::{StoreError, StoreResult};
pub use schema::{
    DependencyAliasRow, DependencyKind, DependencyRow, DependencyWrite, ErrorHistoryRow,
    HealthState, LatencySampleRow, NewService, SchemaConfig, ServicePollHistoryRow, ServiceRow,
};
pub use sqlite::SqliteStore;
