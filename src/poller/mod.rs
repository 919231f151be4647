//! The polling core
//!
//! This module drives health acquisition end to end. A single scheduler
//! owns the cycle loop; each service gets its own poller, serialized by an
//! in-memory single-flight lock.
//!
//! ## Architecture Overview
//!
//! ```text
//!                ┌──────────────────────┐
//!                │ HealthPollingService │  cycle loop (30 s)
//!                └──────────┬───────────┘
//!                           │ sync + claim + fan out
//!          ┌────────────────┼────────────────┐
//!          │                │                │
//!   ┌──────▼──────┐  ┌──────▼──────┐  ┌──────▼──────┐
//!   │ ServicePoller│  │ ServicePoller│  │ ServicePoller│
//!   └──────┬──────┘  └──────┬──────┘  └──────┬──────┘
//!          │   SSRF gate → breaker → host limiter → dedup → GET
//!          │
//!   ┌──────▼───────────┐   ┌───────────────────┐
//!   │ DependencyParser │ → │ UpsertEngine + tx │ → history recorders
//!   └──────────────────┘   └───────────────────┘
//!                           │
//!                  broadcast events (status:change, poll:complete, …)
//! ```
//!
//! ## Shared state
//!
//! Polls share nothing mutable except the `PollStateManager`, the store's
//! transactions, and the host/URL limiters; all admission decisions are
//! atomic check-and-increment.

pub mod backoff;
pub mod breaker;
pub mod dedup;
pub mod events;
pub mod history;
pub mod host_limit;
pub mod parser;
pub mod scheduler;
pub mod service_poller;
pub mod state;
pub mod upsert;

pub use backoff::Backoff;
pub use breaker::{BreakerState, CircuitBreaker};
pub use dedup::PollDeduplicator;
pub use events::{PollEvent, PollResult, StatusChange};
pub use host_limit::HostRateLimiter;
pub use parser::{ParseError, ParsedDependency, parse_dependencies};
pub use scheduler::HealthPollingService;
pub use service_poller::ServicePoller;
pub use state::{PollState, PollStateManager};
pub use upsert::{DependencyUpsertEngine, SuggestionSink};
