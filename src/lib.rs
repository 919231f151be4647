pub mod config;
pub mod poller;
pub mod sanitize;
pub mod ssrf;
pub mod store;

pub use config::PollerConfig;
pub use poller::events::{PollEvent, PollResult, StatusChange};
pub use poller::scheduler::HealthPollingService;
pub use store::sqlite::SqliteStore;
