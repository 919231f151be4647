//! URL-keyed fetch coalescing
//!
//! Several registered services frequently share one health endpoint (a
//! gateway fronting many logical services). When their polls land in the
//! same cycle, only the first caller actually executes the fetch; everyone
//! else awaits a shared handle to the same eventual outcome. The entry is
//! cleared when the fetch settles, success or failure.

use std::collections::HashMap;
use std::sync::Mutex;

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};

/// Body and status of a completed health fetch, or the failure message.
///
/// `Clone` so one outcome can fan out to every coalesced caller.
pub type FetchOutcome = Result<FetchResponse, String>;

/// A completed HTTP exchange, body already read
#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub status: u16,
    pub reason: Option<&'static str>,
    pub body: String,
}

impl FetchResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

type SharedFetch = Shared<BoxFuture<'static, FetchOutcome>>;

/// In-flight fetch map keyed by normalized endpoint URL
#[derive(Default)]
pub struct PollDeduplicator {
    in_flight: Mutex<HashMap<String, SharedFetch>>,
}

impl PollDeduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `make()` for `url`, coalescing with any identical in-flight
    /// fetch.
    ///
    /// The closure is only invoked when no fetch for this URL is currently
    /// outstanding; concurrent callers share that first future's outcome.
    /// Whoever observes completion clears the entry, so a cancelled leader
    /// cannot strand it.
    pub async fn fetch<F>(&self, url: &str, make: F) -> FetchOutcome
    where
        F: FnOnce() -> BoxFuture<'static, FetchOutcome>,
    {
        let fut = {
            let mut in_flight = self.in_flight.lock().expect("dedup map poisoned");
            if let Some(existing) = in_flight.get(url) {
                existing.clone()
            } else {
                let fut = make().shared();
                in_flight.insert(url.to_string(), fut.clone());
                fut
            }
        };

        let outcome = fut.clone().await;

        let mut in_flight = self.in_flight.lock().expect("dedup map poisoned");
        if in_flight.get(url).is_some_and(|f| f.ptr_eq(&fut)) {
            in_flight.remove(url);
        }

        outcome
    }

    /// Drop all in-flight entries without cancelling the underlying fetches.
    pub fn clear(&self) {
        self.in_flight.lock().expect("dedup map poisoned").clear();
    }

    /// Number of URLs currently being fetched.
    pub fn len(&self) -> usize {
        self.in_flight.lock().expect("dedup map poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
