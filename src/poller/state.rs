//! In-memory polling state
//!
//! The authoritative record of which services the scheduler is tracking and
//! whether a poll is currently in flight for each. The `is_polling` flag is
//! the single-flight lock: both the cycle loop and `poll_now` must flip it
//! before touching a service, and removal is refused while it is set; the
//! remover retries on a later cycle (deferred removal).

use std::collections::HashMap;

use chrono::{DateTime, Utc};

/// Per-service polling state snapshot
#[derive(Debug, Clone)]
pub struct PollState {
    pub service_id: String,
    pub service_name: String,
    pub health_endpoint: String,
    pub last_polled: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    pub is_polling: bool,
}

impl PollState {
    pub fn new(service_id: &str, service_name: &str, health_endpoint: &str) -> Self {
        Self {
            service_id: service_id.to_string(),
            service_name: service_name.to_string(),
            health_endpoint: health_endpoint.to_string(),
            last_polled: None,
            consecutive_failures: 0,
            is_polling: false,
        }
    }
}

/// Authoritative map of tracked services
///
/// Single-owner: the scheduler mutates this behind its own lock and never
/// holds that lock across an await point. Observers get cloned snapshots.
#[derive(Debug, Default)]
pub struct PollStateManager {
    states: HashMap<String, PollState>,
}

impl PollStateManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a service. Returns `false` if it was already tracked.
    pub fn add(&mut self, state: PollState) -> bool {
        if self.states.contains_key(&state.service_id) {
            return false;
        }
        self.states.insert(state.service_id.clone(), state);
        true
    }

    /// Remove a tracked service.
    ///
    /// Refused (returns `false`) while a poll is in flight; the caller is
    /// expected to retry after the poll releases the lock.
    pub fn remove(&mut self, service_id: &str) -> bool {
        match self.states.get(service_id) {
            Some(state) if state.is_polling => false,
            Some(_) => {
                self.states.remove(service_id);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, service_id: &str) -> bool {
        self.states.contains_key(service_id)
    }

    /// Cloned snapshot of one state.
    pub fn snapshot(&self, service_id: &str) -> Option<PollState> {
        self.states.get(service_id).cloned()
    }

    /// Cloned snapshot of every state.
    pub fn snapshot_all(&self) -> Vec<PollState> {
        self.states.values().cloned().collect()
    }

    pub fn service_ids(&self) -> Vec<String> {
        self.states.keys().cloned().collect()
    }

    /// Flip the single-flight lock. Returns `false` for unknown services.
    pub fn set_polling(&mut self, service_id: &str, polling: bool) -> bool {
        match self.states.get_mut(service_id) {
            Some(state) => {
                state.is_polling = polling;
                true
            }
            None => false,
        }
    }

    /// Atomically claim the lock: `true` only if the service is tracked and
    /// was not already polling.
    pub fn try_claim(&mut self, service_id: &str) -> bool {
        match self.states.get_mut(service_id) {
            Some(state) if !state.is_polling => {
                state.is_polling = true;
                true
            }
            _ => false,
        }
    }

    /// Refresh the endpoint snapshot after a registry change.
    pub fn update_endpoint(&mut self, service_id: &str, health_endpoint: &str) -> bool {
        match self.states.get_mut(service_id) {
            Some(state) => {
                state.health_endpoint = health_endpoint.to_string();
                true
            }
            None => false,
        }
    }

    /// Record a completed poll attempt.
    pub fn record_result(&mut self, service_id: &str, success: bool, at: DateTime<Utc>) {
        if let Some(state) = self.states.get_mut(service_id) {
            state.last_polled = Some(at);
            if success {
                state.consecutive_failures = 0;
            } else {
                state.consecutive_failures = state.consecutive_failures.saturating_add(1);
            }
        }
    }

    /// Number of services with a poll currently in flight.
    pub fn active_polling_count(&self) -> usize {
        self.states.values().filter(|s| s.is_polling).count()
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn clear(&mut self) {
        self.states.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(id: &str) -> PollState {
        PollState::new(id, &format!("svc-{id}"), "https://example.com/health")
    }

    #[test]
    fn test_add_and_contains() {
        let mut manager = PollStateManager::new();
        assert!(manager.add(state("a")));
        assert!(manager.contains("a"));
        assert_eq!(manager.len(), 1);

        // Second add of the same id is refused.
        assert!(!manager.add(state("a")));
        assert_eq!(manager.len(), 1);
    }

    #[test]
    fn test_remove_refused_while_polling() {
        let mut manager = PollStateManager::new();
        manager.add(state("a"));
        manager.set_polling("a", true);

        assert!(!manager.remove("a"));
        assert!(manager.contains("a"));

        manager.set_polling("a", false);
        assert!(manager.remove("a"));
        assert!(!manager.contains("a"));
    }

    #[test]
    fn test_remove_unknown_returns_false() {
        let mut manager = PollStateManager::new();
        assert!(!manager.remove("ghost"));
    }

    #[test]
    fn test_try_claim_is_single_flight() {
        let mut manager = PollStateManager::new();
        manager.add(state("a"));

        assert!(manager.try_claim("a"));
        assert!(!manager.try_claim("a"));

        manager.set_polling("a", false);
        assert!(manager.try_claim("a"));
    }

    #[test]
    fn test_record_result_updates_counters() {
        let mut manager = PollStateManager::new();
        manager.add(state("a"));
        let now = Utc::now();

        manager.record_result("a", false, now);
        manager.record_result("a", false, now);
        assert_eq!(manager.snapshot("a").unwrap().consecutive_failures, 2);

        manager.record_result("a", true, now);
        let snap = manager.snapshot("a").unwrap();
        assert_eq!(snap.consecutive_failures, 0);
        assert_eq!(snap.last_polled, Some(now));
    }

    #[test]
    fn test_update_endpoint() {
        let mut manager = PollStateManager::new();
        manager.add(state("a"));

        assert!(manager.update_endpoint("a", "https://b/health"));
        assert_eq!(
            manager.snapshot("a").unwrap().health_endpoint,
            "https://b/health"
        );
        assert!(!manager.update_endpoint("ghost", "https://b/health"));
    }

    #[test]
    fn test_active_polling_count() {
        let mut manager = PollStateManager::new();
        manager.add(state("a"));
        manager.add(state("b"));
        manager.add(state("c"));

        manager.set_polling("a", true);
        manager.set_polling("c", true);
        assert_eq!(manager.active_polling_count(), 2);
    }

    #[test]
    fn test_clear() {
        let mut manager = PollStateManager::new();
        manager.add(state("a"));
        manager.add(state("b"));
        manager.clear();
        assert!(manager.is_empty());
    }
}
