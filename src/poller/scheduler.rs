//! Health polling scheduler
//!
//! Drives health acquisition end to end. Every cycle (30 s by default) the
//! scheduler:
//!
//! 1. **Syncs with the registry**: tracks newly-active services, drops
//!    deactivated ones (deferring any whose poll is still in flight), and
//!    refreshes endpoint snapshots.
//! 2. **Claims** every tracked service whose single-flight lock is free.
//! 3. **Fans out** the polls concurrently and settles them all; one poll's
//!    failure never aborts the cycle.
//! 4. **Persists** each service-level outcome and feeds the poll-history
//!    recorder.
//! 5. **Emits** `PollComplete` / `StatusChange` / `PollError` events.
//! 6. **Releases** the locks.
//!
//! Control operations (`start_service`, `stop_service`, `restart_service`,
//! `poll_now`) are effective immediately, though a currently-running poll
//! always completes. Registry changes made behind the scheduler's back are
//! observed at most one cycle late through the sync step.
//!
//! The scheduler is an explicitly-constructed object owned by the
//! application's composition root; tests build their own with an injected
//! store and config.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use chrono::Utc;
use futures::future::join_all;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, error, info, instrument, trace, warn};

use crate::config::{PollerConfig, SHUTDOWN_POLL_INTERVAL};
use crate::poller::dedup::PollDeduplicator;
use crate::poller::events::{PollEvent, PollResult};
use crate::poller::history::ServicePollHistoryRecorder;
use crate::poller::host_limit::HostRateLimiter;
use crate::poller::service_poller::ServicePoller;
use crate::poller::state::{PollState, PollStateManager};
use crate::poller::upsert::DependencyUpsertEngine;
use crate::ssrf::SsrfPolicy;
use crate::store::error::{StoreError, StoreResult};
use crate::store::schema::ServiceRow;
use crate::store::sqlite::SqliteStore;

/// Event channel capacity; laggards lose events rather than slow the core.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// The singleton scheduler for continuous health polling
pub struct HealthPollingService {
    inner: Arc<Inner>,
}

struct Inner {
    config: PollerConfig,
    store: Arc<SqliteStore>,
    engine: Arc<DependencyUpsertEngine>,
    client: reqwest::Client,
    host_limiter: Arc<HostRateLimiter>,
    dedup: Arc<PollDeduplicator>,
    ssrf: SsrfPolicy,

    /// Authoritative per-service polling state. Never held across await.
    states: StdMutex<PollStateManager>,

    /// One poller per tracked service; the inner mutex serializes polls.
    pollers: StdMutex<HashMap<String, Arc<tokio::sync::Mutex<ServicePoller>>>>,

    /// Event fan-out; taken on shutdown so subscribers observe closure.
    events: StdMutex<Option<broadcast::Sender<PollEvent>>>,

    shutdown_tx: watch::Sender<bool>,
    is_shut_down: AtomicBool,
    cycle_task: StdMutex<Option<JoinHandle<()>>>,
}

impl HealthPollingService {
    pub fn new(store: Arc<SqliteStore>, config: PollerConfig) -> Self {
        Self::with_engine(store, config, Arc::new(DependencyUpsertEngine::new()))
    }

    /// Construct with an injected upsert engine (e.g. one carrying a
    /// suggestion sink).
    pub fn with_engine(
        store: Arc<SqliteStore>,
        config: PollerConfig,
        engine: Arc<DependencyUpsertEngine>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (shutdown_tx, _) = watch::channel(false);

        let ssrf = if config.allow_private_endpoints {
            SsrfPolicy::permissive()
        } else {
            SsrfPolicy::strict()
        };

        let client = reqwest::Client::builder()
            .timeout(config.fetch_timeout)
            .build()
            .expect("Failed to build HTTP client");

        let inner = Inner {
            host_limiter: Arc::new(HostRateLimiter::new(config.max_concurrent_per_host)),
            config,
            store,
            engine,
            client,
            dedup: Arc::new(PollDeduplicator::new()),
            ssrf,
            states: StdMutex::new(PollStateManager::new()),
            pollers: StdMutex::new(HashMap::new()),
            events: StdMutex::new(Some(events)),
            shutdown_tx,
            is_shut_down: AtomicBool::new(false),
            cycle_task: StdMutex::new(None),
        };

        Self {
            inner: Arc::new(inner),
        }
    }

    /// Start the cycle loop and track every active service.
    ///
    /// Idempotent: a second call while running is a no-op.
    #[instrument(skip(self))]
    pub async fn start_all(&self) -> StoreResult<()> {
        if self.inner.is_shut_down.load(Ordering::SeqCst) {
            warn!("start_all called after shutdown, ignoring");
            return Ok(());
        }

        {
            let mut task = self.inner.cycle_task.lock().expect("cycle task poisoned");
            if task.as_ref().is_some_and(|t| !t.is_finished()) {
                debug!("cycle loop already running");
                return Ok(());
            }

            let inner = self.inner.clone();
            let shutdown_rx = self.inner.shutdown_tx.subscribe();
            *task = Some(tokio::spawn(run_cycle_loop(inner, shutdown_rx)));
        }

        info!("health polling started");
        Ok(())
    }

    /// Track one service immediately, reading its row from the registry.
    #[instrument(skip(self))]
    pub async fn start_service(&self, service_id: &str) -> StoreResult<()> {
        if self.inner.is_shut_down.load(Ordering::SeqCst) {
            return Ok(());
        }

        let service = self
            .inner
            .store
            .find_service(service_id)
            .await?
            .ok_or_else(|| {
                StoreError::InvalidConfig(format!("unknown service: {service_id}"))
            })?;

        if !service.is_pollable() {
            debug!(service_id, "service not pollable, not tracking");
            return Ok(());
        }

        self.inner.track_service(&service);
        Ok(())
    }

    /// Stop tracking one service.
    ///
    /// A currently-running poll completes; its state is then cleaned up by
    /// the next registry sync. If the registry still lists the service as
    /// active, the next sync re-tracks it; callers deactivate first.
    #[instrument(skip(self))]
    pub async fn stop_service(&self, service_id: &str) -> StoreResult<()> {
        let (removed, name) = {
            let mut states = self.inner.states.lock().expect("state manager poisoned");
            let name = states
                .snapshot(service_id)
                .map(|s| s.service_name)
                .unwrap_or_default();
            (states.remove(service_id), name)
        };

        if removed {
            self.inner
                .pollers
                .lock()
                .expect("poller map poisoned")
                .remove(service_id);
            self.inner.emit(PollEvent::ServiceStopped {
                service_id: service_id.to_string(),
                service_name: name,
            });
            debug!(service_id, "service stopped");
        } else {
            trace!(service_id, "stop deferred or service not tracked");
        }
        Ok(())
    }

    /// `stop_service` followed by `start_service`; refreshes the snapshot.
    pub async fn restart_service(&self, service_id: &str) -> StoreResult<()> {
        self.stop_service(service_id).await?;
        self.start_service(service_id).await
    }

    /// On-demand probe, single-flight per service.
    ///
    /// Works for untracked services too: a temporary poller is built from
    /// the registry row and discarded afterwards.
    #[instrument(skip(self))]
    pub async fn poll_now(&self, service_id: &str) -> StoreResult<PollResult> {
        if self.inner.is_shut_down.load(Ordering::SeqCst) {
            return Ok(PollResult::failure("Scheduler is shut down", 0));
        }

        let service = self
            .inner
            .store
            .find_service(service_id)
            .await?
            .ok_or_else(|| {
                StoreError::InvalidConfig(format!("unknown service: {service_id}"))
            })?;

        let tracked = {
            let states = self.inner.states.lock().expect("state manager poisoned");
            states.contains(service_id)
        };

        if tracked {
            let claimed = {
                let mut states = self.inner.states.lock().expect("state manager poisoned");
                states.try_claim(service_id)
            };
            if !claimed {
                return Ok(PollResult::failure("Service is currently being polled", 0));
            }

            let poller = self.inner.poller_for(&service);
            let result = {
                let mut guard = poller.lock().await;
                guard.update_service(service.clone());
                guard.poll().await
            };

            self.inner.finalize_poll(&service, &result).await;
            {
                let mut states = self.inner.states.lock().expect("state manager poisoned");
                states.set_polling(service_id, false);
            }
            Ok(result)
        } else {
            let mut poller = self.inner.make_poller(&service);
            let result = poller.poll().await;
            self.inner.finalize_poll(&service, &result).await;
            Ok(result)
        }
    }

    /// Graceful shutdown: stop the cycle loop, drain in-flight polls for up
    /// to the configured ceiling, clear state, close the event channel.
    ///
    /// Idempotent.
    #[instrument(skip(self))]
    pub async fn shutdown(&self) {
        if self.inner.is_shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("shutting down health polling");

        let _ = self.inner.shutdown_tx.send(true);

        // Drain: in-flight polls settle on their own; we only wait.
        let drain_start = std::time::Instant::now();
        loop {
            let active = {
                let states = self.inner.states.lock().expect("state manager poisoned");
                states.active_polling_count()
            };
            if active == 0 {
                break;
            }
            if drain_start.elapsed() >= self.inner.config.shutdown_drain {
                warn!(active, "shutdown drain ceiling reached with polls in flight");
                break;
            }
            tokio::time::sleep(SHUTDOWN_POLL_INTERVAL).await;
        }

        let task = self
            .inner
            .cycle_task
            .lock()
            .expect("cycle task poisoned")
            .take();
        if let Some(task) = task {
            if tokio::time::timeout(self.inner.config.shutdown_drain, task)
                .await
                .is_err()
            {
                warn!("cycle loop did not stop in time");
            }
        }

        self.inner
            .states
            .lock()
            .expect("state manager poisoned")
            .clear();
        self.inner
            .pollers
            .lock()
            .expect("poller map poisoned")
            .clear();
        self.inner.dedup.clear();

        // Dropping the sender closes every subscriber's receiver.
        self.inner
            .events
            .lock()
            .expect("event channel poisoned")
            .take();

        info!("health polling stopped");
    }

    // ========================================================================
    // Observers
    // ========================================================================

    /// Ids of all currently-tracked services.
    pub fn active_pollers(&self) -> Vec<String> {
        self.inner
            .states
            .lock()
            .expect("state manager poisoned")
            .service_ids()
    }

    pub fn is_polling(&self, service_id: &str) -> bool {
        self.inner
            .states
            .lock()
            .expect("state manager poisoned")
            .snapshot(service_id)
            .map(|s| s.is_polling)
            .unwrap_or(false)
    }

    pub fn poll_state(&self, service_id: &str) -> Option<PollState> {
        self.inner
            .states
            .lock()
            .expect("state manager poisoned")
            .snapshot(service_id)
    }

    /// Subscribe to the event stream. After shutdown, the returned receiver
    /// is already closed.
    pub fn subscribe(&self) -> broadcast::Receiver<PollEvent> {
        let events = self.inner.events.lock().expect("event channel poisoned");
        match &*events {
            Some(tx) => tx.subscribe(),
            None => broadcast::channel(1).1,
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.is_shut_down.load(Ordering::SeqCst)
    }

    /// Run a single poll cycle immediately. Exposed for tests and manual
    /// retriggers; the cycle loop calls the same path.
    pub async fn run_poll_cycle(&self) {
        Inner::run_poll_cycle(&self.inner).await;
    }
}

async fn run_cycle_loop(inner: Arc<Inner>, mut shutdown_rx: watch::Receiver<bool>) {
    debug!("cycle loop starting");
    let mut ticker = interval(inner.config.poll_cycle);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                Inner::run_poll_cycle(&inner).await;
            }

            result = shutdown_rx.changed() => {
                match result {
                    Ok(()) if !*shutdown_rx.borrow() => continue,
                    _ => {
                        debug!("cycle loop received shutdown");
                        break;
                    }
                }
            }
        }
    }

    debug!("cycle loop stopped");
}

impl Inner {
    fn make_poller(&self, service: &ServiceRow) -> ServicePoller {
        ServicePoller::new(
            service.clone(),
            self.client.clone(),
            self.store.clone(),
            self.engine.clone(),
            self.host_limiter.clone(),
            self.dedup.clone(),
            self.ssrf,
        )
    }

    /// The tracked poller for a service, created on first use.
    fn poller_for(&self, service: &ServiceRow) -> Arc<tokio::sync::Mutex<ServicePoller>> {
        let mut pollers = self.pollers.lock().expect("poller map poisoned");
        pollers
            .entry(service.id.clone())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(self.make_poller(service))))
            .clone()
    }

    /// Add tracking state and a poller for a pollable service.
    fn track_service(&self, service: &ServiceRow) {
        let added = {
            let mut states = self.states.lock().expect("state manager poisoned");
            states.add(PollState::new(
                &service.id,
                &service.name,
                &service.health_endpoint,
            ))
        };

        if added {
            self.poller_for(service);
            self.emit(PollEvent::ServiceStarted {
                service_id: service.id.clone(),
                service_name: service.name.clone(),
            });
            debug!(service_id = %service.id, "service tracked");
        }
    }

    fn emit(&self, event: PollEvent) {
        let events = self.events.lock().expect("event channel poisoned");
        if let Some(tx) = &*events {
            // No subscribers is fine; events are best-effort.
            let _ = tx.send(event);
        }
    }

    /// One full poll cycle: sync, claim, fan out, persist, emit, release.
    #[instrument(skip(inner))]
    async fn run_poll_cycle(inner: &Arc<Inner>) {
        let active = match inner.store.find_active_non_external_services().await {
            Ok(active) => active,
            Err(e) => {
                error!("registry sync failed: {e}");
                return;
            }
        };

        inner.sync_services(&active);

        // Claim every tracked service whose lock is free.
        let claimed: Vec<ServiceRow> = {
            let mut states = inner.states.lock().expect("state manager poisoned");
            active
                .iter()
                .filter(|row| states.try_claim(&row.id))
                .cloned()
                .collect()
        };

        if claimed.is_empty() {
            trace!("no services due this cycle");
            return;
        }
        debug!(count = claimed.len(), "polling services");

        // Fan out concurrently and settle all: ServicePoller::poll never
        // returns Err, so one failure cannot abort the cycle.
        let polls = claimed.into_iter().map(|service| {
            let poller = inner.poller_for(&service);
            async move {
                let mut guard = poller.lock().await;
                guard.update_service(service.clone());
                let result = guard.poll().await;
                (service, result)
            }
        });

        let results = join_all(polls).await;

        for (service, result) in results {
            inner.finalize_poll(&service, &result).await;
            let mut states = inner.states.lock().expect("state manager poisoned");
            states.set_polling(&service.id, false);
        }
    }

    /// Registry sync: drop tracking for services no longer active (deferred
    /// while polling), pick up new ones, refresh endpoint snapshots.
    fn sync_services(&self, active: &[ServiceRow]) {
        let removed: Vec<(String, String)> = {
            let mut states = self.states.lock().expect("state manager poisoned");

            let mut removed = Vec::new();
            for id in states.service_ids() {
                if active.iter().any(|row| row.id == id) {
                    continue;
                }
                let name = states
                    .snapshot(&id)
                    .map(|s| s.service_name)
                    .unwrap_or_default();
                if states.remove(&id) {
                    removed.push((id, name));
                } else {
                    debug!(service_id = %id, "removal deferred, poll in flight");
                }
            }

            for row in active {
                if states.contains(&row.id) {
                    states.update_endpoint(&row.id, &row.health_endpoint);
                }
            }

            removed
        };

        for (id, name) in removed {
            self.pollers
                .lock()
                .expect("poller map poisoned")
                .remove(&id);
            self.emit(PollEvent::ServiceStopped {
                service_id: id,
                service_name: name,
            });
        }

        for row in active {
            self.track_service(row);
        }
    }

    /// Persist a poll's service-level outcome, feed the poll history, and
    /// emit events.
    async fn finalize_poll(&self, service: &ServiceRow, result: &PollResult) {
        let now = Utc::now();

        {
            let mut states = self.states.lock().expect("state manager poisoned");
            states.record_result(&service.id, result.success, now);
        }

        if let Err(e) = self
            .store
            .update_poll_result(&service.id, result.success, result.error.as_deref())
            .await
        {
            warn!(service_id = %service.id, "failed to persist poll result: {e}");
        }

        let history = async {
            let mut tx = self.store.begin().await?;
            ServicePollHistoryRecorder::record(
                &mut tx,
                &service.id,
                result.success,
                result.error.as_deref(),
                now,
            )
            .await?;
            tx.commit().await?;
            Ok::<_, StoreError>(())
        };
        if let Err(e) = history.await {
            // The service may have been deleted mid-poll; history for a
            // gone service is not worth failing over.
            debug!(service_id = %service.id, "poll history not recorded: {e}");
        }

        for change in &result.status_changes {
            self.emit(PollEvent::StatusChange(change.clone()));
        }

        self.emit(PollEvent::PollComplete {
            service_id: service.id.clone(),
            service_name: service.name.clone(),
            success: result.success,
            dependencies_updated: result.dependencies_updated,
            latency_ms: result.latency_ms,
            timestamp: now,
        });

        if !result.success {
            let consecutive_failures = {
                let states = self.states.lock().expect("state manager poisoned");
                states
                    .snapshot(&service.id)
                    .map(|s| s.consecutive_failures)
                    .unwrap_or(0)
            };
            self.emit(PollEvent::PollError {
                service_id: service.id.clone(),
                service_name: service.name.clone(),
                error: result.error.clone().unwrap_or_default(),
                consecutive_failures,
                timestamp: now,
            });
        }
    }
}
