//! Job tracker: ties the registry, fetcher, reconciler and poller together.
//!
//! One `JobTracker` is shared (it is cheap to clone) by whatever submits
//! jobs and whatever renders them. The poller runs exactly while the
//! registry is non-empty: every mutation that can change emptiness
//! re-synchronises it before the registry lock is released.

mod commands;

pub use commands::CommandOutcome;

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use tokio::sync::{RwLock, broadcast};
use tracing::{debug, error, info};

use crate::client::TaskBackend;
use crate::config::MonitorConfig;
use crate::error::Result;
use crate::jobs::{Job, JobCounts, JobRegistry, RegistryEvent, RemoteStatus, SubmittedTask};
use crate::notify::{Notification, NotificationSink};
use crate::poll::{
    BatchStatusFetcher, FetchOutcome, PollTask, Poller, PollerConfig, PollerState,
    Reconciliation, TransitionReconciler,
};

/// Default broadcast channel capacity for registry events.
const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Structured result of one poll cycle.
#[derive(Debug, Default)]
pub struct TickReport {
    pub fetch: FetchOutcome,
    pub reconciliation: Reconciliation,
}

/// Registry plus the reconciler's bookkeeping, guarded together.
struct TrackerState {
    registry: JobRegistry,
    reconciler: TransitionReconciler,
}

struct TrackerInner {
    config: MonitorConfig,
    backend: Arc<dyn TaskBackend>,
    sink: Arc<dyn NotificationSink>,
    fetcher: BatchStatusFetcher,
    state: RwLock<TrackerState>,
    poller: Poller,
    events: broadcast::Sender<RegistryEvent>,
    self_ref: Weak<TrackerInner>,
}

/// Client-side monitor for remote extraction jobs.
#[derive(Clone)]
pub struct JobTracker {
    inner: Arc<TrackerInner>,
}

impl JobTracker {
    pub fn new(
        config: MonitorConfig,
        backend: Arc<dyn TaskBackend>,
        sink: Arc<dyn NotificationSink>,
    ) -> Self {
        let (events, _rx) = broadcast::channel(DEFAULT_EVENT_CAPACITY);
        let inner = Arc::new_cyclic(|self_ref| TrackerInner {
            fetcher: BatchStatusFetcher::new(Arc::clone(&backend), config.chunk_size),
            poller: Poller::new(PollerConfig {
                name: "job-status",
                interval: config.poll_interval,
            }),
            state: RwLock::new(TrackerState {
                registry: JobRegistry::new(),
                reconciler: TransitionReconciler::new(Arc::clone(&sink)),
            }),
            config,
            backend,
            sink,
            events,
            self_ref: self_ref.clone(),
        });
        Self { inner }
    }

    /// Registry change feed, published after every mutation batch.
    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.inner.events.subscribe()
    }

    /// Start tracking a job the caller already submitted.
    pub async fn track(&self, id: impl Into<String>, correlation_id: Option<String>) -> bool {
        let task = SubmittedTask::new(id, correlation_id);
        !self.track_batch(std::slice::from_ref(&task)).await.is_empty()
    }

    /// Start tracking several jobs. Returns the ids that were not already tracked.
    pub async fn track_batch(&self, tasks: &[SubmittedTask]) -> Vec<String> {
        self.inner.add(tasks).await
    }

    /// Submit one extraction per correlation id and track the resulting jobs.
    pub async fn submit(&self, correlation_ids: &[String]) -> Result<Vec<SubmittedTask>> {
        match self.inner.backend.submit(correlation_ids).await {
            Ok(tasks) => {
                let added = self.track_batch(&tasks).await;
                info!(requested = correlation_ids.len(), tracked = added.len(), "Jobs submitted");
                Ok(tasks)
            }
            Err(e) => {
                error!(error = %e, "Job submission failed");
                self.inner
                    .sink
                    .notify(Notification::error(format!("Failed to start processing: {e}")));
                Err(e.into())
            }
        }
    }

    pub async fn get(&self, id: &str) -> Option<Job> {
        self.inner.state.read().await.registry.get(id).cloned()
    }

    /// All tracked jobs, oldest first.
    pub async fn jobs(&self) -> Vec<Job> {
        self.inner.state.read().await.registry.snapshot()
    }

    pub async fn counts(&self) -> JobCounts {
        self.inner.state.read().await.registry.counts()
    }

    pub async fn len(&self) -> usize {
        self.inner.state.read().await.registry.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.state.read().await.registry.is_empty()
    }

    pub fn poller_state(&self) -> PollerState {
        self.inner.poller.state()
    }

    pub fn is_polling(&self) -> bool {
        self.inner.poller.is_polling()
    }

    /// Run one poll cycle now. Returns `None` without fetching if a cycle is
    /// already outstanding.
    pub async fn poll_now(&self) -> Option<TickReport> {
        let _guard = self.inner.poller.try_acquire()?;
        Some(self.inner.cycle().await)
    }

    /// Fetch one job's status for a detail view. The registry is not touched.
    pub async fn job_detail(&self, id: &str) -> Result<RemoteStatus> {
        Ok(self.inner.backend.task_status(id).await?)
    }

    /// Drop every finished job.
    pub async fn clear_completed(&self) -> Vec<String> {
        self.inner
            .mutate_and_remove(|registry| registry.clear_completed())
            .await
    }

    /// Drop every job that finished with an error.
    pub async fn clear_failed(&self) -> Vec<String> {
        self.inner
            .mutate_and_remove(|registry| registry.clear_failed())
            .await
    }

    /// Stop polling. Tracked jobs stay in the registry.
    pub fn shutdown(&self) {
        self.inner.poller.stop();
    }
}

impl TrackerInner {
    async fn add(&self, tasks: &[SubmittedTask]) -> Vec<String> {
        let added = {
            let mut state = self.state.write().await;
            let added = state.registry.add_batch(tasks);
            self.sync_poller(&state.registry);
            added
        };
        if !added.is_empty() {
            debug!(count = added.len(), "Tracking new jobs");
            self.publish(RegistryEvent::Added { ids: added.clone() });
        }
        added
    }

    /// Remove `ids` outright.
    async fn remove_ids(&self, ids: &[String]) -> Vec<String> {
        self.mutate_and_remove(|registry| {
            ids.iter()
                .filter(|id| registry.remove(id).job.is_some())
                .cloned()
                .collect()
        })
        .await
    }

    /// Run a removing mutation under the lock, then resync and publish.
    async fn mutate_and_remove<F>(&self, mutate: F) -> Vec<String>
    where
        F: FnOnce(&mut JobRegistry) -> Vec<String>,
    {
        let removed = {
            let mut state = self.state.write().await;
            let removed = mutate(&mut state.registry);
            for id in &removed {
                state.reconciler.forget(id);
            }
            self.sync_poller(&state.registry);
            removed
        };
        if !removed.is_empty() {
            self.publish(RegistryEvent::Removed {
                ids: removed.clone(),
            });
        }
        removed
    }

    /// Replace `old_id` with a freshly submitted task in one mutation.
    async fn replace(&self, old_id: &str, task: &SubmittedTask) {
        {
            let mut state = self.state.write().await;
            state.registry.remove(old_id);
            state.reconciler.forget(old_id);
            state
                .registry
                .add(task.task_id.clone(), task.correlation_id.clone());
            self.sync_poller(&state.registry);
        }
        self.publish(RegistryEvent::Removed {
            ids: vec![old_id.to_string()],
        });
        self.publish(RegistryEvent::Added {
            ids: vec![task.task_id.clone()],
        });
    }

    /// Keep the poller running exactly while the registry is non-empty.
    fn sync_poller(&self, registry: &JobRegistry) {
        if registry.is_empty() {
            self.poller.stop();
        } else {
            let task: Weak<dyn PollTask> = self.self_ref.clone();
            self.poller.start(task);
        }
    }

    fn publish(&self, event: RegistryEvent) {
        // Ok if nobody is subscribed
        let _ = self.events.send(event);
    }

    /// Fetch statuses for every tracked job and reconcile them.
    async fn cycle(&self) -> TickReport {
        let ids = self.state.read().await.registry.ids();
        if ids.is_empty() {
            return TickReport::default();
        }

        let fetch = self.fetcher.fetch(&ids).await;

        let reconciliation = {
            let mut state = self.state.write().await;
            let TrackerState {
                registry,
                reconciler,
            } = &mut *state;
            reconciler.reconcile(registry, &fetch.statuses)
        };

        if !reconciliation.updated.is_empty() {
            self.publish(RegistryEvent::Updated {
                ids: reconciliation.updated.clone(),
            });
        }
        for (id, token) in &reconciliation.schedule_removal {
            self.schedule_removal(id.clone(), *token);
        }

        debug!(
            jobs = ids.len(),
            requests = fetch.requests,
            failed_chunks = fetch.failures.len(),
            updated = reconciliation.updated.len(),
            finished = reconciliation.became_ready.len(),
            "Poll cycle complete"
        );

        TickReport {
            fetch,
            reconciliation,
        }
    }

    fn schedule_removal(&self, id: String, token: u64) {
        let tracker = self.self_ref.clone();
        let grace = self.config.grace_period;
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            if let Some(tracker) = tracker.upgrade() {
                tracker.expire(&id, token).await;
            }
        });
    }

    /// Grace period for `id` ran out: drop it if this timer is still current
    /// and the job is still tracked and ready.
    async fn expire(&self, id: &str, token: u64) {
        let removed = {
            let mut state = self.state.write().await;
            if !state.reconciler.removal_fired(id, token) {
                debug!(job_id = %id, "Stale removal timer ignored");
                return;
            }
            let ready = state.registry.get(id).is_some_and(Job::ready);
            if ready {
                state.registry.remove(id);
                self.sync_poller(&state.registry);
            }
            ready
        };
        if removed {
            info!(job_id = %id, "Finished job removed after grace period");
            self.publish(RegistryEvent::Removed {
                ids: vec![id.to_string()],
            });
        }
    }
}

#[async_trait]
impl PollTask for TrackerInner {
    async fn tick(&self) {
        self.cycle().await;
    }
}
