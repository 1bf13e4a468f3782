//! Transition reconciler: applies fetched statuses and reacts to jobs
//! finishing.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info};

use crate::jobs::{Job, JobRegistry, JobUpdate, RemoteStatus};
use crate::notify::{Notification, NotificationSink};

/// What one reconciliation pass changed.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Reconciliation {
    /// Ids whose record was updated.
    pub updated: Vec<String>,
    /// Ids that crossed into a terminal state in this pass.
    pub became_ready: Vec<String>,
    /// Ready ids that now need a deferred removal timer, with the token the
    /// timer must present when it fires.
    pub schedule_removal: Vec<(String, u64)>,
}

/// Applies status results to the registry and emits completion side effects.
///
/// Lives next to the registry under the same lock, so the ready check, the
/// update, and the edge decision happen atomically per pass.
pub struct TransitionReconciler {
    sink: Arc<dyn NotificationSink>,
    /// Jobs with a removal timer already running, keyed to that timer's token.
    removal_pending: HashMap<String, u64>,
    next_token: u64,
}

impl TransitionReconciler {
    pub fn new(sink: Arc<dyn NotificationSink>) -> Self {
        Self {
            sink,
            removal_pending: HashMap::new(),
            next_token: 0,
        }
    }

    /// Merge `statuses` into `registry`.
    ///
    /// Unknown ids are skipped. Each false→true ready edge notifies exactly
    /// once; each ready job is handed out for removal at most once.
    pub fn reconcile(
        &mut self,
        registry: &mut JobRegistry,
        statuses: &HashMap<String, RemoteStatus>,
    ) -> Reconciliation {
        let mut result = Reconciliation::default();

        for (id, remote) in statuses {
            let Some(change) = registry.update(id, &JobUpdate::from(remote)) else {
                debug!(job_id = %id, "Status for untracked job ignored");
                continue;
            };
            result.updated.push(id.clone());

            if change.became_ready() {
                if let Some(job) = registry.get(id) {
                    info!(job_id = %id, status = %job.status(), "Job finished");
                    self.sink.notify(completion_notification(job));
                }
                result.became_ready.push(id.clone());
            }

            if change.is_ready && !self.removal_pending.contains_key(id) {
                let token = self.next_token;
                self.next_token += 1;
                self.removal_pending.insert(id.clone(), token);
                result.schedule_removal.push((id.clone(), token));
            }
        }

        result
    }

    /// A removal timer for `id` fired. Returns `true` if it is still the
    /// current timer for that id; a stale timer changes nothing.
    pub fn removal_fired(&mut self, id: &str, token: u64) -> bool {
        if self.removal_pending.get(id) == Some(&token) {
            self.removal_pending.remove(id);
            true
        } else {
            false
        }
    }

    /// `id` left the registry some other way; any running timer for it is
    /// now stale.
    pub fn forget(&mut self, id: &str) {
        self.removal_pending.remove(id);
    }

    pub fn is_removal_pending(&self, id: &str) -> bool {
        self.removal_pending.contains_key(id)
    }
}

/// Notification for a job that just finished.
pub fn completion_notification(job: &Job) -> Notification {
    let notification = if job.successful() == Some(true) {
        Notification::success(success_message(job.result_summary()))
    } else {
        Notification::error(job.error_message().unwrap_or("Unknown error"))
    };
    notification.for_job(job.id(), job.correlation_id())
}

fn success_message(summary: Option<&serde_json::Value>) -> String {
    match summary.and_then(|s| s.get("count")).and_then(|c| c.as_u64()) {
        Some(0) => "No sites found".to_string(),
        Some(n) => format!("{n} site(s) found"),
        None => "Extraction complete".to_string(),
    }
}
