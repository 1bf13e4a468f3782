//! Job record, remote status payloads and registry events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Remote execution state of an extraction job.
///
/// Wire values are the worker's upper-case task states. `REVOKED` (a task
/// killed on the worker) is folded into `Failure`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JobStatus {
    /// Queued, not yet picked up by a worker.
    Pending,
    /// A worker is processing the job.
    Started,
    /// Finished successfully.
    Success,
    /// Finished with an error.
    #[serde(alias = "REVOKED")]
    Failure,
    /// The worker scheduled another attempt.
    Retry,
}

impl JobStatus {
    /// Whether the job has finished from the tracker's point of view.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failure)
    }

    /// Pending or started: the statuses a "cancel pending" sweep targets.
    pub fn is_cancellable(&self) -> bool {
        matches!(self, Self::Pending | Self::Started)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Started => "started",
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Retry => "retry",
        };
        write!(f, "{s}")
    }
}

/// Per-task payload returned by the status endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteStatus {
    pub status: JobStatus,
    #[serde(default)]
    pub ready: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub successful: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_summary: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RemoteStatus {
    pub fn new(status: JobStatus) -> Self {
        Self {
            status,
            ready: status.is_terminal(),
            successful: status.is_terminal().then_some(status == JobStatus::Success),
            result_summary: None,
            error: None,
        }
    }

    pub fn with_summary(mut self, summary: serde_json::Value) -> Self {
        self.result_summary = Some(summary);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// A task accepted by the remote submitter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmittedTask {
    pub task_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

impl SubmittedTask {
    pub fn new(task_id: impl Into<String>, correlation_id: Option<String>) -> Self {
        Self {
            task_id: task_id.into(),
            correlation_id,
        }
    }
}

/// Partial update merged into a tracked job.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobUpdate {
    pub status: Option<JobStatus>,
    pub result_summary: Option<serde_json::Value>,
    pub error_message: Option<String>,
}

impl From<&RemoteStatus> for JobUpdate {
    fn from(remote: &RemoteStatus) -> Self {
        if remote.ready != remote.status.is_terminal() {
            tracing::debug!(
                status = %remote.status,
                ready = remote.ready,
                "Remote ready flag disagrees with status; deriving from status"
            );
        }
        Self {
            status: Some(remote.status),
            result_summary: remote.result_summary.clone(),
            error_message: remote.error.clone(),
        }
    }
}

/// A tracked extraction job.
///
/// `ready` and `successful` are derived from `status` on every write and
/// cannot be set independently.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Job {
    id: String,
    correlation_id: Option<String>,
    status: JobStatus,
    ready: bool,
    successful: Option<bool>,
    result_summary: Option<serde_json::Value>,
    error_message: Option<String>,
    created_at: DateTime<Utc>,
}

impl Job {
    /// Create a pending job.
    pub fn new(id: impl Into<String>, correlation_id: Option<String>) -> Self {
        Self {
            id: id.into(),
            correlation_id,
            status: JobStatus::Pending,
            ready: false,
            successful: None,
            result_summary: None,
            error_message: None,
            created_at: Utc::now(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn ready(&self) -> bool {
        self.ready
    }

    pub fn successful(&self) -> Option<bool> {
        self.successful
    }

    pub fn result_summary(&self) -> Option<&serde_json::Value> {
        self.result_summary.as_ref()
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Finished with an error.
    pub fn is_failed(&self) -> bool {
        self.ready && self.successful == Some(false)
    }

    /// Merge a partial update, re-deriving the dependent fields.
    pub(crate) fn apply(&mut self, update: &JobUpdate) {
        if let Some(status) = update.status {
            self.status = status;
        }
        if let Some(summary) = &update.result_summary {
            self.result_summary = Some(summary.clone());
        }
        if let Some(error) = &update.error_message {
            self.error_message = Some(error.clone());
        }

        self.ready = self.status.is_terminal();
        self.successful = self.ready.then_some(self.status == JobStatus::Success);
        if self.successful != Some(false) {
            self.error_message = None;
        }
    }
}

/// Tallies for a status badge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct JobCounts {
    pub pending: usize,
    pub running: usize,
    pub succeeded: usize,
    pub failed: usize,
}

impl JobCounts {
    pub fn total(&self) -> usize {
        self.pending + self.running + self.succeeded + self.failed
    }
}

/// Published to subscribers after each registry mutation batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RegistryEvent {
    Added { ids: Vec<String> },
    Updated { ids: Vec<String> },
    Removed { ids: Vec<String> },
}
