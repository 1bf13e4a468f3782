//! Remote task service seam.
//!
//! The extraction worker is a black box reached through a small HTTP
//! contract. `TaskBackend` abstracts it so the tracker can be driven by
//! the real `HttpTaskClient` or by an in-process stub.

pub mod http;

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::RemoteError;
use crate::jobs::{RemoteStatus, SubmittedTask};

pub use http::HttpTaskClient;

/// Response of the batch-cancel endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelReport {
    pub cancelled_count: usize,
    pub failed_count: usize,
    /// Ids the worker actually revoked, when the service reports them.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancelled: Option<Vec<String>>,
}

impl CancelReport {
    /// Which of `requested` are confirmed cancelled.
    ///
    /// An explicit id list wins. Without one, a report with no failures
    /// confirms the whole request; a partial failure confirms nothing since
    /// the counts alone cannot say which ids went through.
    pub fn confirmed(&self, requested: &[String]) -> Vec<String> {
        match &self.cancelled {
            Some(ids) => requested
                .iter()
                .filter(|id| ids.contains(id))
                .cloned()
                .collect(),
            None if self.failed_count == 0 => requested.to_vec(),
            None => Vec::new(),
        }
    }
}

/// Operations the monitor consumes from the remote task service.
#[async_trait]
pub trait TaskBackend: Send + Sync {
    /// Submit one extraction per correlation id.
    async fn submit(&self, correlation_ids: &[String]) -> Result<Vec<SubmittedTask>, RemoteError>;

    /// Status of up to one chunk of tasks.
    async fn batch_status(
        &self,
        task_ids: &[String],
    ) -> Result<HashMap<String, RemoteStatus>, RemoteError>;

    /// Status of a single task.
    async fn task_status(&self, task_id: &str) -> Result<RemoteStatus, RemoteError>;

    /// Cancel a single task.
    async fn cancel(&self, task_id: &str) -> Result<(), RemoteError>;

    /// Cancel several tasks in one request.
    async fn cancel_batch(&self, task_ids: &[String]) -> Result<CancelReport, RemoteError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn explicit_list_confirms_intersection() {
        let report = CancelReport {
            cancelled_count: 2,
            failed_count: 1,
            cancelled: Some(ids(&["a", "c", "zzz"])),
        };
        assert_eq!(report.confirmed(&ids(&["a", "b", "c"])), ids(&["a", "c"]));
    }

    #[test]
    fn counts_only_without_failures_confirms_all() {
        let report = CancelReport {
            cancelled_count: 3,
            failed_count: 0,
            cancelled: None,
        };
        assert_eq!(report.confirmed(&ids(&["a", "b", "c"])), ids(&["a", "b", "c"]));
    }

    #[test]
    fn counts_only_with_failures_confirms_none() {
        let report = CancelReport {
            cancelled_count: 2,
            failed_count: 1,
            cancelled: None,
        };
        assert!(report.confirmed(&ids(&["a", "b", "c"])).is_empty());
    }

    #[test]
    fn decodes_counts_only_payload() {
        let report: CancelReport =
            serde_json::from_str(r#"{"cancelled_count": 4, "failed_count": 0}"#).unwrap();
        assert_eq!(report.cancelled_count, 4);
        assert!(report.cancelled.is_none());
    }
}
