//! Batch status fetcher: chunked status queries for the tracked id set.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, warn};

use crate::client::TaskBackend;
use crate::config::MAX_CHUNK_SIZE;
use crate::error::RemoteError;
use crate::jobs::RemoteStatus;

/// A chunk whose status request failed this tick.
#[derive(Debug)]
pub struct ChunkFailure {
    pub ids: Vec<String>,
    pub error: RemoteError,
}

/// Everything one fetch cycle learned.
#[derive(Debug, Default)]
pub struct FetchOutcome {
    /// Union of all successful chunk responses.
    pub statuses: HashMap<String, RemoteStatus>,
    /// Number of status requests issued.
    pub requests: usize,
    pub failures: Vec<ChunkFailure>,
}

impl FetchOutcome {
    /// Every chunk succeeded.
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    /// Ids left untouched because their chunk failed.
    pub fn failed_ids(&self) -> impl Iterator<Item = &str> {
        self.failures
            .iter()
            .flat_map(|f| f.ids.iter().map(String::as_str))
    }
}

/// Queries the remote status endpoint in bounded chunks.
pub struct BatchStatusFetcher {
    backend: Arc<dyn TaskBackend>,
    chunk_size: usize,
}

impl BatchStatusFetcher {
    pub fn new(backend: Arc<dyn TaskBackend>, chunk_size: usize) -> Self {
        Self {
            backend,
            chunk_size: chunk_size.clamp(1, MAX_CHUNK_SIZE),
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Fetch status for `ids`, one request per chunk, chunks in parallel.
    ///
    /// A failed chunk contributes nothing. Entries a chunk response carries
    /// for ids outside that chunk are dropped.
    pub async fn fetch(&self, ids: &[String]) -> FetchOutcome {
        let chunks: Vec<&[String]> = ids.chunks(self.chunk_size).collect();
        let requests = chunks.len();

        let results = join_all(chunks.iter().map(|chunk| {
            let backend = Arc::clone(&self.backend);
            async move { backend.batch_status(chunk).await }
        }))
        .await;

        let mut outcome = FetchOutcome {
            requests,
            ..Default::default()
        };

        for (index, (chunk, result)) in chunks.into_iter().zip(results).enumerate() {
            match result {
                Ok(statuses) => {
                    let wanted: HashSet<&str> = chunk.iter().map(String::as_str).collect();
                    let before = outcome.statuses.len();
                    outcome.statuses.extend(
                        statuses
                            .into_iter()
                            .filter(|(id, _)| wanted.contains(id.as_str())),
                    );
                    debug!(
                        chunk = index,
                        requested = chunk.len(),
                        received = outcome.statuses.len() - before,
                        "Status chunk fetched"
                    );
                }
                Err(error) => {
                    warn!(
                        chunk = index,
                        ids = chunk.len(),
                        error = %error,
                        "Status chunk failed, will retry next tick"
                    );
                    outcome.failures.push(ChunkFailure {
                        ids: chunk.to_vec(),
                        error,
                    });
                }
            }
        }

        outcome
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::client::CancelReport;
    use crate::jobs::{JobStatus, SubmittedTask};

    /// Answers every id as Started; fails chunks containing a poisoned id.
    #[derive(Default)]
    struct RecordingBackend {
        calls: Mutex<Vec<Vec<String>>>,
        poison: Option<String>,
        extra: Option<String>,
    }

    #[async_trait]
    impl TaskBackend for RecordingBackend {
        async fn submit(&self, _: &[String]) -> Result<Vec<SubmittedTask>, RemoteError> {
            unimplemented!("not used by the fetcher")
        }

        async fn batch_status(
            &self,
            task_ids: &[String],
        ) -> Result<HashMap<String, RemoteStatus>, RemoteError> {
            self.calls.lock().unwrap().push(task_ids.to_vec());
            if let Some(poison) = &self.poison {
                if task_ids.contains(poison) {
                    return Err(RemoteError::Transport {
                        endpoint: "status".into(),
                        reason: "connection reset".into(),
                    });
                }
            }
            let mut map: HashMap<String, RemoteStatus> = task_ids
                .iter()
                .map(|id| (id.clone(), RemoteStatus::new(JobStatus::Started)))
                .collect();
            if let Some(extra) = &self.extra {
                map.insert(extra.clone(), RemoteStatus::new(JobStatus::Success));
            }
            Ok(map)
        }

        async fn task_status(&self, _: &str) -> Result<RemoteStatus, RemoteError> {
            unimplemented!("not used by the fetcher")
        }

        async fn cancel(&self, _: &str) -> Result<(), RemoteError> {
            unimplemented!("not used by the fetcher")
        }

        async fn cancel_batch(&self, _: &[String]) -> Result<CancelReport, RemoteError> {
            unimplemented!("not used by the fetcher")
        }
    }

    fn ids(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("task-{i}")).collect()
    }

    #[tokio::test]
    async fn request_count_is_ceil_of_chunk_size() {
        for n in [0usize, 1, 49, 50, 51, 100, 101, 250] {
            let backend = Arc::new(RecordingBackend::default());
            let fetcher = BatchStatusFetcher::new(backend.clone(), 50);
            let outcome = fetcher.fetch(&ids(n)).await;

            let calls = backend.calls.lock().unwrap();
            assert_eq!(calls.len(), n.div_ceil(50), "n = {n}");
            assert_eq!(outcome.requests, calls.len());
            assert!(calls.iter().all(|c| c.len() <= 50));
            assert_eq!(outcome.statuses.len(), n);
            assert!(outcome.is_complete());
        }
    }

    #[tokio::test]
    async fn failed_chunk_is_isolated() {
        let backend = Arc::new(RecordingBackend {
            poison: Some("task-60".into()),
            ..Default::default()
        });
        let fetcher = BatchStatusFetcher::new(backend, 50);
        let outcome = fetcher.fetch(&ids(120)).await;

        assert_eq!(outcome.requests, 3);
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failed_ids().count(), 50);
        // Chunks 0 and 2 applied; nothing from chunk 1.
        assert_eq!(outcome.statuses.len(), 70);
        assert!(outcome.statuses.contains_key("task-0"));
        assert!(!outcome.statuses.contains_key("task-60"));
        assert!(outcome.statuses.contains_key("task-119"));
    }

    #[tokio::test]
    async fn unrequested_ids_are_dropped() {
        let backend = Arc::new(RecordingBackend {
            extra: Some("stranger".into()),
            ..Default::default()
        });
        let fetcher = BatchStatusFetcher::new(backend, 50);
        let outcome = fetcher.fetch(&ids(3)).await;
        assert_eq!(outcome.statuses.len(), 3);
        assert!(!outcome.statuses.contains_key("stranger"));
    }

    #[test]
    fn chunk_size_is_clamped() {
        let backend = Arc::new(RecordingBackend::default());
        assert_eq!(BatchStatusFetcher::new(backend.clone(), 0).chunk_size(), 1);
        assert_eq!(BatchStatusFetcher::new(backend, 1000).chunk_size(), 50);
    }
}
