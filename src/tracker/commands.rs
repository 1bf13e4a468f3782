//! Cancel and retry commands.
//!
//! Every command validates against the current registry, talks to the
//! remote service, and only mutates the registry once the service has
//! confirmed. Failures surface as an error notification plus an `Err`;
//! local state is left exactly as it was.

use tracing::{debug, error, info, warn};

use super::JobTracker;
use crate::client::CancelReport;
use crate::error::{CommandError, Error, Result};
use crate::jobs::{Job, SubmittedTask};
use crate::notify::Notification;

/// Result of a multi-job command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    /// No job matched; no request was sent.
    NothingToDo,
    /// Cancel request answered; `removed` ids are no longer tracked.
    Cancelled { removed: Vec<String>, failed: usize },
    /// Retries issued; each pair is `(old id, new id)`.
    Retried {
        replaced: Vec<(String, String)>,
        failed: Vec<String>,
    },
}

impl JobTracker {
    /// Cancel one job. Unknown ids are ignored.
    pub async fn cancel_one(&self, id: &str) -> Result<()> {
        let Some(job) = self.get(id).await else {
            debug!(job_id = %id, "Cancel for untracked job ignored");
            return Ok(());
        };

        match self.inner.backend.cancel(id).await {
            Ok(()) => {
                self.inner.remove_ids(&[id.to_string()]).await;
                info!(job_id = %id, "Job cancelled");
                self.inner
                    .sink
                    .notify(Notification::info("Job cancelled").for_job(id, job.correlation_id()));
                Ok(())
            }
            Err(e) => {
                error!(job_id = %id, error = %e, "Cancel failed");
                self.inner.sink.notify(
                    Notification::error(format!("Failed to cancel job: {e}"))
                        .for_job(id, job.correlation_id()),
                );
                Err(CommandError::CancelRejected {
                    id: id.to_string(),
                    reason: e.to_string(),
                }
                .into())
            }
        }
    }

    /// Cancel every job that has not started finishing yet (pending or started).
    pub async fn cancel_pending(&self) -> Result<CommandOutcome> {
        let ids = self
            .inner
            .state
            .read()
            .await
            .registry
            .select(|job| !job.ready() && job.status().is_cancellable());

        if ids.is_empty() {
            self.inner
                .sink
                .notify(Notification::info("No pending jobs to cancel"));
            return Ok(CommandOutcome::NothingToDo);
        }

        let report = self.batch_cancel(&ids).await?;
        let confirmed = report.confirmed(&ids);
        let removed = self.inner.remove_ids(&confirmed).await;
        if report.failed_count > 0 {
            warn!(
                requested = ids.len(),
                failed = report.failed_count,
                "Some pending jobs could not be cancelled"
            );
        }
        self.notify_cancelled(removed.len(), report.failed_count);

        Ok(CommandOutcome::Cancelled {
            removed,
            failed: report.failed_count,
        })
    }

    /// Cancel every tracked job, then forget all of them.
    pub async fn cancel_all(&self) -> Result<CommandOutcome> {
        let ids = self.inner.state.read().await.registry.ids();
        if ids.is_empty() {
            self.inner.sink.notify(Notification::info("No jobs to cancel"));
            return Ok(CommandOutcome::NothingToDo);
        }

        let report = self.batch_cancel(&ids).await?;
        let removed = self
            .inner
            .mutate_and_remove(|registry| registry.clear_all())
            .await;
        self.notify_cancelled(report.cancelled_count, report.failed_count);

        Ok(CommandOutcome::Cancelled {
            removed,
            failed: report.failed_count,
        })
    }

    /// Resubmit one failed job. Returns the new job id, or `None` if `id`
    /// is not tracked.
    pub async fn retry_one(&self, id: &str) -> Result<Option<String>> {
        let Some(job) = self.get(id).await else {
            debug!(job_id = %id, "Retry for untracked job ignored");
            return Ok(None);
        };
        if !job.is_failed() {
            return Err(CommandError::NotFailed { id: id.to_string() }.into());
        }

        let task = self.resubmit(&job).await?;
        self.inner.sink.notify(
            Notification::info("Retry submitted").for_job(&task.task_id, job.correlation_id()),
        );
        Ok(Some(task.task_id))
    }

    /// Resubmit every failed job, one request per job.
    pub async fn retry_all_failed(&self) -> Result<CommandOutcome> {
        let failed: Vec<Job> = self
            .inner
            .state
            .read()
            .await
            .registry
            .snapshot()
            .into_iter()
            .filter(Job::is_failed)
            .collect();

        if failed.is_empty() {
            self.inner
                .sink
                .notify(Notification::info("No failed jobs to retry"));
            return Ok(CommandOutcome::NothingToDo);
        }

        let mut replaced = Vec::new();
        let mut not_retried = Vec::new();
        for job in &failed {
            match self.resubmit(job).await {
                Ok(task) => replaced.push((job.id().to_string(), task.task_id)),
                Err(_) => not_retried.push(job.id().to_string()),
            }
        }

        // Each failed resubmit already sent its own error.
        if !replaced.is_empty() {
            let message = if not_retried.is_empty() {
                format!("Retried {} job(s)", replaced.len())
            } else {
                format!(
                    "Retried {} job(s), {} could not be retried",
                    replaced.len(),
                    not_retried.len()
                )
            };
            self.inner.sink.notify(Notification::info(message));
        }

        Ok(CommandOutcome::Retried {
            replaced,
            failed: not_retried,
        })
    }

    /// Submit a fresh job for `job`'s correlation id and swap it in.
    ///
    /// The old record is removed and the new one added in a single registry
    /// mutation, so a retried job is never tracked twice.
    async fn resubmit(&self, job: &Job) -> Result<SubmittedTask> {
        let result = match job.correlation_id() {
            None => Err(CommandError::RetryUnavailable {
                id: job.id().to_string(),
                reason: "job has no originating record".to_string(),
            }),
            Some(correlation) => match self.inner.backend.submit(&[correlation.to_string()]).await {
                Ok(tasks) => tasks.into_iter().next().ok_or_else(|| CommandError::RetryUnavailable {
                    id: job.id().to_string(),
                    reason: "submitter returned no task".to_string(),
                }),
                Err(e) => Err(CommandError::RetryUnavailable {
                    id: job.id().to_string(),
                    reason: e.to_string(),
                }),
            },
        };

        match result {
            Ok(mut task) => {
                if task.correlation_id.is_none() {
                    task.correlation_id = job.correlation_id().map(str::to_string);
                }
                self.inner.replace(job.id(), &task).await;
                info!(old_id = %job.id(), new_id = %task.task_id, "Job resubmitted");
                Ok(task)
            }
            Err(e) => {
                error!(job_id = %job.id(), error = %e, "Retry failed");
                self.inner.sink.notify(
                    Notification::error(format!("Failed to retry job: {e}"))
                        .for_job(job.id(), job.correlation_id()),
                );
                Err(e.into())
            }
        }
    }

    async fn batch_cancel(&self, ids: &[String]) -> Result<CancelReport> {
        self.inner.backend.cancel_batch(ids).await.map_err(|e| {
            error!(requested = ids.len(), error = %e, "Batch cancel failed");
            self.inner
                .sink
                .notify(Notification::error(format!("Failed to cancel jobs: {e}")));
            Error::from(CommandError::BatchCancelRejected {
                reason: e.to_string(),
            })
        })
    }

    fn notify_cancelled(&self, cancelled: usize, failed: usize) {
        let message = if failed > 0 {
            format!("Cancelled {cancelled} job(s), {failed} could not be cancelled")
        } else {
            format!("Cancelled {cancelled} job(s)")
        };
        info!(cancelled, failed, "Batch cancel complete");
        self.inner.sink.notify(Notification::info(message));
    }
}
