//! Long-interval monitor for a single bulk operation (e.g. re-geocoding a
//! whole collection), separate from per-job polling.

use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::client::TaskBackend;
use crate::config::MonitorConfig;
use crate::error::{MonitorError, Result};
use crate::jobs::{Job, JobUpdate, RemoteStatus};
use crate::notify::{Notification, NotificationSink};
use crate::poll::reconciler::completion_notification;
use crate::poll::scheduler::clamp_interval;

/// Poll `task_id` every `bulk_poll_interval` until it is ready or
/// `bulk_timeout` elapses.
///
/// Polls run strictly one after another, so a slow status request delays
/// the next one instead of overlapping it. Transient failures are logged
/// and retried on the next tick.
pub async fn monitor_bulk_operation(
    backend: &dyn TaskBackend,
    task_id: &str,
    config: &MonitorConfig,
    sink: &dyn NotificationSink,
) -> Result<RemoteStatus> {
    info!(
        task_id,
        interval_s = config.bulk_poll_interval.as_secs(),
        timeout_s = config.bulk_timeout.as_secs(),
        "Monitoring bulk operation"
    );

    let period = clamp_interval("bulk", config.bulk_poll_interval);
    let watch = async {
        let mut tick = tokio::time::interval(period);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tick.tick().await;
            match backend.task_status(task_id).await {
                Ok(status) if status.status.is_terminal() => return status,
                Ok(status) => debug!(task_id, status = %status.status, "Bulk operation still running"),
                Err(e) => warn!(task_id, error = %e, "Bulk status poll failed, retrying"),
            }
        }
    };

    match tokio::time::timeout(config.bulk_timeout, watch).await {
        Ok(status) => {
            let mut job = Job::new(task_id, None);
            job.apply(&JobUpdate::from(&status));
            info!(task_id, status = %status.status, "Bulk operation finished");
            sink.notify(completion_notification(&job));
            Ok(status)
        }
        Err(_) => {
            warn!(task_id, "Bulk operation monitor timed out");
            sink.notify(
                Notification::error("Operation is taking too long; stopped monitoring")
                    .for_job(task_id, None),
            );
            Err(MonitorError::TimedOut {
                id: task_id.to_string(),
                after: config.bulk_timeout,
            }
            .into())
        }
    }
}
