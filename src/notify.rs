//! User-facing notifications.
//!
//! The monitor never renders anything itself. It hands `Notification`s to a
//! `NotificationSink`; the consuming layer decides how to show them.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{error, info};

/// Default broadcast channel capacity.
const DEFAULT_BROADCAST_CAPACITY: usize = 256;

/// Severity of a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationLevel {
    Info,
    Success,
    Error,
}

/// A message for the user about a job or a command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub level: NotificationLevel,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    pub message: String,
}

impl Notification {
    pub fn info(message: impl Into<String>) -> Self {
        Self::new(NotificationLevel::Info, message)
    }

    pub fn success(message: impl Into<String>) -> Self {
        Self::new(NotificationLevel::Success, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(NotificationLevel::Error, message)
    }

    fn new(level: NotificationLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            job_id: None,
            correlation_id: None,
            message: message.into(),
        }
    }

    pub fn for_job(mut self, job_id: impl Into<String>, correlation_id: Option<&str>) -> Self {
        self.job_id = Some(job_id.into());
        self.correlation_id = correlation_id.map(str::to_string);
        self
    }
}

/// Destination for notifications. Implementations must not block.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, notification: Notification);
}

/// Writes notifications to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl NotificationSink for TracingSink {
    fn notify(&self, n: Notification) {
        let job_id = n.job_id.as_deref().unwrap_or("-");
        let correlation_id = n.correlation_id.as_deref().unwrap_or("-");
        match n.level {
            NotificationLevel::Error => {
                error!(job_id, correlation_id, "{}", n.message)
            }
            NotificationLevel::Info | NotificationLevel::Success => {
                info!(job_id, correlation_id, level = ?n.level, "{}", n.message)
            }
        }
    }
}

/// Fans notifications out to any number of subscribers.
pub struct BroadcastSink {
    tx: broadcast::Sender<Notification>,
}

impl BroadcastSink {
    pub fn new() -> Arc<Self> {
        let (tx, _rx) = broadcast::channel(DEFAULT_BROADCAST_CAPACITY);
        Arc::new(Self { tx })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.tx.subscribe()
    }
}

impl NotificationSink for BroadcastSink {
    fn notify(&self, notification: Notification) {
        // Ok if nobody is listening yet
        let _ = self.tx.send(notification);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn broadcast_sink_fans_out() {
        let sink = BroadcastSink::new();
        let mut a = sink.subscribe();
        let mut b = sink.subscribe();

        sink.notify(Notification::success("3 site(s) found").for_job("t1", Some("paper-1")));

        for rx in [&mut a, &mut b] {
            let n = rx.recv().await.unwrap();
            assert_eq!(n.level, NotificationLevel::Success);
            assert_eq!(n.job_id.as_deref(), Some("t1"));
            assert_eq!(n.correlation_id.as_deref(), Some("paper-1"));
            assert_eq!(n.message, "3 site(s) found");
        }
    }

    #[test]
    fn broadcast_sink_without_subscribers_is_fine() {
        let sink = BroadcastSink::new();
        sink.notify(Notification::info("nobody listening"));
    }

    #[test]
    fn notification_serializes_without_empty_fields() {
        let json = serde_json::to_value(Notification::error("Unknown error")).unwrap();
        assert_eq!(json, serde_json::json!({"level": "error", "message": "Unknown error"}));
    }
}
