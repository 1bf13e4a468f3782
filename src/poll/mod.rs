//! Polling machinery.
//!
//! - `fetcher`: chunked batch-status queries
//! - `reconciler`: applies statuses, detects jobs finishing
//! - `scheduler`: restartable interval timer with an in-flight guard
//! - `bulk`: long-interval monitor for a single bulk operation

pub mod bulk;
pub mod fetcher;
pub mod reconciler;
pub mod scheduler;

pub use bulk::monitor_bulk_operation;
pub use fetcher::{BatchStatusFetcher, ChunkFailure, FetchOutcome};
pub use reconciler::{Reconciliation, TransitionReconciler};
pub use scheduler::{InFlightGuard, PollTask, Poller, PollerConfig, PollerState};
