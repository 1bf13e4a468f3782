//! Extraction monitor: client-side tracking of remote geocoding jobs.

pub mod client;
pub mod config;
pub mod error;
pub mod jobs;
pub mod notify;
pub mod poll;
pub mod tracker;

pub use tracker::{CommandOutcome, JobTracker, TickReport};
