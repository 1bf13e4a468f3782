//! Tracked jobs.
//!
//! - `model`: job record, status enum, remote payloads, registry events
//! - `registry`: keyed in-memory collection with the pure mutation API

pub mod model;
pub mod registry;

pub use model::{Job, JobCounts, JobStatus, JobUpdate, RegistryEvent, RemoteStatus, SubmittedTask};
pub use registry::{JobRegistry, ReadyChange, Removal};
