//! Job registry: the in-memory set of tracked jobs.
//!
//! Pure data structure: no timers, no notifications, no I/O. The tracker
//! wraps it in a lock and drives the poller from the emptiness transitions
//! reported here.

use std::collections::HashMap;

use super::model::{Job, JobCounts, JobStatus, JobUpdate, SubmittedTask};

/// Readiness of a job immediately before and after an update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadyChange {
    pub was_ready: bool,
    pub is_ready: bool,
}

impl ReadyChange {
    /// The job crossed into a terminal state with this update.
    pub fn became_ready(&self) -> bool {
        !self.was_ready && self.is_ready
    }
}

/// Result of a single removal.
#[derive(Debug)]
pub struct Removal {
    /// The removed record, `None` if the id was not tracked.
    pub job: Option<Job>,
    /// The registry is empty afterwards, so polling should stop.
    pub now_empty: bool,
}

/// Keyed collection of tracked jobs.
#[derive(Debug, Default)]
pub struct JobRegistry {
    jobs: HashMap<String, Job>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a new pending job. Returns `false` if the id is already tracked,
    /// in which case the existing record is left untouched.
    pub fn add(&mut self, id: impl Into<String>, correlation_id: Option<String>) -> bool {
        let id = id.into();
        if self.jobs.contains_key(&id) {
            return false;
        }
        self.jobs.insert(id.clone(), Job::new(id, correlation_id));
        true
    }

    /// Track every task in `tasks`, returning the ids that were newly added.
    pub fn add_batch<'a, I>(&mut self, tasks: I) -> Vec<String>
    where
        I: IntoIterator<Item = &'a SubmittedTask>,
    {
        tasks
            .into_iter()
            .filter(|task| self.add(task.task_id.clone(), task.correlation_id.clone()))
            .map(|task| task.task_id.clone())
            .collect()
    }

    /// Merge `update` into the job with `id`. Unknown ids are ignored.
    pub fn update(&mut self, id: &str, update: &JobUpdate) -> Option<ReadyChange> {
        let job = self.jobs.get_mut(id)?;
        let was_ready = job.ready();
        job.apply(update);
        Some(ReadyChange {
            was_ready,
            is_ready: job.ready(),
        })
    }

    pub fn remove(&mut self, id: &str) -> Removal {
        let job = self.jobs.remove(id);
        Removal {
            job,
            now_empty: self.jobs.is_empty(),
        }
    }

    /// Remove every finished job.
    pub fn clear_completed(&mut self) -> Vec<String> {
        self.remove_where(|job| job.ready())
    }

    /// Remove every job that finished with an error.
    pub fn clear_failed(&mut self) -> Vec<String> {
        self.remove_where(Job::is_failed)
    }

    pub fn clear_all(&mut self) -> Vec<String> {
        let mut ids: Vec<String> = self.jobs.drain().map(|(id, _)| id).collect();
        ids.sort();
        ids
    }

    fn remove_where<F>(&mut self, pred: F) -> Vec<String>
    where
        F: Fn(&Job) -> bool,
    {
        let ids = self.select(pred);
        for id in &ids {
            self.jobs.remove(id);
        }
        ids
    }

    /// Ids of jobs matching `pred`, sorted.
    pub fn select<F>(&self, pred: F) -> Vec<String>
    where
        F: Fn(&Job) -> bool,
    {
        let mut ids: Vec<String> = self
            .jobs
            .values()
            .filter(|job| pred(job))
            .map(|job| job.id().to_string())
            .collect();
        ids.sort();
        ids
    }

    pub fn get(&self, id: &str) -> Option<&Job> {
        self.jobs.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.jobs.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// All tracked ids, sorted.
    pub fn ids(&self) -> Vec<String> {
        self.select(|_| true)
    }

    /// All jobs, oldest first.
    pub fn snapshot(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self.jobs.values().cloned().collect();
        jobs.sort_by(|a, b| {
            a.created_at()
                .cmp(&b.created_at())
                .then_with(|| a.id().cmp(b.id()))
        });
        jobs
    }

    pub fn counts(&self) -> JobCounts {
        let mut counts = JobCounts::default();
        for job in self.jobs.values() {
            match job.status() {
                JobStatus::Pending => counts.pending += 1,
                JobStatus::Started | JobStatus::Retry => counts.running += 1,
                JobStatus::Success => counts.succeeded += 1,
                JobStatus::Failure => counts.failed += 1,
            }
        }
        counts
    }
}
