use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::models::job::{Job, JobId, JobStatus};

/// In-memory job records, the single source of truth for job state.
///
/// Only the queue mutates records; status readers take clones. Every
/// operation holds the lock for one map access, so a merge is atomic with
/// respect to concurrent submits and worker completions.
#[derive(Default)]
pub struct JobStore {
    jobs: RwLock<HashMap<JobId, Job>>,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a freshly created job.
    pub fn create(&self, job: Job) {
        self.jobs.write().insert(job.id, job);
    }

    /// Snapshot of a job record.
    pub fn get(&self, id: JobId) -> Option<Job> {
        self.jobs.read().get(&id).cloned()
    }

    /// Apply `f` to the record under the write lock.
    ///
    /// Returns `None` when the id is unknown. That is an accepted no-op: a
    /// worker finishing after external cleanup removed its record must not
    /// fail because of it.
    pub fn update<F, R>(&self, id: JobId, f: F) -> Option<R>
    where
        F: FnOnce(&mut Job) -> R,
    {
        let mut jobs = self.jobs.write();
        match jobs.get_mut(&id) {
            Some(job) => Some(f(job)),
            None => {
                tracing::debug!(job_id = %id, "Ignoring update for unknown job");
                None
            }
        }
    }

    pub fn len(&self) -> usize {
        self.jobs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.read().is_empty()
    }

    pub fn count_by_status(&self, status: JobStatus) -> usize {
        self.jobs
            .read()
            .values()
            .filter(|job| job.status == status)
            .count()
    }

    /// Remove terminal jobs that finished before `cutoff`, returning them.
    ///
    /// Meant for an external retention task; the queue never calls it.
    pub fn remove_finished_before(&self, cutoff: DateTime<Utc>) -> Vec<Job> {
        let mut jobs = self.jobs.write();
        let stale: Vec<JobId> = jobs
            .values()
            .filter(|job| job.status.is_terminal())
            .filter(|job| job.finished_at.is_some_and(|at| at < cutoff))
            .map(|job| job.id)
            .collect();

        stale.into_iter().filter_map(|id| jobs.remove(&id)).collect()
    }
}
