//! In-memory job table.
//!
//! Records live for the lifetime of the process. The registry does no
//! locking of its own; it is owned by the scheduler and only touched with
//! the scheduler lock held.

use indexmap::IndexMap;
use lumina_core::error::CoreError;
use lumina_core::job::{Job, JobSummary, NewJob};
use lumina_core::types::JobId;

/// Every job submitted since startup, keyed by id in insertion order.
#[derive(Debug, Default)]
pub struct JobRegistry {
    jobs: IndexMap<JobId, Job>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A fresh id not used by any existing record.
    pub fn allocate_id(&self) -> JobId {
        loop {
            let id = uuid::Uuid::new_v4();
            if !self.jobs.contains_key(&id) {
                return id;
            }
        }
    }

    /// Store a new `queued` record under `id`.
    pub fn create(&mut self, id: JobId, input: NewJob) -> Result<Job, CoreError> {
        if self.jobs.contains_key(&id) {
            return Err(CoreError::Conflict(format!("job {id} already exists")));
        }
        let job = Job::new(id, input);
        self.jobs.insert(id, job.clone());
        Ok(job)
    }

    pub fn get(&self, id: JobId) -> Option<&Job> {
        self.jobs.get(&id)
    }

    pub fn get_mut(&mut self, id: JobId) -> Option<&mut Job> {
        self.jobs.get_mut(&id)
    }

    /// Apply `f` to the record for `id`.
    pub fn mutate<T>(
        &mut self,
        id: JobId,
        f: impl FnOnce(&mut Job) -> Result<T, CoreError>,
    ) -> Result<T, CoreError> {
        let job = self
            .jobs
            .get_mut(&id)
            .ok_or_else(|| CoreError::job_not_found(id))?;
        f(job)
    }

    /// Summaries, newest first. Jobs created in the same instant are listed
    /// in reverse submission order.
    pub fn list(&self) -> Vec<JobSummary> {
        let mut summaries: Vec<JobSummary> = self.jobs.values().rev().map(Job::summary).collect();
        summaries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        summaries
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
