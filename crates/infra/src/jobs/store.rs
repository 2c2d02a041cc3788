//! Job storage implementations.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};

use super::types::{Job, JobId, JobStatus};

/// Job store abstraction.
pub trait JobStore: Send + Sync {
    /// Enqueue a new job.
    fn enqueue(&self, job: Job) -> Result<JobId, JobStoreError>;

    /// Get a job by ID.
    fn get(&self, job_id: JobId) -> Result<Option<Job>, JobStoreError>;

    /// Update a job.
    fn update(&self, job: &Job) -> Result<(), JobStoreError>;

    /// Claim the next ready job, marking it running. Oldest `run_at` first.
    fn claim_next(&self, now: DateTime<Utc>) -> Result<Option<Job>, JobStoreError>;

    /// List jobs, optionally filtered to one status.
    fn list(&self, status: Option<&JobStatus>, limit: usize) -> Result<Vec<Job>, JobStoreError>;
}

/// Job store error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum JobStoreError {
    #[error("job not found: {0}")]
    NotFound(JobId),
    #[error("job already exists: {0}")]
    AlreadyExists(JobId),
    #[error("storage error: {0}")]
    Storage(String),
}

/// In-memory job store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<JobId, Job>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

impl JobStore for InMemoryJobStore {
    fn enqueue(&self, job: Job) -> Result<JobId, JobStoreError> {
        let mut jobs = self
            .jobs
            .write()
            .map_err(|_| JobStoreError::Storage("lock poisoned".to_string()))?;
        if jobs.contains_key(&job.id) {
            return Err(JobStoreError::AlreadyExists(job.id));
        }
        let id = job.id;
        jobs.insert(id, job);
        Ok(id)
    }

    fn get(&self, job_id: JobId) -> Result<Option<Job>, JobStoreError> {
        let jobs = self
            .jobs
            .read()
            .map_err(|_| JobStoreError::Storage("lock poisoned".to_string()))?;
        Ok(jobs.get(&job_id).cloned())
    }

    fn update(&self, job: &Job) -> Result<(), JobStoreError> {
        let mut jobs = self
            .jobs
            .write()
            .map_err(|_| JobStoreError::Storage("lock poisoned".to_string()))?;
        if !jobs.contains_key(&job.id) {
            return Err(JobStoreError::NotFound(job.id));
        }
        jobs.insert(job.id, job.clone());
        Ok(())
    }

    fn claim_next(&self, now: DateTime<Utc>) -> Result<Option<Job>, JobStoreError> {
        let mut jobs = self
            .jobs
            .write()
            .map_err(|_| JobStoreError::Storage("lock poisoned".to_string()))?;

        let next_id = jobs
            .values()
            .filter(|j| j.is_ready(now))
            .min_by_key(|j| j.run_at)
            .map(|j| j.id);

        let Some(id) = next_id else {
            return Ok(None);
        };

        let job = jobs.get_mut(&id).expect("claimed job exists");
        job.status = JobStatus::Running;
        job.attempts += 1;
        Ok(Some(job.clone()))
    }

    fn list(&self, status: Option<&JobStatus>, limit: usize) -> Result<Vec<Job>, JobStoreError> {
        let jobs = self
            .jobs
            .read()
            .map_err(|_| JobStoreError::Storage("lock poisoned".to_string()))?;

        let mut matching: Vec<Job> = jobs
            .values()
            .filter(|j| match status {
                Some(s) => std::mem::discriminant(&j.status) == std::mem::discriminant(s),
                None => true,
            })
            .cloned()
            .collect();
        matching.sort_by_key(|j| j.run_at);
        matching.truncate(limit);
        Ok(matching)
    }
}
