//! Job execution: claim ready jobs, run handlers, apply retry policy.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use super::store::JobStore;
use super::types::{Job, JobStatus, RetryPolicy};

/// A handler for one job kind. Returns a human-readable error on failure.
pub type JobHandler = Box<dyn Fn(&Job) -> Result<(), String> + Send + Sync>;

/// Runs due jobs against registered handlers.
///
/// Failures re-queue the job with backoff until the retry policy is
/// exhausted, at which point the job dead-letters and stops. The executor is
/// driven by an external tick (a scheduler loop or a test), not a thread of
/// its own.
pub struct JobExecutor<S> {
    store: Arc<S>,
    handlers: HashMap<String, JobHandler>,
    policy: RetryPolicy,
}

impl<S> JobExecutor<S>
where
    S: JobStore,
{
    pub fn new(store: Arc<S>, policy: RetryPolicy) -> Self {
        Self {
            store,
            handlers: HashMap::new(),
            policy,
        }
    }

    pub fn register(
        &mut self,
        kind_name: impl Into<String>,
        handler: impl Fn(&Job) -> Result<(), String> + Send + Sync + 'static,
    ) {
        self.handlers.insert(kind_name.into(), Box::new(handler));
    }

    /// Claim and run every ready job. Returns how many jobs ran.
    pub fn run_due(&self, now: DateTime<Utc>) -> usize {
        let mut ran = 0usize;

        while let Ok(Some(job)) = self.store.claim_next(now) {
            ran += 1;
            self.run_one(job, now);
        }

        ran
    }

    fn run_one(&self, mut job: Job, now: DateTime<Utc>) {
        let Some(handler) = self.handlers.get(job.kind.type_name()) else {
            tracing::warn!(kind = job.kind.type_name(), job = %job.id, "no handler registered");
            job.status = JobStatus::DeadLettered {
                error: "no handler registered".to_string(),
                attempts: job.attempts,
            };
            let _ = self.store.update(&job);
            return;
        };

        match handler(&job) {
            Ok(()) => {
                job.status = JobStatus::Completed;
                let _ = self.store.update(&job);
            }
            Err(error) => {
                if self.policy.allows_attempt(job.attempts + 1) {
                    let delay = self.policy.delay_for_attempt(job.attempts);
                    job.run_at = now
                        + Duration::milliseconds(delay.as_millis().min(i64::MAX as u128) as i64);
                    job.status = JobStatus::Failed {
                        error: error.clone(),
                        attempt: job.attempts,
                    };
                    tracing::warn!(job = %job.id, %error, attempt = job.attempts, "job failed, will retry");
                } else {
                    job.status = JobStatus::DeadLettered {
                        error: error.clone(),
                        attempts: job.attempts,
                    };
                    tracing::error!(job = %job.id, %error, "job dead-lettered");
                }
                let _ = self.store.update(&job);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::store::InMemoryJobStore;
    use crate::jobs::types::{Job, JobKind};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn store_with(job: Job) -> Arc<InMemoryJobStore> {
        let store = InMemoryJobStore::arc();
        store.enqueue(job).unwrap();
        store
    }

    #[test]
    fn successful_jobs_complete() {
        let now = Utc::now();
        let store = store_with(Job::new(JobKind::PayoutRun, now));
        let mut executor = JobExecutor::new(store.clone(), RetryPolicy::default());
        executor.register("payout_run", |_| Ok(()));

        assert_eq!(executor.run_due(now), 1);
        let jobs = store.list(Some(&JobStatus::Completed), 10).unwrap();
        assert_eq!(jobs.len(), 1);
    }

    #[test]
    fn failures_retry_with_backoff_until_exhausted() {
        let now = Utc::now();
        let store = store_with(Job::new(JobKind::InvoicingRun, now));
        let policy = RetryPolicy::fixed(1, std::time::Duration::from_millis(0));
        let mut executor = JobExecutor::new(store.clone(), policy);

        let calls = Arc::new(AtomicU32::new(0));
        let seen = calls.clone();
        executor.register("invoicing_run", move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
            Err("transfer rejected".to_string())
        });

        // First attempt fails and re-queues.
        assert_eq!(executor.run_due(now), 1);
        let failed = store
            .list(
                Some(&JobStatus::Failed {
                    error: String::new(),
                    attempt: 0,
                }),
                10,
            )
            .unwrap();
        assert_eq!(failed.len(), 1);

        // Second attempt exhausts the policy and dead-letters.
        let later = now + Duration::minutes(1);
        assert_eq!(executor.run_due(later), 1);
        let dead = store
            .list(
                Some(&JobStatus::DeadLettered {
                    error: String::new(),
                    attempts: 0,
                }),
                10,
            )
            .unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn unhandled_kinds_dead_letter_immediately() {
        let now = Utc::now();
        let store = store_with(Job::new(
            JobKind::Custom {
                kind: "unknown".to_string(),
            },
            now,
        ));
        let executor = JobExecutor::new(store.clone(), RetryPolicy::default());

        assert_eq!(executor.run_due(now), 1);
        let dead = store
            .list(
                Some(&JobStatus::DeadLettered {
                    error: String::new(),
                    attempts: 0,
                }),
                10,
            )
            .unwrap();
        assert_eq!(dead.len(), 1);
    }
}
