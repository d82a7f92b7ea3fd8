//! Durable job queue.
//!
//! Jobs are keyed by `(job_type, id)`. Claiming is a compare-and-swap on the
//! job status, so a pending job is handed to exactly one worker.

mod models;
mod retry_policy;
mod schema;
mod sqlite_job_store;

pub use models::{
    EnqueueOptions, EnqueueOutcome, Enqueued, FailOutcome, FailureKind, Job, JobFailure,
    JobFilter, JobKey, JobStats, JobStatus, RegisteredRepeatable, RepeatSpec, ReplaceSummary,
};
pub use retry_policy::RetryPolicy;
pub use sqlite_job_store::SqliteJobStore;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Storage backend for jobs and recurring job specs.
pub trait JobStore: Send + Sync {
    // ---- Jobs ----

    /// Enqueue a job. An explicit id that is already pending or running is a
    /// no-op; one that already settled is reset to pending.
    fn enqueue(
        &self,
        job_type: &str,
        payload: serde_json::Value,
        opts: EnqueueOptions,
    ) -> Result<Enqueued>;

    /// Atomically move the oldest due pending job of `job_type` to running.
    fn claim_next_at(&self, job_type: &str, now: DateTime<Utc>) -> Result<Option<Job>>;

    fn claim_next(&self, job_type: &str) -> Result<Option<Job>> {
        self.claim_next_at(job_type, Utc::now())
    }

    /// Settle a running job as succeeded. Returns false if it was not running.
    fn complete(&self, key: &JobKey, result: Option<&serde_json::Value>) -> Result<bool>;

    /// Record a failed attempt, scheduling a retry or settling the job.
    fn fail_at(&self, key: &JobKey, failure: &JobFailure, now: DateTime<Utc>)
        -> Result<FailOutcome>;

    fn fail(&self, key: &JobKey, failure: &JobFailure) -> Result<FailOutcome> {
        self.fail_at(key, failure, Utc::now())
    }

    fn get_job(&self, key: &JobKey) -> Result<Option<Job>>;

    fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<Job>>;

    fn stats(&self) -> Result<JobStats>;

    /// Fail every job still running that started before `started_before`
    /// with a transient error, so it is retried per the normal policy.
    fn recover_interrupted(&self, started_before: DateTime<Utc>) -> Result<usize>;

    /// Delete settled jobs that finished before the given cutoffs.
    fn prune_finished(
        &self,
        succeeded_before: DateTime<Utc>,
        failed_before: DateTime<Utc>,
    ) -> Result<usize>;

    /// Reset a failed job to pending with a fresh attempt budget.
    fn retry_failed(&self, key: &JobKey) -> Result<bool>;

    // ---- Repeatable specs ----

    /// Upsert a spec by `job_id`. Returns the job id.
    fn register_repeatable(&self, spec: &RepeatSpec, next_fire_at: DateTime<Utc>)
        -> Result<String>;

    /// In one transaction, drop every spec whose job id is not in `specs`
    /// and upsert the rest.
    fn replace_repeatables(&self, specs: &[(RepeatSpec, DateTime<Utc>)]) -> Result<ReplaceSummary>;

    fn remove_repeatable(&self, job_id: &str) -> Result<bool>;

    fn list_repeatables(&self) -> Result<Vec<RegisteredRepeatable>>;

    /// Specs whose `next_fire_at` is at or before `now`.
    fn due_repeatables(&self, now: DateTime<Utc>) -> Result<Vec<RegisteredRepeatable>>;

    /// Fire one tick of `spec`: move `next_fire_at` from `expected` to `next`
    /// and enqueue the job under the spec's id, in one transaction. Returns
    /// `None` if another caller already fired this tick.
    fn fire_repeatable(
        &self,
        spec: &RepeatSpec,
        expected: DateTime<Utc>,
        next: DateTime<Utc>,
    ) -> Result<Option<Enqueued>>;

    /// Earliest `next_fire_at` across all specs.
    fn next_repeatable_fire_at(&self) -> Result<Option<DateTime<Utc>>>;
}

/// Run a blocking job store call off the async runtime.
pub(crate) async fn with_job_store<T, F>(store: &Arc<dyn JobStore>, f: F) -> Result<T>
where
    F: FnOnce(&dyn JobStore) -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    let store = Arc::clone(store);
    tokio::task::spawn_blocking(move || f(store.as_ref()))
        .await
        .context("Job store task panicked")?
}
