use super::handler::{JobContext, JobHandler};
use super::registry::WorkerRegistry;
use crate::config::WorkerSettings;
use crate::job_store::{with_job_store, FailOutcome, Job, JobFailure, JobStore};
use crate::metrics;
use anyhow::{bail, Result};
use serde_json::Value as JsonValue;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::task::{AbortHandle, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

struct AbortOnDrop(AbortHandle);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Bounded pools of worker tasks, one per job type.
///
/// Each worker claims one job at a time, so a type started with concurrency
/// `n` never runs more than `n` of its jobs at once in this process.
pub struct WorkerPool {
    job_store: Arc<dyn JobStore>,
    settings: WorkerSettings,
    registry: Arc<WorkerRegistry>,
    shutdown_token: CancellationToken,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    pub fn new(
        job_store: Arc<dyn JobStore>,
        settings: WorkerSettings,
        shutdown_token: CancellationToken,
    ) -> Self {
        Self {
            job_store,
            settings,
            registry: Arc::new(WorkerRegistry::new()),
            shutdown_token,
            handles: Mutex::new(Vec::new()),
        }
    }

    pub fn registry(&self) -> Arc<WorkerRegistry> {
        Arc::clone(&self.registry)
    }

    /// Start `concurrency` workers for `job_type`.
    ///
    /// The handler timeout comes from the per-type worker settings.
    pub fn start(
        &self,
        job_type: &str,
        handler: Arc<dyn JobHandler>,
        concurrency: usize,
    ) -> Result<()> {
        if concurrency == 0 {
            bail!("Concurrency for job type '{}' must be at least 1", job_type);
        }
        if self.shutdown_token.is_cancelled() {
            bail!("Worker pool is shutting down");
        }
        if self.registry.is_registered(job_type) {
            bail!("Workers for job type '{}' already started", job_type);
        }

        let timeout = self.settings.for_job_type(job_type).timeout();
        self.registry.add_workers(job_type, concurrency);

        let mut handles = self.handles.lock().unwrap();
        for index in 0..concurrency {
            let worker = Worker {
                job_type: job_type.to_string(),
                index,
                handler: Arc::clone(&handler),
                job_store: Arc::clone(&self.job_store),
                registry: Arc::clone(&self.registry),
                poll_interval: self.settings.poll_interval(),
                timeout,
                shutdown_token: self.shutdown_token.clone(),
            };
            handles.push(tokio::spawn(worker.run()));
        }

        info!(
            "Started {} worker(s) for '{}' (timeout {:?})",
            concurrency, job_type, timeout
        );
        Ok(())
    }

    /// Start workers with the concurrency configured for `job_type`.
    pub fn start_configured(&self, job_type: &str, handler: Arc<dyn JobHandler>) -> Result<()> {
        let concurrency = self.settings.for_job_type(job_type).concurrency;
        self.start(job_type, handler, concurrency)
    }

    /// Stop claiming, cancel in-flight handlers and wait for the workers to
    /// exit, up to the shutdown grace period.
    pub async fn shutdown(&self) {
        info!("Shutting down worker pool...");
        self.shutdown_token.cancel();

        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.handles.lock().unwrap());
        let aborts: Vec<AbortHandle> = handles.iter().map(|h| h.abort_handle()).collect();

        let grace = self.settings.shutdown_grace();
        if tokio::time::timeout(grace, futures::future::join_all(handles))
            .await
            .is_err()
        {
            warn!(
                "Workers did not stop within {:?}, aborting; their jobs will be recovered on next start",
                grace
            );
            for abort in aborts {
                abort.abort();
            }
        }
        info!("Worker pool shutdown complete");
    }
}

struct Worker {
    job_type: String,
    index: usize,
    handler: Arc<dyn JobHandler>,
    job_store: Arc<dyn JobStore>,
    registry: Arc<WorkerRegistry>,
    poll_interval: Duration,
    timeout: Duration,
    shutdown_token: CancellationToken,
}

impl Worker {
    async fn run(self) {
        debug!("Worker {}#{} started", self.job_type, self.index);

        while !self.shutdown_token.is_cancelled() {
            let job_type = self.job_type.clone();
            match with_job_store(&self.job_store, move |s| s.claim_next(&job_type)).await {
                Ok(Some(job)) => {
                    self.execute(job).await;
                    continue;
                }
                Ok(None) => {}
                Err(e) => warn!("Worker {}#{} failed to claim: {:#}", self.job_type, self.index, e),
            }

            tokio::select! {
                _ = self.shutdown_token.cancelled() => break,
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }

        self.registry.remove_worker(&self.job_type);
        debug!("Worker {}#{} stopped", self.job_type, self.index);
    }

    async fn execute(&self, job: Job) {
        let _busy = self.registry.mark_busy(&self.job_type);
        let key = job.key();
        let attempt = job.attempts + 1;
        info!(
            job_type = %key.job_type,
            job_id = %key.id,
            attempt,
            "Claimed job"
        );

        let ctx = JobContext::new(self.shutdown_token.child_token(), key.clone(), attempt);
        let start = Instant::now();
        let outcome = self.invoke(&ctx, job.payload).await;
        let elapsed = start.elapsed();

        match outcome {
            Ok(result) => {
                metrics::record_job_execution(&self.job_type, "succeeded", elapsed);
                let completed_key = key.clone();
                match with_job_store(&self.job_store, move |s| {
                    s.complete(&completed_key, result.as_ref())
                })
                .await
                {
                    Ok(true) => info!(
                        job_type = %key.job_type,
                        job_id = %key.id,
                        attempt,
                        "Job completed in {:?}",
                        elapsed
                    ),
                    Ok(false) => warn!("Job {} was no longer running when it completed", key),
                    Err(e) => error!("Failed to record completion of {}: {:#}", key, e),
                }
            }
            Err(failure) => {
                let status = if failure.is_retryable() {
                    "transient_error"
                } else {
                    "permanent_error"
                };
                metrics::record_job_execution(&self.job_type, status, elapsed);

                let (failed_key, reported) = (key.clone(), failure.clone());
                match with_job_store(&self.job_store, move |s| s.fail(&failed_key, &reported)).await {
                    Ok(FailOutcome::Retrying {
                        attempts,
                        next_run_at,
                    }) => warn!(
                        job_type = %key.job_type,
                        job_id = %key.id,
                        attempt = attempts,
                        "Job failed ({}), retrying at {}",
                        failure,
                        next_run_at
                    ),
                    Ok(FailOutcome::Failed { attempts }) => error!(
                        job_type = %key.job_type,
                        job_id = %key.id,
                        attempt = attempts,
                        "Job failed for good: {}",
                        failure
                    ),
                    Ok(FailOutcome::NotRunning) => {
                        warn!("Job {} was no longer running when it failed", key)
                    }
                    Err(e) => error!("Failed to record failure of {}: {:#}", key, e),
                }
            }
        }
    }

    /// Run the handler in its own task so a panic is contained.
    async fn invoke(
        &self,
        ctx: &JobContext,
        payload: JsonValue,
    ) -> Result<Option<JsonValue>, JobFailure> {
        let handler = Arc::clone(&self.handler);
        let task_ctx = ctx.clone();
        let task = tokio::spawn(async move { handler.handle(&task_ctx, payload).await });
        let _abort = AbortOnDrop(task.abort_handle());

        match tokio::time::timeout(self.timeout, task).await {
            Ok(Ok(Ok(result))) => Ok(result),
            Ok(Ok(Err(e))) => Err(e.to_failure()),
            Ok(Err(join_error)) => Err(JobFailure::transient(format!(
                "handler panicked: {}",
                join_error
            ))),
            Err(_) => {
                ctx.cancellation_token.cancel();
                Err(JobFailure::transient(format!(
                    "timed out after {:?}",
                    self.timeout
                )))
            }
        }
    }
}
