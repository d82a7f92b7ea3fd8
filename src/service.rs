//! Operations exposed to the rest of the application.

use crate::job_store::{
    with_job_store, EnqueueOptions, Job, JobKey, JobStore, RepeatSpec, ReplaceSummary,
};
use crate::job_types::{IMPORT_RECIPE, RECOMMENDATIONS_SEND};
use crate::metrics;
use crate::scheduler::RecurringScheduler;
use crate::trending::{TrendingCache, TrendingStatus};
use anyhow::{bail, Result};
use serde_json::json;
use std::sync::Arc;
use tracing::info;

/// Job id of an import request. Repeating a request while the first is
/// still queued collapses into it. The user id is length-prefixed so no two
/// `(user, source)` pairs share an id, whatever characters they contain.
pub fn import_job_id(source_id: &str, user_id: &str) -> String {
    format!("import-{}:{}:{}", user_id.len(), user_id, source_id)
}

#[derive(Clone)]
pub struct JobsService {
    job_store: Arc<dyn JobStore>,
    scheduler: Arc<RecurringScheduler>,
    trending_cache: Arc<TrendingCache>,
}

impl JobsService {
    pub fn new(
        job_store: Arc<dyn JobStore>,
        scheduler: Arc<RecurringScheduler>,
        trending_cache: Arc<TrendingCache>,
    ) -> Self {
        Self {
            job_store,
            scheduler,
            trending_cache,
        }
    }

    /// Queue a recipe import for `user_id`.
    pub async fn enqueue_import(&self, source_id: &str, user_id: &str) -> Result<JobKey> {
        if source_id.trim().is_empty() || user_id.trim().is_empty() {
            bail!("source_id and user_id must not be empty");
        }

        let payload = json!({ "sourceId": source_id, "userId": user_id });
        let job_id = import_job_id(source_id, user_id);
        let enqueued = with_job_store(&self.job_store, move |s| {
            s.enqueue(IMPORT_RECIPE, payload, EnqueueOptions::with_id(job_id))
        })
        .await?;

        metrics::record_job_enqueued(IMPORT_RECIPE, enqueued.outcome.as_str());
        info!(
            "Import of {} for {} enqueued as {} ({})",
            source_id,
            user_id,
            enqueued.key,
            enqueued.outcome.as_str()
        );
        Ok(enqueued.key)
    }

    /// Queue a one-off recommendation email for `user_id`.
    pub async fn enqueue_recommendation(&self, user_id: &str) -> Result<JobKey> {
        if user_id.trim().is_empty() {
            bail!("user_id must not be empty");
        }

        let payload = json!({ "userId": user_id });
        let enqueued = with_job_store(&self.job_store, move |s| {
            s.enqueue(RECOMMENDATIONS_SEND, payload, EnqueueOptions::default())
        })
        .await?;
        metrics::record_job_enqueued(RECOMMENDATIONS_SEND, enqueued.outcome.as_str());
        Ok(enqueued.key)
    }

    /// Register `specs` as the complete set of recurring jobs. Idempotent.
    pub async fn schedule_recurring(&self, specs: &[RepeatSpec]) -> Result<ReplaceSummary> {
        self.scheduler.schedule_async(specs).await
    }

    pub fn trending_snapshot(&self) -> TrendingStatus {
        self.trending_cache.status()
    }

    pub async fn job_status(&self, key: &JobKey) -> Result<Option<Job>> {
        let key = key.clone();
        with_job_store(&self.job_store, move |s| s.get_job(&key)).await
    }
}
