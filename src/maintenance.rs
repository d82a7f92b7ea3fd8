//! Job retention cleanup.
//!
//! Settled jobs are kept for a while so operators can inspect them with
//! `cli-jobs`, then deleted by a recurring `maintenance.prune_jobs` job.

use crate::config::RetentionSettings;
use crate::job_store::{with_job_store, JobStore};
use crate::workers::{HandlerError, JobContext, JobHandler};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::{json, Value as JsonValue};
use std::sync::Arc;
use tracing::info;

pub struct PruneJobsHandler {
    job_store: Arc<dyn JobStore>,
    retention: RetentionSettings,
}

impl PruneJobsHandler {
    pub fn new(job_store: Arc<dyn JobStore>, retention: RetentionSettings) -> Self {
        Self {
            job_store,
            retention,
        }
    }

    pub async fn prune_at(&self, ctx: &JobContext, now: DateTime<Utc>) -> Result<usize, HandlerError> {
        ctx.check_cancelled()?;

        let succeeded_before = now - Duration::days(self.retention.succeeded_days as i64);
        let failed_before = now - Duration::days(self.retention.failed_days as i64);
        info!(
            "Pruning succeeded jobs older than {} days and failed jobs older than {} days",
            self.retention.succeeded_days, self.retention.failed_days
        );

        let deleted = with_job_store(&self.job_store, move |s| {
            s.prune_finished(succeeded_before, failed_before)
        })
        .await?;

        if deleted > 0 {
            info!("Deleted {} settled jobs", deleted);
        } else {
            info!("No settled jobs to prune");
        }
        Ok(deleted)
    }
}

#[async_trait]
impl JobHandler for PruneJobsHandler {
    async fn handle(
        &self,
        ctx: &JobContext,
        _payload: JsonValue,
    ) -> Result<Option<JsonValue>, HandlerError> {
        let deleted = self.prune_at(ctx, Utc::now()).await?;
        Ok(Some(json!({ "deleted": deleted })))
    }
}
