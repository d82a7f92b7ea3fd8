use crate::content_store::{with_content_store, ContentStore};
use crate::job_store::{with_job_store, EnqueueOptions, EnqueueOutcome, JobKey, JobStore};
use crate::job_types::RECOMMENDATIONS_SEND;
use crate::metrics;
use crate::workers::{HandlerError, JobContext, JobHandler};
use async_trait::async_trait;
use chrono::{DateTime, Datelike, Utc};
use serde_json::{json, Value as JsonValue};
use std::sync::Arc;
use tracing::info;

/// Job id of the weekly dispatch for `user_id`: one per user per ISO week.
pub fn dispatch_job_id(user_id: &str, at: DateTime<Utc>) -> String {
    let week = at.iso_week();
    format!("recommend-{}-{}-W{:02}", user_id, week.year(), week.week())
}

/// Enqueues one recommendation dispatch per contactable user.
pub struct RecommendationFanout {
    content_store: Arc<dyn ContentStore>,
    job_store: Arc<dyn JobStore>,
}

impl RecommendationFanout {
    pub fn new(content_store: Arc<dyn ContentStore>, job_store: Arc<dyn JobStore>) -> Self {
        Self {
            content_store,
            job_store,
        }
    }

    /// Returns how many dispatch jobs were newly enqueued.
    pub async fn fan_out(&self, ctx: &JobContext, now: DateTime<Utc>) -> Result<usize, HandlerError> {
        let recipients = with_content_store(&self.content_store, |s| s.list_recipient_ids()).await?;

        let mut enqueued = 0;
        for user_id in recipients {
            ctx.check_cancelled()?;
            let key = JobKey::new(RECOMMENDATIONS_SEND, dispatch_job_id(&user_id, now));
            // Any existing dispatch for this week counts, settled or not.
            let outcome = with_job_store(&self.job_store, move |s| {
                if s.get_job(&key)?.is_some() {
                    return Ok(None);
                }
                let enqueued = s.enqueue(
                    RECOMMENDATIONS_SEND,
                    json!({ "userId": user_id }),
                    EnqueueOptions::with_id(key.id),
                )?;
                Ok(Some(enqueued.outcome))
            })
            .await?;
            match outcome {
                Some(outcome) => {
                    metrics::record_job_enqueued(RECOMMENDATIONS_SEND, outcome.as_str());
                    if outcome == EnqueueOutcome::Created {
                        enqueued += 1;
                    }
                }
                None => metrics::record_job_enqueued(RECOMMENDATIONS_SEND, "already_sent"),
            }
        }

        info!("Enqueued {} recommendation dispatches", enqueued);
        Ok(enqueued)
    }
}

#[async_trait]
impl JobHandler for RecommendationFanout {
    async fn handle(
        &self,
        ctx: &JobContext,
        _payload: JsonValue,
    ) -> Result<Option<JsonValue>, HandlerError> {
        let enqueued = self.fan_out(ctx, Utc::now()).await?;
        Ok(Some(json!({ "enqueued": enqueued })))
    }
}
