use super::cache::{TrendingCache, TrendingSnapshot};
use super::ranking::{rank_trending, ScoreWeights, TrendingEntry};
use crate::config::TrendingSettings;
use crate::content_store::{with_content_store, ContentStore, EventKind};
use crate::metrics;
use crate::workers::{HandlerError, JobContext, JobHandler};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Value as JsonValue};
use std::sync::Arc;
use tracing::{info, warn};

impl From<&TrendingSettings> for ScoreWeights {
    fn from(settings: &TrendingSettings) -> Self {
        ScoreWeights {
            views: settings.view_weight,
            shares: settings.share_weight,
        }
    }
}

/// Computes the trending list over the configured window and publishes it.
pub struct TrendingAggregator {
    content_store: Arc<dyn ContentStore>,
    cache: Arc<TrendingCache>,
    settings: TrendingSettings,
}

impl TrendingAggregator {
    pub fn new(
        content_store: Arc<dyn ContentStore>,
        cache: Arc<TrendingCache>,
        settings: TrendingSettings,
    ) -> Self {
        Self {
            content_store,
            cache,
            settings,
        }
    }

    /// Aggregate the window ending at `now` and publish the result.
    ///
    /// Any query error fails the run and leaves the published snapshot alone.
    pub async fn run_at(
        &self,
        ctx: &JobContext,
        now: DateTime<Utc>,
    ) -> Result<Arc<TrendingSnapshot>, HandlerError> {
        match self.compute(ctx, now).await {
            Ok(entries) => {
                let snapshot = self.cache.publish(entries, now, self.settings.window_days);
                metrics::set_trending_snapshot(snapshot.version, snapshot.entries.len());
                info!(
                    "Published trending snapshot v{} with {} entries",
                    snapshot.version,
                    snapshot.entries.len()
                );
                Ok(snapshot)
            }
            Err(HandlerError::Cancelled) => Err(HandlerError::Cancelled),
            Err(e) => {
                warn!("Trending aggregation failed: {}", e);
                self.cache.record_failure(e.to_string(), Utc::now());
                Err(e)
            }
        }
    }

    async fn compute(
        &self,
        ctx: &JobContext,
        now: DateTime<Utc>,
    ) -> Result<Vec<TrendingEntry>, HandlerError> {
        let since = now - self.settings.window();

        ctx.check_cancelled()?;
        let views = with_content_store(&self.content_store, move |s| {
            s.query_events(EventKind::View, since)
        })
        .await?;

        ctx.check_cancelled()?;
        let shares = with_content_store(&self.content_store, move |s| {
            s.query_events(EventKind::Share, since)
        })
        .await?;

        ctx.check_cancelled()?;
        let catalog = with_content_store(&self.content_store, |s| s.catalog_items()).await?;

        ctx.check_cancelled()?;
        Ok(rank_trending(
            &catalog,
            &views,
            &shares,
            ScoreWeights::from(&self.settings),
            self.settings.limit,
        ))
    }
}

#[async_trait]
impl JobHandler for TrendingAggregator {
    async fn handle(
        &self,
        ctx: &JobContext,
        _payload: JsonValue,
    ) -> Result<Option<JsonValue>, HandlerError> {
        let snapshot = self.run_at(ctx, Utc::now()).await?;
        Ok(Some(json!({
            "version": snapshot.version,
            "entries": snapshot.entries.len(),
        })))
    }
}
