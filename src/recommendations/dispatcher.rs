use super::email::{EmailError, EmailMessage, EmailSender};
use crate::config::{RecommendationSettings, TrendingSettings};
use crate::content_store::{with_content_store, ContentStore};
use crate::trending::{rank_from_store, ScoreWeights, TrendingCache, TrendingEntry};
use crate::workers::{parse_payload, HandlerError, JobContext, JobHandler};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use std::fmt::Write;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchPayload {
    pub user_id: String,
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// The user has no email address. Retrying cannot fix this.
    #[error("user {0} has no contact address")]
    MissingContact(String),

    #[error(transparent)]
    Email(#[from] EmailError),

    #[error("failed to load recommendation data: {0:#}")]
    Store(anyhow::Error),

    #[error("cancelled")]
    Cancelled,
}

impl From<anyhow::Error> for DispatchError {
    fn from(err: anyhow::Error) -> Self {
        DispatchError::Store(err)
    }
}

impl From<DispatchError> for HandlerError {
    fn from(err: DispatchError) -> Self {
        match err {
            DispatchError::MissingContact(_) => HandlerError::permanent(err),
            DispatchError::Email(e) => e.into(),
            DispatchError::Store(_) => HandlerError::transient(err),
            DispatchError::Cancelled => HandlerError::Cancelled,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Sent { to: String, item_ids: Vec<String> },
    /// Nothing is trending; no email was sent.
    NothingToRecommend,
}

/// Emails a user the current top trending recipes.
pub struct RecommendationDispatcher {
    content_store: Arc<dyn ContentStore>,
    trending_cache: Arc<TrendingCache>,
    email_sender: Arc<dyn EmailSender>,
    settings: RecommendationSettings,
    trending: TrendingSettings,
}

impl RecommendationDispatcher {
    pub fn new(
        content_store: Arc<dyn ContentStore>,
        trending_cache: Arc<TrendingCache>,
        email_sender: Arc<dyn EmailSender>,
        settings: RecommendationSettings,
        trending: TrendingSettings,
    ) -> Self {
        Self {
            content_store,
            trending_cache,
            email_sender,
            settings,
            trending,
        }
    }

    pub async fn dispatch(
        &self,
        ctx: &JobContext,
        user_id: &str,
    ) -> Result<DispatchOutcome, DispatchError> {
        let lookup_id = user_id.to_string();
        let contact = with_content_store(&self.content_store, move |s| {
            s.find_user_contact(&lookup_id)
        })
        .await?
        .ok_or_else(|| DispatchError::MissingContact(user_id.to_string()))?;

        let picks = self.top_picks().await?;
        if picks.is_empty() {
            info!("Nothing trending, skipping recommendations for {}", user_id);
            return Ok(DispatchOutcome::NothingToRecommend);
        }

        if ctx.is_cancelled() {
            return Err(DispatchError::Cancelled);
        }
        let message = render_message(&self.settings.from_address, &contact, &picks);
        tokio::select! {
            sent = self.email_sender.send(&message) => sent?,
            _ = ctx.cancellation_token.cancelled() => return Err(DispatchError::Cancelled),
        }

        info!(
            "Sent {} recommendations to user {}",
            picks.len(),
            user_id
        );
        Ok(DispatchOutcome::Sent {
            to: contact,
            item_ids: picks.into_iter().map(|e| e.item_id).collect(),
        })
    }

    /// Top K from the published snapshot, or a direct ranking when nothing
    /// has been published yet.
    async fn top_picks(&self) -> Result<Vec<TrendingEntry>, DispatchError> {
        let top_k = self.settings.top_k;
        if let Some(snapshot) = self.trending_cache.latest() {
            return Ok(snapshot.entries.iter().take(top_k).cloned().collect());
        }

        let weights = ScoreWeights::from(&self.trending);
        let window = self.trending.window();
        let picks = with_content_store(&self.content_store, move |s| {
            rank_from_store(s, weights, window, top_k, Utc::now())
        })
        .await?;
        Ok(picks)
    }
}

pub fn render_message(from: &str, to: &str, picks: &[TrendingEntry]) -> EmailMessage {
    let mut body = String::from("Hi,\n\nHere are the recipes everyone is cooking this week:\n\n");
    for (position, entry) in picks.iter().enumerate() {
        let _ = writeln!(body, "{}. {}", position + 1, entry.title);
    }
    body.push_str("\nHappy cooking!\n");

    EmailMessage {
        from: from.to_string(),
        to: to.to_string(),
        subject: "Trending recipes picked for you".to_string(),
        body,
    }
}

#[async_trait]
impl JobHandler for RecommendationDispatcher {
    async fn handle(
        &self,
        ctx: &JobContext,
        payload: JsonValue,
    ) -> Result<Option<JsonValue>, HandlerError> {
        let payload: DispatchPayload = parse_payload(payload)?;
        match self.dispatch(ctx, &payload.user_id).await? {
            DispatchOutcome::Sent { to, item_ids } => Ok(Some(json!({
                "sent": true,
                "to": to,
                "items": item_ids,
            }))),
            DispatchOutcome::NothingToRecommend => Ok(Some(json!({ "sent": false }))),
        }
    }
}
