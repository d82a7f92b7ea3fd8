use super::lookup::{LookupError, RecipeLookup};
use super::transform::{transform_meal, TransformError};
use crate::content_store::{with_content_store, ContentStore};
use crate::metrics;
use crate::workers::{parse_payload, HandlerError, JobContext, JobHandler};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportPayload {
    pub source_id: String,
    pub user_id: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    #[error("invalid import payload: {0}")]
    InvalidPayload(String),

    #[error(transparent)]
    Lookup(#[from] LookupError),

    #[error("cannot transform recipe {source_id}: {error}")]
    Transform {
        source_id: String,
        error: TransformError,
    },

    #[error("failed to persist recipe: {0:#}")]
    Persist(anyhow::Error),

    #[error("cancelled")]
    Cancelled,
}

impl From<ImportError> for HandlerError {
    fn from(err: ImportError) -> Self {
        let transient = match &err {
            ImportError::Lookup(e) => e.is_transient(),
            ImportError::Persist(_) => true,
            ImportError::Cancelled => return HandlerError::Cancelled,
            ImportError::InvalidPayload(_) | ImportError::Transform { .. } => false,
        };
        if transient {
            HandlerError::transient(err)
        } else {
            HandlerError::permanent(err)
        }
    }
}

impl ImportError {
    fn metric_label(&self) -> &'static str {
        match self {
            ImportError::Lookup(LookupError::NotFound(_)) => "not_found",
            ImportError::Lookup(e) if e.is_transient() => "unavailable",
            ImportError::Lookup(_) | ImportError::InvalidPayload(_) => "rejected",
            ImportError::Transform { .. } => "invalid_record",
            ImportError::Persist(_) => "persist_error",
            ImportError::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportOutcome {
    pub record_id: i64,
    pub title: String,
    pub ingredients: usize,
}

/// Fetches a recipe from the lookup service and stores it for a user.
pub struct ImportHandler {
    lookup: Arc<dyn RecipeLookup>,
    content_store: Arc<dyn ContentStore>,
}

impl ImportHandler {
    pub fn new(lookup: Arc<dyn RecipeLookup>, content_store: Arc<dyn ContentStore>) -> Self {
        Self {
            lookup,
            content_store,
        }
    }

    pub async fn import(
        &self,
        ctx: &JobContext,
        payload: &ImportPayload,
    ) -> Result<ImportOutcome, ImportError> {
        let result = self.run(ctx, payload).await;
        match &result {
            Ok(outcome) => {
                metrics::record_import("imported");
                info!(
                    source_id = %payload.source_id,
                    user_id = %payload.user_id,
                    record_id = outcome.record_id,
                    "Imported \"{}\" with {} ingredients",
                    outcome.title,
                    outcome.ingredients
                );
            }
            Err(e) => {
                metrics::record_import(e.metric_label());
                warn!(source_id = %payload.source_id, "Import failed: {}", e);
            }
        }
        result
    }

    async fn run(
        &self,
        ctx: &JobContext,
        payload: &ImportPayload,
    ) -> Result<ImportOutcome, ImportError> {
        if payload.source_id.trim().is_empty() || payload.user_id.trim().is_empty() {
            return Err(ImportError::InvalidPayload(
                "sourceId and userId must not be empty".to_string(),
            ));
        }

        let record = tokio::select! {
            _ = ctx.cancellation_token.cancelled() => return Err(ImportError::Cancelled),
            record = self.lookup.fetch_by_id(&payload.source_id) => record?,
        };

        let draft = transform_meal(&record).map_err(|error| ImportError::Transform {
            source_id: payload.source_id.clone(),
            error,
        })?;

        if ctx.is_cancelled() {
            return Err(ImportError::Cancelled);
        }

        let title = draft.title.clone();
        let ingredients = draft.ingredients.len();
        let source_id = payload.source_id.clone();
        let user_id = payload.user_id.clone();
        let record_id = with_content_store(&self.content_store, move |s| {
            s.upsert_recipe(&source_id, &user_id, &draft)
        })
        .await
        .map_err(ImportError::Persist)?;

        Ok(ImportOutcome {
            record_id,
            title,
            ingredients,
        })
    }
}

#[async_trait]
impl JobHandler for ImportHandler {
    async fn handle(
        &self,
        ctx: &JobContext,
        payload: JsonValue,
    ) -> Result<Option<JsonValue>, HandlerError> {
        let payload: ImportPayload = parse_payload(payload)?;
        let outcome = self.import(ctx, &payload).await?;
        Ok(Some(json!({
            "recordId": outcome.record_id,
            "title": outcome.title,
            "ingredients": outcome.ingredients,
        })))
    }
}
