//! Client for a TheMealDB-compatible recipe API.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{Map, Value as JsonValue};
use std::time::Duration;
use tracing::debug;

/// A raw recipe record, field names as returned by the API.
pub type MealRecord = Map<String, JsonValue>;

#[derive(Debug, thiserror::Error)]
pub enum LookupError {
    #[error("recipe {0} not found")]
    NotFound(String),

    #[error("recipe lookup timed out: {0}")]
    Timeout(String),

    /// Connection failures, 429 and 5xx replies.
    #[error("recipe service unavailable: {0}")]
    Unavailable(String),

    /// Any other 4xx reply.
    #[error("recipe lookup rejected: {0}")]
    Rejected(String),

    #[error("undecodable recipe response: {0}")]
    Decode(String),
}

impl LookupError {
    pub fn is_transient(&self) -> bool {
        matches!(self, LookupError::Timeout(_) | LookupError::Unavailable(_))
    }
}

#[async_trait]
pub trait RecipeLookup: Send + Sync {
    async fn fetch_by_id(&self, id: &str) -> Result<MealRecord, LookupError>;
}

#[derive(Deserialize)]
struct LookupResponse {
    meals: Option<Vec<MealRecord>>,
}

fn request_error(err: reqwest::Error) -> LookupError {
    if err.is_timeout() {
        LookupError::Timeout(err.to_string())
    } else if err.is_decode() {
        LookupError::Decode(err.to_string())
    } else {
        LookupError::Unavailable(err.to_string())
    }
}

/// HTTP client for `GET {base}/lookup.php?i={id}`.
pub struct MealDbClient {
    client: reqwest::Client,
    base_url: String,
}

impl MealDbClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        // Ensure base_url doesn't have trailing slash
        let base_url = base_url.trim_end_matches('/').to_string();

        Ok(Self { client, base_url })
    }
}

#[async_trait]
impl RecipeLookup for MealDbClient {
    async fn fetch_by_id(&self, id: &str) -> Result<MealRecord, LookupError> {
        let url = format!("{}/lookup.php?i={}", self.base_url, urlencoding::encode(id));
        debug!("Fetching recipe {} from {}", id, url);

        let response = self.client.get(&url).send().await.map_err(request_error)?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(LookupError::NotFound(id.to_string()));
        }
        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            return Err(LookupError::Unavailable(format!("status {}", status)));
        }
        if !status.is_success() {
            return Err(LookupError::Rejected(format!("status {}", status)));
        }

        let body: LookupResponse = response.json().await.map_err(request_error)?;
        body.meals
            .and_then(|meals| meals.into_iter().next())
            .ok_or_else(|| LookupError::NotFound(id.to_string()))
    }
}
