use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    // Core settings (can override CLI)
    pub db_dir: Option<String>,
    pub metrics_port: Option<u16>,
    pub email_backend: Option<String>,

    // Feature configs
    pub retry: Option<RetryConfig>,
    pub workers: Option<WorkersConfig>,
    pub trending: Option<TrendingConfig>,
    pub recommendations: Option<RecommendationsConfig>,
    pub import: Option<ImportConfig>,
    pub smtp: Option<SmtpConfig>,
    pub retention: Option<RetentionConfig>,
    pub recurring: Option<Vec<RecurringJobConfig>>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: Option<u32>,
    pub initial_backoff_ms: Option<u64>,
    pub max_backoff_ms: Option<u64>,
    pub multiplier: Option<f64>,
    pub jitter_ratio: Option<f64>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct WorkersConfig {
    pub poll_interval_ms: Option<u64>,
    pub shutdown_grace_secs: Option<u64>,
    pub max_tick_interval_secs: Option<u64>,
    /// Per job type overrides, e.g. `[workers.job_types."import.recipe"]`.
    pub job_types: Option<HashMap<String, JobTypeConfig>>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct JobTypeConfig {
    pub concurrency: Option<usize>,
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct TrendingConfig {
    pub window_days: Option<u32>,
    pub limit: Option<usize>,
    pub view_weight: Option<u64>,
    pub share_weight: Option<u64>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct RecommendationsConfig {
    pub top_k: Option<usize>,
    pub from_address: Option<String>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct ImportConfig {
    pub base_url: Option<String>,
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SmtpConfig {
    pub host: String,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub starttls: Option<bool>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct RetentionConfig {
    pub succeeded_days: Option<u64>,
    pub failed_days: Option<u64>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RecurringJobConfig {
    pub job_id: String,
    pub job_type: String,
    pub cron: String,
    #[serde(default)]
    pub payload: Option<serde_json::Value>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}
