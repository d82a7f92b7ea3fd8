mod file_config;

pub use file_config::{
    FileConfig, ImportConfig, JobTypeConfig, RecommendationsConfig, RecurringJobConfig,
    RetentionConfig, RetryConfig, SmtpConfig, TrendingConfig, WorkersConfig,
};

use crate::job_store::RepeatSpec;
use crate::job_types;
use crate::scheduler::validate_recurring;
use anyhow::{bail, Context, Result};
use clap::ValueEnum;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// Which email collaborator the dispatcher talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum EmailBackendKind {
    /// Log messages instead of delivering them.
    #[default]
    Log,
    /// Deliver through the `[smtp]` relay.
    Smtp,
}

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub db_dir: Option<PathBuf>,
    pub metrics_port: u16,
    pub email_backend: EmailBackendKind,
    pub mealdb_base_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    // Core settings
    pub db_dir: PathBuf,
    pub metrics_port: u16,
    pub email_backend: EmailBackendKind,

    // Feature configs (with defaults)
    pub retry: RetrySettings,
    pub workers: WorkerSettings,
    pub trending: TrendingSettings,
    pub recommendations: RecommendationSettings,
    pub import: ImportSettings,
    pub retention: RetentionSettings,
    pub smtp: Option<SmtpSettings>,

    /// Recurring jobs asserted at startup.
    pub recurring: Vec<RepeatSpec>,
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        let db_dir = file
            .db_dir
            .map(PathBuf::from)
            .or_else(|| cli.db_dir.clone())
            .ok_or_else(|| {
                anyhow::anyhow!("db_dir must be specified via --db-dir or in config file")
            })?;

        if !db_dir.exists() {
            bail!("Database directory does not exist: {:?}", db_dir);
        }
        if !db_dir.is_dir() {
            bail!("db_dir is not a directory: {:?}", db_dir);
        }

        let metrics_port = file.metrics_port.unwrap_or(cli.metrics_port);

        let email_backend = match file.email_backend {
            Some(s) => parse_email_backend(&s)
                .with_context(|| format!("Unknown email_backend '{}'", s))?,
            None => cli.email_backend,
        };

        let retry_file = file.retry.unwrap_or_default();
        let retry_defaults = RetrySettings::default();
        let retry = RetrySettings {
            max_attempts: retry_file
                .max_attempts
                .unwrap_or(retry_defaults.max_attempts),
            initial_backoff_ms: retry_file
                .initial_backoff_ms
                .unwrap_or(retry_defaults.initial_backoff_ms),
            max_backoff_ms: retry_file
                .max_backoff_ms
                .unwrap_or(retry_defaults.max_backoff_ms),
            multiplier: retry_file.multiplier.unwrap_or(retry_defaults.multiplier),
            jitter_ratio: retry_file
                .jitter_ratio
                .unwrap_or(retry_defaults.jitter_ratio),
        };
        if retry.max_attempts == 0 {
            bail!("retry.max_attempts must be at least 1");
        }
        if !(0.0..1.0).contains(&retry.jitter_ratio) {
            bail!("retry.jitter_ratio must be in [0, 1)");
        }
        // Jitter stays below the multiplier's growth, so delays keep increasing.
        if !retry.multiplier.is_finite() || retry.multiplier < 1.0 + retry.jitter_ratio {
            bail!(
                "retry.multiplier must be at least 1 + jitter_ratio ({}), got {}",
                1.0 + retry.jitter_ratio,
                retry.multiplier
            );
        }
        if retry.initial_backoff_ms == 0 {
            bail!("retry.initial_backoff_ms must be at least 1");
        }
        if retry.max_backoff_ms < retry.initial_backoff_ms {
            bail!(
                "retry.max_backoff_ms ({}) must not be below retry.initial_backoff_ms ({})",
                retry.max_backoff_ms,
                retry.initial_backoff_ms
            );
        }

        let workers_file = file.workers.unwrap_or_default();
        let worker_defaults = WorkerSettings::default();
        let mut per_type = worker_defaults.job_types.clone();
        for (job_type, overrides) in workers_file.job_types.unwrap_or_default() {
            let base = per_type
                .get(&job_type)
                .cloned()
                .unwrap_or_default();
            let concurrency = overrides.concurrency.unwrap_or(base.concurrency);
            if concurrency == 0 {
                bail!("workers.job_types.\"{}\".concurrency must be at least 1", job_type);
            }
            per_type.insert(
                job_type,
                JobTypeSettings {
                    concurrency,
                    timeout_secs: overrides.timeout_secs.unwrap_or(base.timeout_secs),
                },
            );
        }
        let workers = WorkerSettings {
            poll_interval_ms: workers_file
                .poll_interval_ms
                .unwrap_or(worker_defaults.poll_interval_ms),
            shutdown_grace_secs: workers_file
                .shutdown_grace_secs
                .unwrap_or(worker_defaults.shutdown_grace_secs),
            max_tick_interval_secs: workers_file
                .max_tick_interval_secs
                .unwrap_or(worker_defaults.max_tick_interval_secs),
            job_types: per_type,
        };

        let trending_file = file.trending.unwrap_or_default();
        let trending_defaults = TrendingSettings::default();
        let trending = TrendingSettings {
            window_days: trending_file
                .window_days
                .unwrap_or(trending_defaults.window_days),
            limit: trending_file.limit.unwrap_or(trending_defaults.limit),
            view_weight: trending_file
                .view_weight
                .unwrap_or(trending_defaults.view_weight),
            share_weight: trending_file
                .share_weight
                .unwrap_or(trending_defaults.share_weight),
        };

        let recommendations_file = file.recommendations.unwrap_or_default();
        let recommendation_defaults = RecommendationSettings::default();
        let recommendations = RecommendationSettings {
            top_k: recommendations_file
                .top_k
                .unwrap_or(recommendation_defaults.top_k),
            from_address: recommendations_file
                .from_address
                .unwrap_or(recommendation_defaults.from_address),
        };

        let import_file = file.import.unwrap_or_default();
        let import_defaults = ImportSettings::default();
        let import = ImportSettings {
            base_url: import_file
                .base_url
                .or_else(|| cli.mealdb_base_url.clone())
                .unwrap_or(import_defaults.base_url),
            timeout_secs: import_file
                .timeout_secs
                .unwrap_or(import_defaults.timeout_secs),
        };

        let retention_file = file.retention.unwrap_or_default();
        let retention_defaults = RetentionSettings::default();
        let retention = RetentionSettings {
            succeeded_days: retention_file
                .succeeded_days
                .unwrap_or(retention_defaults.succeeded_days),
            failed_days: retention_file
                .failed_days
                .unwrap_or(retention_defaults.failed_days),
        };

        let smtp = file.smtp.map(|s| SmtpSettings {
            host: s.host,
            port: s.port.unwrap_or(587),
            username: s.username,
            password: s.password,
            starttls: s.starttls.unwrap_or(true),
        });
        if email_backend == EmailBackendKind::Smtp && smtp.is_none() {
            bail!("email_backend = smtp requires an [smtp] section");
        }

        let recurring = match file.recurring {
            Some(entries) => entries
                .into_iter()
                .map(|entry| {
                    RepeatSpec::new(
                        entry.job_id,
                        entry.job_type,
                        entry.cron,
                        entry.payload.unwrap_or(serde_json::Value::Null),
                    )
                })
                .collect(),
            None => default_recurring_specs(),
        };
        validate_recurring(&recurring)?;

        Ok(Self {
            db_dir,
            metrics_port,
            email_backend,
            retry,
            workers,
            trending,
            recommendations,
            import,
            retention,
            smtp,
            recurring,
        })
    }

    pub fn jobs_db_path(&self) -> PathBuf {
        self.db_dir.join("jobs.db")
    }

    pub fn content_db_path(&self) -> PathBuf {
        self.db_dir.join("content.db")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub multiplier: f64,
    pub jitter_ratio: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff_ms: 30_000,
            max_backoff_ms: 3_600_000, // 1 hour
            multiplier: 2.0,
            jitter_ratio: 0.1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobTypeSettings {
    pub concurrency: usize,
    pub timeout_secs: u64,
}

impl JobTypeSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for JobTypeSettings {
    fn default() -> Self {
        Self {
            concurrency: 1,
            timeout_secs: 300,
        }
    }
}

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub poll_interval_ms: u64,
    pub shutdown_grace_secs: u64,
    pub max_tick_interval_secs: u64,
    pub job_types: HashMap<String, JobTypeSettings>,
}

impl WorkerSettings {
    /// Settings for a job type, falling back to defaults for unknown types.
    pub fn for_job_type(&self, job_type: &str) -> JobTypeSettings {
        self.job_types.get(job_type).cloned().unwrap_or_default()
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    pub fn max_tick_interval(&self) -> Duration {
        Duration::from_secs(self.max_tick_interval_secs)
    }
}

impl Default for WorkerSettings {
    fn default() -> Self {
        let per_type = [
            (job_types::IMPORT_RECIPE, 4, 60),
            (job_types::TRENDING_AGGREGATE, 1, 300),
            (job_types::RECOMMENDATIONS_SEND, 2, 60),
            (job_types::RECOMMENDATIONS_FANOUT, 1, 120),
            (job_types::PRUNE_JOBS, 1, 120),
        ]
        .into_iter()
        .map(|(name, concurrency, timeout_secs)| {
            (
                name.to_string(),
                JobTypeSettings {
                    concurrency,
                    timeout_secs,
                },
            )
        })
        .collect();

        Self {
            poll_interval_ms: 1000,
            shutdown_grace_secs: 30,
            max_tick_interval_secs: 60,
            job_types: per_type,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrendingSettings {
    pub window_days: u32,
    pub limit: usize,
    pub view_weight: u64,
    pub share_weight: u64,
}

impl TrendingSettings {
    pub fn window(&self) -> chrono::Duration {
        chrono::Duration::days(self.window_days as i64)
    }
}

impl Default for TrendingSettings {
    fn default() -> Self {
        Self {
            window_days: 7,
            limit: 20,
            view_weight: 1,
            share_weight: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecommendationSettings {
    pub top_k: usize,
    pub from_address: String,
}

impl Default for RecommendationSettings {
    fn default() -> Self {
        Self {
            top_k: 5,
            from_address: "Recipe Box <picks@recipes.local>".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportSettings {
    pub base_url: String,
    pub timeout_secs: u64,
}

impl Default for ImportSettings {
    fn default() -> Self {
        Self {
            base_url: "https://www.themealdb.com/api/json/v1/1".to_string(),
            timeout_secs: 15,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetentionSettings {
    pub succeeded_days: u64,
    pub failed_days: u64,
}

impl Default for RetentionSettings {
    fn default() -> Self {
        Self {
            succeeded_days: 7,
            failed_days: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmtpSettings {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub starttls: bool,
}

/// Recurring jobs registered when the config file has no `[[recurring]]` entries.
pub fn default_recurring_specs() -> Vec<RepeatSpec> {
    vec![
        RepeatSpec::new(
            "daily-trending",
            job_types::TRENDING_AGGREGATE,
            "0 0 * * *",
            serde_json::Value::Null,
        ),
        RepeatSpec::new(
            "weekly-recommendations",
            job_types::RECOMMENDATIONS_FANOUT,
            "0 9 * * MON",
            serde_json::Value::Null,
        ),
        RepeatSpec::new(
            "job-retention",
            job_types::PRUNE_JOBS,
            "30 3 * * *",
            serde_json::Value::Null,
        ),
    ]
}

/// Parses an email backend name, case insensitive.
fn parse_email_backend(s: &str) -> Option<EmailBackendKind> {
    EmailBackendKind::from_str(s, true).ok()
}
