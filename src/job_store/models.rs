//! Data models for the job store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting to be claimed once `scheduled_at` has passed.
    Pending,
    /// Claimed by exactly one worker.
    Running,
    Succeeded,
    /// Settled after a permanent error or exhausted attempts.
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(JobStatus::Pending),
            "running" => Some(JobStatus::Running),
            "succeeded" => Some(JobStatus::Succeeded),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }

    /// Terminal states never transition again on their own.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of a job: `(type, id)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobKey {
    pub job_type: String,
    pub id: String,
}

impl JobKey {
    pub fn new(job_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            job_type: job_type.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for JobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.job_type, self.id)
    }
}

/// A unit of asynchronous work.
#[derive(Debug, Clone, Serialize)]
pub struct Job {
    pub job_type: String,
    pub id: String,
    pub payload: serde_json::Value,
    pub status: JobStatus,
    pub attempts: u32,
    pub max_attempts: u32,
    pub scheduled_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub result: Option<serde_json::Value>,
}

impl Job {
    pub fn key(&self) -> JobKey {
        JobKey::new(self.job_type.clone(), self.id.clone())
    }
}

/// Options accepted by `JobStore::enqueue`.
#[derive(Debug, Clone, Default)]
pub struct EnqueueOptions {
    /// Explicit identity. A random UUID is used when absent.
    pub job_id: Option<String>,
    /// Overrides the store's default attempt budget.
    pub max_attempts: Option<u32>,
    /// Delay before the job becomes claimable.
    pub delay: Option<Duration>,
}

impl EnqueueOptions {
    pub fn with_id(job_id: impl Into<String>) -> Self {
        Self {
            job_id: Some(job_id.into()),
            ..Default::default()
        }
    }

    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

/// What `enqueue` did with the requested identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// A new job row was created.
    Created,
    /// A job with this identity is already pending or running; nothing changed.
    AlreadyActive,
    /// A settled job with this identity was reset to pending.
    Requeued,
}

impl EnqueueOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnqueueOutcome::Created => "created",
            EnqueueOutcome::AlreadyActive => "already_active",
            EnqueueOutcome::Requeued => "requeued",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Enqueued {
    pub key: JobKey,
    pub outcome: EnqueueOutcome,
}

/// Retry classification of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Timeouts, connection errors, lock contention, interrupted runs.
    Transient,
    /// Not found, missing contact, malformed payload.
    Permanent,
}

/// Failure reported to `JobStore::fail`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl JobFailure {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Transient,
            message: message.into(),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Permanent,
            message: message.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind == FailureKind::Transient
    }
}

impl fmt::Display for JobFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            FailureKind::Transient => write!(f, "transient: {}", self.message),
            FailureKind::Permanent => write!(f, "permanent: {}", self.message),
        }
    }
}

/// Result of `JobStore::fail`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailOutcome {
    /// Back to pending, claimable again at `next_run_at`.
    Retrying {
        attempts: u32,
        next_run_at: DateTime<Utc>,
    },
    /// Settled as failed.
    Failed { attempts: u32 },
    /// The job was not running (already settled, or unknown); nothing changed.
    NotRunning,
}

/// A named recurring schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepeatSpec {
    pub job_id: String,
    pub job_type: String,
    pub cron_expression: String,
    #[serde(default)]
    pub payload_template: serde_json::Value,
}

impl RepeatSpec {
    pub fn new(
        job_id: impl Into<String>,
        job_type: impl Into<String>,
        cron_expression: impl Into<String>,
        payload_template: serde_json::Value,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            job_type: job_type.into(),
            cron_expression: cron_expression.into(),
            payload_template,
        }
    }
}

/// A repeat spec as stored, with its next firing time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegisteredRepeatable {
    pub spec: RepeatSpec,
    pub next_fire_at: DateTime<Utc>,
    pub registered_at: DateTime<Utc>,
}

/// Summary of `JobStore::replace_repeatables`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplaceSummary {
    pub registered: usize,
    /// Job ids of stale specs that were dropped.
    pub removed: Vec<String>,
}

/// Filter for `JobStore::list_jobs`.
#[derive(Debug, Clone)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    pub job_type: Option<String>,
    pub limit: usize,
}

impl Default for JobFilter {
    fn default() -> Self {
        Self {
            status: None,
            job_type: None,
            limit: 100,
        }
    }
}

/// Job counts per status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct JobStats {
    pub pending: usize,
    pub running: usize,
    pub succeeded: usize,
    pub failed: usize,
}
