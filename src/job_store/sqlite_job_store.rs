//! SQLite implementation of the job store.

use super::models::{
    EnqueueOptions, EnqueueOutcome, Enqueued, FailOutcome, Job, JobFailure, JobFilter, JobKey,
    JobStats, JobStatus, RegisteredRepeatable, RepeatSpec, ReplaceSummary,
};
use super::retry_policy::RetryPolicy;
use super::schema::JOB_STORE_VERSIONED_SCHEMAS;
use super::JobStore;
use crate::sqlite_persistence::open_versioned;
use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, types::Type, Connection, OptionalExtension, Row};
use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;

const JOB_COLUMNS: &str = "job_type, id, payload, status, attempts, max_attempts, \
     scheduled_at, created_at, updated_at, started_at, finished_at, last_error, result";

const REPEATABLE_COLUMNS: &str =
    "job_id, job_type, cron_expression, payload_template, next_fire_at, registered_at";

const UPSERT_REPEATABLE_SQL: &str = "INSERT INTO repeat_specs \
     (job_id, job_type, cron_expression, payload_template, next_fire_at, registered_at) \
     VALUES (?1, ?2, ?3, ?4, ?5, ?6) \
     ON CONFLICT(job_id) DO UPDATE SET \
         job_type = excluded.job_type, \
         payload_template = excluded.payload_template, \
         next_fire_at = CASE WHEN repeat_specs.cron_expression = excluded.cron_expression \
                             THEN repeat_specs.next_fire_at \
                             ELSE excluded.next_fire_at END, \
         cron_expression = excluded.cron_expression, \
         registered_at = excluded.registered_at";

/// SQLite-backed job store. All operations run under one connection mutex,
/// which together with status-conditional updates makes claims exclusive.
#[derive(Clone)]
pub struct SqliteJobStore {
    conn: Arc<Mutex<Connection>>,
    retry_policy: RetryPolicy,
}

impl SqliteJobStore {
    /// Opens an existing job database or creates a new one with the current schema.
    pub fn new<P: AsRef<Path>>(db_path: P, retry_policy: RetryPolicy) -> Result<Self> {
        let conn = open_versioned(db_path, JOB_STORE_VERSIONED_SCHEMAS, "job store")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            retry_policy,
        })
    }

    /// Create an in-memory store for testing.
    #[cfg(test)]
    pub fn in_memory(retry_policy: RetryPolicy) -> Result<Self> {
        let conn = crate::sqlite_persistence::open_in_memory(JOB_STORE_VERSIONED_SCHEMAS)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            retry_policy,
        })
    }
}

fn to_millis(t: DateTime<Utc>) -> i64 {
    t.timestamp_millis()
}

fn conversion_error(idx: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, message.into())
}

fn get_time(row: &Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let ms: i64 = row.get(idx)?;
    DateTime::from_timestamp_millis(ms).ok_or(rusqlite::Error::IntegralValueOutOfRange(idx, ms))
}

fn get_opt_time(row: &Row, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    match row.get::<_, Option<i64>>(idx)? {
        Some(ms) => DateTime::from_timestamp_millis(ms)
            .map(Some)
            .ok_or(rusqlite::Error::IntegralValueOutOfRange(idx, ms)),
        None => Ok(None),
    }
}

fn get_json(row: &Row, idx: usize) -> rusqlite::Result<serde_json::Value> {
    let text: String = row.get(idx)?;
    serde_json::from_str(&text)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn row_to_job(row: &Row) -> rusqlite::Result<Job> {
    let status_str: String = row.get(3)?;
    let status = JobStatus::parse(&status_str)
        .ok_or_else(|| conversion_error(3, format!("unknown job status: {}", status_str)))?;
    let result = match row.get::<_, Option<String>>(12)? {
        Some(text) => Some(
            serde_json::from_str(&text)
                .map_err(|e| rusqlite::Error::FromSqlConversionFailure(12, Type::Text, Box::new(e)))?,
        ),
        None => None,
    };

    Ok(Job {
        job_type: row.get(0)?,
        id: row.get(1)?,
        payload: get_json(row, 2)?,
        status,
        attempts: row.get::<_, i64>(4)? as u32,
        max_attempts: row.get::<_, i64>(5)? as u32,
        scheduled_at: get_time(row, 6)?,
        created_at: get_time(row, 7)?,
        updated_at: get_time(row, 8)?,
        started_at: get_opt_time(row, 9)?,
        finished_at: get_opt_time(row, 10)?,
        last_error: row.get(11)?,
        result,
    })
}

fn row_to_repeatable(row: &Row) -> rusqlite::Result<RegisteredRepeatable> {
    Ok(RegisteredRepeatable {
        spec: RepeatSpec {
            job_id: row.get(0)?,
            job_type: row.get(1)?,
            cron_expression: row.get(2)?,
            payload_template: get_json(row, 3)?,
        },
        next_fire_at: get_time(row, 4)?,
        registered_at: get_time(row, 5)?,
    })
}

/// Records a failed attempt on a running job. Must be called with the
/// connection lock held.
fn fail_locked(
    conn: &Connection,
    policy: &RetryPolicy,
    key: &JobKey,
    failure: &JobFailure,
    now: DateTime<Utc>,
) -> Result<FailOutcome> {
    let row: Option<(String, i64, i64)> = conn
        .query_row(
            "SELECT status, attempts, max_attempts FROM jobs WHERE job_type = ?1 AND id = ?2",
            params![key.job_type, key.id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()?;

    let Some((status, attempts, max_attempts)) = row else {
        return Ok(FailOutcome::NotRunning);
    };
    if JobStatus::parse(&status) != Some(JobStatus::Running) {
        return Ok(FailOutcome::NotRunning);
    }

    let attempts = attempts as u32 + 1;
    let max_attempts = max_attempts as u32;
    let now_ms = to_millis(now);

    if policy.should_retry(failure, attempts, max_attempts) {
        let next_run_at = now + chrono::Duration::from_std(policy.backoff(attempts))?;
        conn.execute(
            "UPDATE jobs SET status = 'pending', attempts = ?3, scheduled_at = ?4, \
             updated_at = ?5, last_error = ?6 \
             WHERE job_type = ?1 AND id = ?2",
            params![
                key.job_type,
                key.id,
                attempts,
                to_millis(next_run_at),
                now_ms,
                failure.to_string()
            ],
        )?;
        Ok(FailOutcome::Retrying {
            attempts,
            next_run_at,
        })
    } else {
        conn.execute(
            "UPDATE jobs SET status = 'failed', attempts = ?3, finished_at = ?4, \
             updated_at = ?4, last_error = ?5 \
             WHERE job_type = ?1 AND id = ?2",
            params![key.job_type, key.id, attempts, now_ms, failure.to_string()],
        )?;
        Ok(FailOutcome::Failed { attempts })
    }
}

/// Inserts the job, or resets a settled one to pending. Active jobs are left
/// untouched. Must be called with the connection lock held.
fn enqueue_locked(
    conn: &Connection,
    key: &JobKey,
    payload_text: &str,
    max_attempts: u32,
    scheduled_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<EnqueueOutcome> {
    let existing: Option<String> = conn
        .query_row(
            "SELECT status FROM jobs WHERE job_type = ?1 AND id = ?2",
            params![key.job_type, key.id],
            |r| r.get(0),
        )
        .optional()?;

    let outcome = match existing.as_deref().map(JobStatus::parse) {
        None => {
            conn.execute(
                "INSERT INTO jobs (job_type, id, payload, status, attempts, max_attempts, \
                 scheduled_at, created_at, updated_at) \
                 VALUES (?1, ?2, ?3, 'pending', 0, ?4, ?5, ?6, ?6)",
                params![
                    key.job_type,
                    key.id,
                    payload_text,
                    max_attempts,
                    to_millis(scheduled_at),
                    to_millis(now)
                ],
            )?;
            EnqueueOutcome::Created
        }
        Some(Some(status)) if !status.is_terminal() => EnqueueOutcome::AlreadyActive,
        Some(_) => {
            conn.execute(
                "UPDATE jobs SET payload = ?3, status = 'pending', attempts = 0, \
                 max_attempts = ?4, scheduled_at = ?5, updated_at = ?6, started_at = NULL, \
                 finished_at = NULL, last_error = NULL, result = NULL \
                 WHERE job_type = ?1 AND id = ?2",
                params![
                    key.job_type,
                    key.id,
                    payload_text,
                    max_attempts,
                    to_millis(scheduled_at),
                    to_millis(now)
                ],
            )?;
            EnqueueOutcome::Requeued
        }
    };
    Ok(outcome)
}

fn upsert_repeatable(
    conn: &Connection,
    spec: &RepeatSpec,
    next_fire_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<()> {
    conn.execute(
        UPSERT_REPEATABLE_SQL,
        params![
            spec.job_id,
            spec.job_type,
            spec.cron_expression,
            serde_json::to_string(&spec.payload_template)?,
            to_millis(next_fire_at),
            to_millis(now)
        ],
    )?;
    Ok(())
}

impl JobStore for SqliteJobStore {
    fn enqueue(
        &self,
        job_type: &str,
        payload: serde_json::Value,
        opts: EnqueueOptions,
    ) -> Result<Enqueued> {
        let id = opts.job_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let key = JobKey::new(job_type, id);
        let now = Utc::now();
        let scheduled_at = match opts.delay {
            Some(delay) => now + chrono::Duration::from_std(delay)?,
            None => now,
        };
        let max_attempts = opts
            .max_attempts
            .unwrap_or(self.retry_policy.max_attempts)
            .max(1);
        let payload_text = serde_json::to_string(&payload)?;

        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let outcome = enqueue_locked(&tx, &key, &payload_text, max_attempts, scheduled_at, now)?;
        tx.commit()?;

        debug!("Enqueue {} -> {}", key, outcome.as_str());
        Ok(Enqueued { key, outcome })
    }

    fn claim_next_at(&self, job_type: &str, now: DateTime<Utc>) -> Result<Option<Job>> {
        let conn = self.conn.lock().unwrap();
        let job = conn
            .query_row(
                &format!(
                    "UPDATE jobs SET status = 'running', started_at = ?2, updated_at = ?2, \
                     finished_at = NULL \
                     WHERE job_type = ?1 AND status = 'pending' AND id = ( \
                         SELECT id FROM jobs \
                         WHERE job_type = ?1 AND status = 'pending' AND scheduled_at <= ?2 \
                         ORDER BY scheduled_at ASC, created_at ASC LIMIT 1) \
                     RETURNING {}",
                    JOB_COLUMNS
                ),
                params![job_type, to_millis(now)],
                row_to_job,
            )
            .optional()?;
        Ok(job)
    }

    fn complete(&self, key: &JobKey, result: Option<&serde_json::Value>) -> Result<bool> {
        let result_text = result.map(serde_json::to_string).transpose()?;
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "UPDATE jobs SET status = 'succeeded', finished_at = ?3, updated_at = ?3, result = ?4 \
             WHERE job_type = ?1 AND id = ?2 AND status = 'running'",
            params![key.job_type, key.id, to_millis(Utc::now()), result_text],
        )?;
        Ok(changed == 1)
    }

    fn fail_at(
        &self,
        key: &JobKey,
        failure: &JobFailure,
        now: DateTime<Utc>,
    ) -> Result<FailOutcome> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let outcome = fail_locked(&tx, &self.retry_policy, key, failure, now)?;
        tx.commit()?;
        Ok(outcome)
    }

    fn get_job(&self, key: &JobKey) -> Result<Option<Job>> {
        let conn = self.conn.lock().unwrap();
        let job = conn
            .query_row(
                &format!(
                    "SELECT {} FROM jobs WHERE job_type = ?1 AND id = ?2",
                    JOB_COLUMNS
                ),
                params![key.job_type, key.id],
                row_to_job,
            )
            .optional()?;
        Ok(job)
    }

    fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<Job>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM jobs \
             WHERE (?1 IS NULL OR status = ?1) AND (?2 IS NULL OR job_type = ?2) \
             ORDER BY updated_at DESC LIMIT ?3",
            JOB_COLUMNS
        ))?;
        let jobs = stmt
            .query_map(
                params![
                    filter.status.map(|s| s.as_str()),
                    filter.job_type.as_deref(),
                    filter.limit as i64
                ],
                row_to_job,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(jobs)
    }

    fn stats(&self) -> Result<JobStats> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM jobs GROUP BY status")?;
        let rows = stmt.query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?)))?;

        let mut stats = JobStats::default();
        for row in rows {
            let (status, count) = row?;
            let count = count as usize;
            match JobStatus::parse(&status) {
                Some(JobStatus::Pending) => stats.pending = count,
                Some(JobStatus::Running) => stats.running = count,
                Some(JobStatus::Succeeded) => stats.succeeded = count,
                Some(JobStatus::Failed) => stats.failed = count,
                None => warn!("Ignoring jobs with unknown status '{}'", status),
            }
        }
        Ok(stats)
    }

    fn recover_interrupted(&self, started_before: DateTime<Utc>) -> Result<usize> {
        let now = Utc::now();
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let keys: Vec<JobKey> = {
            let mut stmt = tx.prepare(
                "SELECT job_type, id FROM jobs WHERE status = 'running' AND started_at < ?1",
            )?;
            let rows = stmt.query_map(params![to_millis(started_before)], |r| {
                Ok(JobKey::new(r.get::<_, String>(0)?, r.get::<_, String>(1)?))
            })?;
            rows.collect::<Result<Vec<_>, _>>()?
        };

        let failure = JobFailure::transient("interrupted before completion");
        for key in &keys {
            let outcome = fail_locked(&tx, &self.retry_policy, key, &failure, now)?;
            info!("Recovered interrupted job {}: {:?}", key, outcome);
        }
        tx.commit()?;
        Ok(keys.len())
    }

    fn prune_finished(
        &self,
        succeeded_before: DateTime<Utc>,
        failed_before: DateTime<Utc>,
    ) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let succeeded = conn.execute(
            "DELETE FROM jobs WHERE status = 'succeeded' AND finished_at < ?1",
            params![to_millis(succeeded_before)],
        )?;
        let failed = conn.execute(
            "DELETE FROM jobs WHERE status = 'failed' AND finished_at < ?1",
            params![to_millis(failed_before)],
        )?;
        Ok(succeeded + failed)
    }

    fn retry_failed(&self, key: &JobKey) -> Result<bool> {
        let now_ms = to_millis(Utc::now());
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "UPDATE jobs SET status = 'pending', attempts = 0, scheduled_at = ?3, \
             updated_at = ?3, started_at = NULL, finished_at = NULL \
             WHERE job_type = ?1 AND id = ?2 AND status = 'failed'",
            params![key.job_type, key.id, now_ms],
        )?;
        Ok(changed == 1)
    }

    fn register_repeatable(
        &self,
        spec: &RepeatSpec,
        next_fire_at: DateTime<Utc>,
    ) -> Result<String> {
        let conn = self.conn.lock().unwrap();
        upsert_repeatable(&conn, spec, next_fire_at, Utc::now())?;
        Ok(spec.job_id.clone())
    }

    fn replace_repeatables(
        &self,
        specs: &[(RepeatSpec, DateTime<Utc>)],
    ) -> Result<ReplaceSummary> {
        let now = Utc::now();
        let wanted: HashSet<&str> = specs.iter().map(|(s, _)| s.job_id.as_str()).collect();

        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let existing: Vec<String> = {
            let mut stmt = tx.prepare("SELECT job_id FROM repeat_specs")?;
            let rows = stmt.query_map([], |r| r.get::<_, String>(0))?;
            rows.collect::<Result<Vec<_>, _>>()?
        };

        let mut removed = Vec::new();
        for job_id in existing {
            if !wanted.contains(job_id.as_str()) {
                tx.execute(
                    "DELETE FROM repeat_specs WHERE job_id = ?1",
                    params![job_id],
                )?;
                removed.push(job_id);
            }
        }

        for (spec, next_fire_at) in specs {
            upsert_repeatable(&tx, spec, *next_fire_at, now)?;
        }
        tx.commit()?;

        Ok(ReplaceSummary {
            registered: wanted.len(),
            removed,
        })
    }

    fn remove_repeatable(&self, job_id: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "DELETE FROM repeat_specs WHERE job_id = ?1",
            params![job_id],
        )?;
        Ok(changed > 0)
    }

    fn list_repeatables(&self) -> Result<Vec<RegisteredRepeatable>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM repeat_specs ORDER BY job_id",
            REPEATABLE_COLUMNS
        ))?;
        let specs = stmt
            .query_map([], row_to_repeatable)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(specs)
    }

    fn due_repeatables(&self, now: DateTime<Utc>) -> Result<Vec<RegisteredRepeatable>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM repeat_specs WHERE next_fire_at <= ?1 ORDER BY next_fire_at",
            REPEATABLE_COLUMNS
        ))?;
        let specs = stmt
            .query_map(params![to_millis(now)], row_to_repeatable)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(specs)
    }

    fn fire_repeatable(
        &self,
        spec: &RepeatSpec,
        expected: DateTime<Utc>,
        next: DateTime<Utc>,
    ) -> Result<Option<Enqueued>> {
        let key = JobKey::new(spec.job_type.clone(), spec.job_id.clone());
        let payload_text = serde_json::to_string(&spec.payload_template)?;
        let now = Utc::now();

        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let advanced = tx.execute(
            "UPDATE repeat_specs SET next_fire_at = ?3 WHERE job_id = ?1 AND next_fire_at = ?2",
            params![spec.job_id, to_millis(expected), to_millis(next)],
        )?;
        if advanced != 1 {
            return Ok(None);
        }
        let outcome = enqueue_locked(
            &tx,
            &key,
            &payload_text,
            self.retry_policy.max_attempts.max(1),
            now,
            now,
        )?;
        tx.commit()?;

        Ok(Some(Enqueued { key, outcome }))
    }

    fn next_repeatable_fire_at(&self) -> Result<Option<DateTime<Utc>>> {
        let conn = self.conn.lock().unwrap();
        let min: Option<i64> =
            conn.query_row("SELECT MIN(next_fire_at) FROM repeat_specs", [], |r| {
                r.get(0)
            })?;
        Ok(min.and_then(DateTime::from_timestamp_millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;
    use std::sync::Barrier;
    use std::thread;
    use std::time::Duration;
    use tempfile::TempDir;

    fn test_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            initial_backoff_ms: 1000,
            max_backoff_ms: 600_000,
            backoff_multiplier: 2.0,
            jitter_ratio: 0.0,
        }
    }

    fn store() -> SqliteJobStore {
        SqliteJobStore::in_memory(test_policy()).unwrap()
    }

    fn later() -> DateTime<Utc> {
        Utc::now() + chrono::Duration::hours(1)
    }

    // =========================================================================
    // Enqueue
    // =========================================================================

    #[test]
    fn test_enqueue_and_get() {
        let store = store();
        let enqueued = store
            .enqueue("import.recipe", json!({"source_id": "52772"}), EnqueueOptions::default())
            .unwrap();
        assert_eq!(enqueued.outcome, EnqueueOutcome::Created);

        let job = store.get_job(&enqueued.key).unwrap().unwrap();
        assert_eq!(job.job_type, "import.recipe");
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.attempts, 0);
        assert_eq!(job.max_attempts, 3);
        assert_eq!(job.payload, json!({"source_id": "52772"}));
        assert!(job.last_error.is_none());
        assert!(Uuid::parse_str(&job.id).is_ok());
    }

    #[test]
    fn test_enqueue_explicit_id_is_noop_while_active() {
        let store = store();
        let first = store
            .enqueue("t", json!({"v": 1}), EnqueueOptions::with_id("daily"))
            .unwrap();
        let second = store
            .enqueue("t", json!({"v": 2}), EnqueueOptions::with_id("daily"))
            .unwrap();

        assert_eq!(first.outcome, EnqueueOutcome::Created);
        assert_eq!(second.outcome, EnqueueOutcome::AlreadyActive);
        assert_eq!(first.key, second.key);

        // Still active while running.
        store.claim_next("t").unwrap().unwrap();
        let third = store
            .enqueue("t", json!({"v": 3}), EnqueueOptions::with_id("daily"))
            .unwrap();
        assert_eq!(third.outcome, EnqueueOutcome::AlreadyActive);

        let job = store.get_job(&first.key).unwrap().unwrap();
        assert_eq!(job.payload, json!({"v": 1}));
        assert_eq!(job.status, JobStatus::Running);
    }

    #[test]
    fn test_enqueue_requeues_settled_job() {
        let store = store();
        let key = store
            .enqueue("t", json!({}), EnqueueOptions::with_id("daily"))
            .unwrap()
            .key;
        store.claim_next("t").unwrap().unwrap();
        assert!(store.complete(&key, Some(&json!({"ok": true}))).unwrap());

        let again = store
            .enqueue("t", json!({"run": 2}), EnqueueOptions::with_id("daily"))
            .unwrap();
        assert_eq!(again.outcome, EnqueueOutcome::Requeued);

        let job = store.get_job(&key).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.payload, json!({"run": 2}));
        assert!(job.result.is_none());
        assert!(job.finished_at.is_none());
    }

    #[test]
    fn test_same_id_different_types_are_distinct() {
        let store = store();
        let a = store
            .enqueue("a", json!({}), EnqueueOptions::with_id("x"))
            .unwrap();
        let b = store
            .enqueue("b", json!({}), EnqueueOptions::with_id("x"))
            .unwrap();
        assert_eq!(a.outcome, EnqueueOutcome::Created);
        assert_eq!(b.outcome, EnqueueOutcome::Created);
        assert_eq!(store.stats().unwrap().pending, 2);
    }

    // =========================================================================
    // Claim
    // =========================================================================

    #[test]
    fn test_claim_empty_returns_none() {
        let store = store();
        assert!(store.claim_next("t").unwrap().is_none());
    }

    #[test]
    fn test_claim_respects_scheduled_at() {
        let store = store();
        store
            .enqueue(
                "t",
                json!({}),
                EnqueueOptions::default().delay(Duration::from_secs(60)),
            )
            .unwrap();

        assert!(store.claim_next("t").unwrap().is_none());
        let claimed = store.claim_next_at("t", later()).unwrap().unwrap();
        assert_eq!(claimed.status, JobStatus::Running);
        assert!(claimed.started_at.is_some());
    }

    #[test]
    fn test_claim_only_matching_type() {
        let store = store();
        store
            .enqueue("other", json!({}), EnqueueOptions::default())
            .unwrap();
        assert!(store.claim_next("t").unwrap().is_none());
        assert!(store.claim_next("other").unwrap().is_some());
    }

    #[test]
    fn test_claim_oldest_scheduled_first() {
        let store = store();
        store
            .enqueue(
                "t",
                json!({}),
                EnqueueOptions::with_id("late").delay(Duration::from_secs(30)),
            )
            .unwrap();
        store
            .enqueue("t", json!({}), EnqueueOptions::with_id("early"))
            .unwrap();

        let first = store.claim_next_at("t", later()).unwrap().unwrap();
        let second = store.claim_next_at("t", later()).unwrap().unwrap();
        assert_eq!(first.id, "early");
        assert_eq!(second.id, "late");
        assert!(store.claim_next_at("t", later()).unwrap().is_none());
    }

    #[test]
    fn test_claim_is_exclusive_across_threads() {
        let store = Arc::new(store());
        store
            .enqueue("t", json!({}), EnqueueOptions::with_id("only"))
            .unwrap();

        let workers = 16;
        let barrier = Arc::new(Barrier::new(workers));
        let handles: Vec<_> = (0..workers)
            .map(|_| {
                let store = store.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    store.claim_next("t").unwrap()
                })
            })
            .collect();

        let claimed: Vec<Job> = handles
            .into_iter()
            .filter_map(|h| h.join().unwrap())
            .collect();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].id, "only");
    }

    // =========================================================================
    // Complete / Fail
    // =========================================================================

    #[test]
    fn test_complete_requires_running() {
        let store = store();
        let key = store
            .enqueue("t", json!({}), EnqueueOptions::default())
            .unwrap()
            .key;

        assert!(!store.complete(&key, None).unwrap());
        store.claim_next("t").unwrap().unwrap();
        assert!(store.complete(&key, Some(&json!({"n": 1}))).unwrap());
        assert!(!store.complete(&key, None).unwrap());

        let job = store.get_job(&key).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Succeeded);
        assert_eq!(job.result, Some(json!({"n": 1})));
        assert!(job.finished_at.is_some());
    }

    #[test]
    fn test_fail_retries_with_increasing_delay_then_settles() {
        let store = store();
        let key = store
            .enqueue("t", json!({}), EnqueueOptions::default().max_attempts(4))
            .unwrap()
            .key;

        let mut now = Utc::now();
        let mut delays = Vec::new();
        let failure = JobFailure::transient("connection reset");

        for attempt in 1..=3 {
            let claimed = store.claim_next_at("t", now).unwrap().unwrap();
            assert_eq!(claimed.attempts, attempt - 1);

            match store.fail_at(&key, &failure, now).unwrap() {
                FailOutcome::Retrying {
                    attempts,
                    next_run_at,
                } => {
                    assert_eq!(attempts, attempt);
                    delays.push(next_run_at - now);
                    // Not claimable before the backoff elapses.
                    assert!(store.claim_next_at("t", now).unwrap().is_none());
                    now = next_run_at;
                }
                other => panic!("expected retry, got {:?}", other),
            }
        }
        assert!(delays.windows(2).all(|w| w[0] < w[1]), "{:?}", delays);

        store.claim_next_at("t", now).unwrap().unwrap();
        assert_eq!(
            store.fail_at(&key, &failure, now).unwrap(),
            FailOutcome::Failed { attempts: 4 }
        );

        let job = store.get_job(&key).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.attempts, 4);
        assert_eq!(job.last_error.as_deref(), Some("transient: connection reset"));
        assert!(store.claim_next_at("t", later()).unwrap().is_none());
    }

    #[test]
    fn test_permanent_failure_settles_immediately() {
        let store = store();
        let key = store
            .enqueue("t", json!({}), EnqueueOptions::default())
            .unwrap()
            .key;
        store.claim_next("t").unwrap().unwrap();

        let outcome = store
            .fail(&key, &JobFailure::permanent("missing contact"))
            .unwrap();
        assert_eq!(outcome, FailOutcome::Failed { attempts: 1 });
        assert!(store.claim_next_at("t", later()).unwrap().is_none());
    }

    #[test]
    fn test_fail_not_running_is_noop() {
        let store = store();
        let key = store
            .enqueue("t", json!({}), EnqueueOptions::default())
            .unwrap()
            .key;
        assert_eq!(
            store.fail(&key, &JobFailure::transient("x")).unwrap(),
            FailOutcome::NotRunning
        );
        assert_eq!(
            store
                .fail(&JobKey::new("t", "missing"), &JobFailure::transient("x"))
                .unwrap(),
            FailOutcome::NotRunning
        );
        assert_eq!(store.get_job(&key).unwrap().unwrap().attempts, 0);
    }

    // =========================================================================
    // Recovery / maintenance
    // =========================================================================

    #[test]
    fn test_recover_interrupted_jobs() {
        let store = store();
        let key = store
            .enqueue("t", json!({}), EnqueueOptions::default())
            .unwrap()
            .key;
        store.claim_next("t").unwrap().unwrap();

        let recovered = store
            .recover_interrupted(Utc::now() + chrono::Duration::seconds(1))
            .unwrap();
        assert_eq!(recovered, 1);

        let job = store.get_job(&key).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.attempts, 1);
        assert!(job.last_error.unwrap().contains("interrupted"));
    }

    #[test]
    fn test_recover_ignores_jobs_started_after_cutoff() {
        let store = store();
        store
            .enqueue("t", json!({}), EnqueueOptions::default())
            .unwrap();
        store.claim_next("t").unwrap().unwrap();

        let cutoff = Utc::now() - chrono::Duration::minutes(5);
        assert_eq!(store.recover_interrupted(cutoff).unwrap(), 0);
        assert_eq!(store.stats().unwrap().running, 1);
    }

    #[test]
    fn test_prune_finished() {
        let store = store();
        let done = store
            .enqueue("t", json!({}), EnqueueOptions::with_id("done"))
            .unwrap()
            .key;
        store.claim_next("t").unwrap().unwrap();
        store.complete(&done, None).unwrap();

        let dead = store
            .enqueue("t", json!({}), EnqueueOptions::with_id("dead"))
            .unwrap()
            .key;
        store.claim_next("t").unwrap().unwrap();
        store.fail(&dead, &JobFailure::permanent("gone")).unwrap();

        store
            .enqueue("t", json!({}), EnqueueOptions::with_id("waiting"))
            .unwrap();

        // Failed jobs have a longer retention window.
        let pruned = store
            .prune_finished(later(), Utc::now() - chrono::Duration::days(1))
            .unwrap();
        assert_eq!(pruned, 1);
        assert!(store.get_job(&done).unwrap().is_none());
        assert!(store.get_job(&dead).unwrap().is_some());
        assert_eq!(store.stats().unwrap().pending, 1);
    }

    #[test]
    fn test_retry_failed_resets_attempts() {
        let store = store();
        let key = store
            .enqueue("t", json!({}), EnqueueOptions::default())
            .unwrap()
            .key;
        store.claim_next("t").unwrap().unwrap();
        store.fail(&key, &JobFailure::permanent("nope")).unwrap();

        assert!(store.retry_failed(&key).unwrap());
        let job = store.get_job(&key).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.attempts, 0);
        assert!(!store.retry_failed(&key).unwrap());
    }

    #[test]
    fn test_list_jobs_and_stats() {
        let store = store();
        store.enqueue("a", json!({}), EnqueueOptions::default()).unwrap();
        store.enqueue("a", json!({}), EnqueueOptions::default()).unwrap();
        store.enqueue("b", json!({}), EnqueueOptions::default()).unwrap();
        store.claim_next("b").unwrap().unwrap();

        let pending_a = store
            .list_jobs(&JobFilter {
                status: Some(JobStatus::Pending),
                job_type: Some("a".to_string()),
                limit: 10,
            })
            .unwrap();
        assert_eq!(pending_a.len(), 2);

        let all = store.list_jobs(&JobFilter::default()).unwrap();
        assert_eq!(all.len(), 3);

        let stats = store.stats().unwrap();
        assert_eq!(
            stats,
            JobStats {
                pending: 2,
                running: 1,
                succeeded: 0,
                failed: 0
            }
        );
    }

    // =========================================================================
    // Repeatables
    // =========================================================================

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2030, 1, 1, h, m, 0).unwrap()
    }

    fn trending_spec(cron: &str) -> RepeatSpec {
        RepeatSpec::new(
            "daily-trending",
            "trending.aggregate",
            cron,
            json!({"window_days": 7}),
        )
    }

    #[test]
    fn test_register_repeatable_upserts_by_job_id() {
        let store = store();
        store
            .register_repeatable(&trending_spec("0 0 * * *"), at(0, 0))
            .unwrap();
        store
            .register_repeatable(&trending_spec("0 0 * * *"), at(0, 0))
            .unwrap();

        let specs = store.list_repeatables().unwrap();
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].spec.cron_expression, "0 0 * * *");
    }

    #[test]
    fn test_reregister_unchanged_cron_keeps_next_fire() {
        let store = store();
        store
            .register_repeatable(&trending_spec("0 0 * * *"), at(0, 0))
            .unwrap();
        store
            .register_repeatable(&trending_spec("0 0 * * *"), at(23, 0))
            .unwrap();
        assert_eq!(store.list_repeatables().unwrap()[0].next_fire_at, at(0, 0));

        // A changed expression takes the new firing time.
        store
            .register_repeatable(&trending_spec("0 6 * * *"), at(6, 0))
            .unwrap();
        let specs = store.list_repeatables().unwrap();
        assert_eq!(specs[0].next_fire_at, at(6, 0));
        assert_eq!(specs[0].spec.cron_expression, "0 6 * * *");
    }

    #[test]
    fn test_replace_repeatables_drops_stale_specs() {
        let store = store();
        store
            .register_repeatable(
                &RepeatSpec::new("old-job", "legacy", "* * * * *", json!(null)),
                at(0, 0),
            )
            .unwrap();

        let summary = store
            .replace_repeatables(&[(trending_spec("0 0 * * *"), at(0, 0))])
            .unwrap();
        assert_eq!(summary.registered, 1);
        assert_eq!(summary.removed, vec!["old-job".to_string()]);

        let specs = store.list_repeatables().unwrap();
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].spec.job_id, "daily-trending");
        assert_eq!(specs[0].spec.payload_template, json!({"window_days": 7}));
    }

    #[test]
    fn test_due_and_fire_repeatable() {
        let store = store();
        let spec = trending_spec("0 0 * * *");
        store.register_repeatable(&spec, at(0, 0)).unwrap();

        assert!(store.due_repeatables(at(0, 0) - chrono::Duration::seconds(1))
            .unwrap()
            .is_empty());
        let due = store.due_repeatables(at(0, 1)).unwrap();
        assert_eq!(due.len(), 1);

        let next = at(0, 0) + chrono::Duration::days(1);
        let fired = store
            .fire_repeatable(&spec, at(0, 0), next)
            .unwrap()
            .unwrap();
        assert_eq!(fired.key, JobKey::new("trending.aggregate", "daily-trending"));
        assert_eq!(fired.outcome, EnqueueOutcome::Created);
        let job = store.get_job(&fired.key).unwrap().unwrap();
        assert_eq!(job.payload, json!({"window_days": 7}));

        // A second firing of the same tick loses the race and enqueues nothing.
        assert!(store.fire_repeatable(&spec, at(0, 0), next).unwrap().is_none());
        assert_eq!(store.stats().unwrap().pending, 1);
        assert_eq!(store.next_repeatable_fire_at().unwrap(), Some(next));
    }

    #[test]
    fn test_failed_firing_keeps_the_tick() {
        let store = store();
        let spec = trending_spec("0 0 * * *");
        store.register_repeatable(&spec, at(0, 0)).unwrap();
        store
            .conn
            .lock()
            .unwrap()
            .execute("DROP TABLE jobs", [])
            .unwrap();

        let next = at(0, 0) + chrono::Duration::days(1);
        assert!(store.fire_repeatable(&spec, at(0, 0), next).is_err());
        assert_eq!(store.next_repeatable_fire_at().unwrap(), Some(at(0, 0)));
    }

    #[test]
    fn test_remove_repeatable() {
        let store = store();
        store
            .register_repeatable(&trending_spec("0 0 * * *"), at(0, 0))
            .unwrap();
        assert!(store.remove_repeatable("daily-trending").unwrap());
        assert!(!store.remove_repeatable("daily-trending").unwrap());
        assert_eq!(store.next_repeatable_fire_at().unwrap(), None);
    }

    // =========================================================================
    // Persistence
    // =========================================================================

    #[test]
    fn test_jobs_survive_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("jobs.db");

        let key = {
            let store = SqliteJobStore::new(&path, test_policy()).unwrap();
            store
                .register_repeatable(&trending_spec("0 0 * * *"), at(0, 0))
                .unwrap();
            store
                .enqueue("t", json!({"a": 1}), EnqueueOptions::default())
                .unwrap()
                .key
        };

        let store = SqliteJobStore::new(&path, test_policy()).unwrap();
        let job = store.get_job(&key).unwrap().unwrap();
        assert_eq!(job.payload, json!({"a": 1}));
        assert_eq!(store.list_repeatables().unwrap().len(), 1);
    }
}
