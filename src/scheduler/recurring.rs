//! Recurring job registration and the cron ticker.

use super::cron::CronExpression;
use crate::job_store::{EnqueueOutcome, JobKey, JobStore, RepeatSpec, ReplaceSummary};
use crate::job_types;
use crate::metrics;
use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// One enqueue performed by the ticker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Firing {
    pub job_id: String,
    pub key: JobKey,
    pub outcome: EnqueueOutcome,
    pub scheduled_for: DateTime<Utc>,
}

/// Keeps recurring specs in the job store and turns their cron ticks into jobs.
///
/// Each spec fires with its `job_id` as the job identity, so a firing whose
/// previous run is still pending or running collapses into that run.
pub struct RecurringScheduler {
    job_store: Arc<dyn JobStore>,
    wake: Notify,
    max_tick_interval: Duration,
}

impl RecurringScheduler {
    pub fn new(job_store: Arc<dyn JobStore>, max_tick_interval: Duration) -> Self {
        Self {
            job_store,
            wake: Notify::new(),
            max_tick_interval,
        }
    }

    /// Replace the registered specs with `specs`: stale specs are dropped and
    /// the rest upserted by `job_id`, atomically. Safe to call on every boot.
    pub fn schedule(&self, specs: &[RepeatSpec]) -> Result<ReplaceSummary> {
        self.schedule_at(specs, Utc::now())
    }

    /// `schedule` on the blocking pool, for async callers.
    pub async fn schedule_async(self: &Arc<Self>, specs: &[RepeatSpec]) -> Result<ReplaceSummary> {
        let scheduler = Arc::clone(self);
        let specs = specs.to_vec();
        tokio::task::spawn_blocking(move || scheduler.schedule(&specs))
            .await
            .context("Scheduler registration task panicked")?
    }

    pub fn schedule_at(&self, specs: &[RepeatSpec], now: DateTime<Utc>) -> Result<ReplaceSummary> {
        validate_recurring(specs)?;

        let mut resolved = Vec::with_capacity(specs.len());
        for spec in specs {
            let next_fire_at = first_fire_after(spec, now)?;
            resolved.push((spec.clone(), next_fire_at));
        }

        let summary = self.job_store.replace_repeatables(&resolved)?;
        for job_id in &summary.removed {
            info!("Removed stale recurring job '{}'", job_id);
        }
        info!("Registered {} recurring jobs", summary.registered);

        self.wake.notify_one();
        Ok(summary)
    }

    /// Enqueue a job for every spec whose firing time has come.
    ///
    /// Advancing `next_fire_at` is a compare-and-swap committed together with
    /// the enqueue, so concurrent callers fire a tick once and a failed
    /// enqueue leaves the tick due.
    pub fn fire_due(&self, now: DateTime<Utc>) -> Result<Vec<Firing>> {
        let mut firings = Vec::new();

        for registered in self.job_store.due_repeatables(now)? {
            let spec = &registered.spec;
            let cron = match CronExpression::parse(&spec.cron_expression) {
                Ok(cron) => cron,
                Err(e) => {
                    warn!(
                        "Dropping recurring job '{}' with invalid cron '{}': {}",
                        spec.job_id, spec.cron_expression, e
                    );
                    self.job_store.remove_repeatable(&spec.job_id)?;
                    continue;
                }
            };

            // Missed ticks are not replayed: the next firing is computed from now.
            let Some(next_fire_at) = cron.next_after(now) else {
                warn!(
                    "Recurring job '{}' has no future firing, removing it",
                    spec.job_id
                );
                self.job_store.remove_repeatable(&spec.job_id)?;
                continue;
            };

            let Some(enqueued) =
                self.job_store
                    .fire_repeatable(spec, registered.next_fire_at, next_fire_at)?
            else {
                debug!("Tick for '{}' already fired elsewhere", spec.job_id);
                continue;
            };
            metrics::record_scheduler_firing(&spec.job_id, enqueued.outcome.as_str());

            match enqueued.outcome {
                EnqueueOutcome::AlreadyActive => info!(
                    "Recurring job '{}' still active, skipping this tick",
                    spec.job_id
                ),
                _ => info!(
                    "Fired recurring job '{}' ({}), next at {}",
                    spec.job_id, spec.job_type, next_fire_at
                ),
            }

            firings.push(Firing {
                job_id: spec.job_id.clone(),
                key: enqueued.key,
                outcome: enqueued.outcome,
                scheduled_for: registered.next_fire_at,
            });
        }
        Ok(firings)
    }

    /// Time to sleep before the next firing, capped at the max tick interval.
    fn time_until_next_fire(&self, now: DateTime<Utc>) -> Duration {
        match self.job_store.next_repeatable_fire_at() {
            Ok(Some(next)) => (next - now)
                .to_std()
                .unwrap_or(Duration::ZERO)
                .min(self.max_tick_interval),
            Ok(None) => self.max_tick_interval,
            Err(e) => {
                warn!("Failed to read next firing time: {}", e);
                self.max_tick_interval
            }
        }
    }

    /// Fire due specs and work out how long to sleep. Blocks on the store.
    fn tick(&self) -> Duration {
        if let Err(e) = self.fire_due(Utc::now()) {
            error!("Failed to fire recurring jobs: {:#}", e);
        }
        self.time_until_next_fire(Utc::now())
    }

    /// Ticker loop. Runs until `shutdown` is cancelled.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        info!("Recurring scheduler started");

        loop {
            let scheduler = Arc::clone(&self);
            let sleep_for = match tokio::task::spawn_blocking(move || scheduler.tick()).await {
                Ok(sleep_for) => sleep_for,
                Err(e) => {
                    error!("Scheduler tick panicked: {}", e);
                    self.max_tick_interval
                }
            };
            debug!("Scheduler sleeping for {:?}", sleep_for);

            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Recurring scheduler shutting down");
                    break;
                }
                _ = self.wake.notified() => {
                    debug!("Scheduler woken by registration change");
                }
                _ = tokio::time::sleep(sleep_for) => {}
            }
        }
    }
}

/// Check a recurring set before anything is written: unique non-empty ids,
/// known job types and parseable cron expressions.
pub fn validate_recurring(specs: &[RepeatSpec]) -> Result<()> {
    let mut seen = HashSet::new();
    for spec in specs {
        if spec.job_id.trim().is_empty() {
            bail!("Recurring job with empty job_id");
        }
        if !seen.insert(spec.job_id.as_str()) {
            bail!("Duplicate recurring job_id '{}'", spec.job_id);
        }
        if !job_types::ALL.contains(&spec.job_type.as_str()) {
            bail!(
                "Recurring job '{}' has unknown job_type '{}'",
                spec.job_id,
                spec.job_type
            );
        }
        CronExpression::parse(&spec.cron_expression).with_context(|| {
            format!(
                "Invalid cron expression for recurring job '{}'",
                spec.job_id
            )
        })?;
    }
    Ok(())
}

fn first_fire_after(spec: &RepeatSpec, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
    let cron = CronExpression::parse(&spec.cron_expression).with_context(|| {
        format!(
            "Invalid cron expression '{}' for recurring job '{}'",
            spec.cron_expression, spec.job_id
        )
    })?;
    cron.next_after(now).ok_or_else(|| {
        anyhow!(
            "Cron expression '{}' for recurring job '{}' never fires",
            spec.cron_expression,
            spec.job_id
        )
    })
}
