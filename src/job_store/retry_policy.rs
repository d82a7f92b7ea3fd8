//! Retry policy for failed jobs.
//!
//! Implements capped exponential backoff with optional jitter.

use crate::config::RetrySettings;
use crate::job_store::JobFailure;
use rand::Rng;
use std::time::Duration;

/// Retry policy implementing exponential backoff.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Default attempt budget for jobs enqueued without an explicit one.
    pub max_attempts: u32,
    /// Delay after the first failed attempt.
    pub initial_backoff_ms: u64,
    /// Cap for exponential growth.
    pub max_backoff_ms: u64,
    /// Multiplier applied to the delay after each failed attempt.
    pub backoff_multiplier: f64,
    /// Upper bound of the random extra delay, as a fraction of the delay.
    pub jitter_ratio: f64,
}

impl RetryPolicy {
    /// Create a new RetryPolicy from configuration settings.
    pub fn new(settings: &RetrySettings) -> Self {
        Self {
            max_attempts: settings.max_attempts,
            initial_backoff_ms: settings.initial_backoff_ms,
            max_backoff_ms: settings.max_backoff_ms,
            backoff_multiplier: settings.multiplier,
            jitter_ratio: settings.jitter_ratio,
        }
    }

    /// Delay before the next attempt, after `attempts` failed attempts (>= 1).
    ///
    /// `initial * multiplier^(attempts - 1) * (1 + jitter)`, capped at `max_backoff_ms`.
    pub fn backoff(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1).min(i32::MAX as u32) as i32;
        let base = self.initial_backoff_ms as f64 * self.backoff_multiplier.powi(exponent);
        let jitter = if self.jitter_ratio > 0.0 {
            rand::rng().random_range(0.0..self.jitter_ratio)
        } else {
            0.0
        };
        let delay_ms = (base * (1.0 + jitter)).min(self.max_backoff_ms as f64);
        Duration::from_millis(delay_ms as u64)
    }

    /// Whether a job that just failed its `attempts`-th attempt with `failure`
    /// goes back to pending.
    pub fn should_retry(&self, failure: &JobFailure, attempts: u32, max_attempts: u32) -> bool {
        failure.is_retryable() && attempts < max_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(&RetrySettings::default())
    }
}
