use crate::metrics;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Started and busy worker counts for one job type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WorkerCounts {
    pub registered: usize,
    pub busy: usize,
}

/// Process-local view of the worker pools, mirrored to Prometheus gauges.
#[derive(Debug, Default)]
pub struct WorkerRegistry {
    counts: Mutex<HashMap<String, WorkerCounts>>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_registered(&self, job_type: &str) -> bool {
        self.counts(job_type).registered > 0
    }

    pub(crate) fn add_workers(&self, job_type: &str, count: usize) {
        let mut counts = self.counts.lock().unwrap();
        let entry = counts.entry(job_type.to_string()).or_default();
        entry.registered += count;
        metrics::set_workers_registered(job_type, entry.registered);
    }

    pub(crate) fn remove_worker(&self, job_type: &str) {
        let mut counts = self.counts.lock().unwrap();
        if let Some(entry) = counts.get_mut(job_type) {
            entry.registered = entry.registered.saturating_sub(1);
            metrics::set_workers_registered(job_type, entry.registered);
        }
    }

    /// Mark one worker of `job_type` busy until the guard is dropped.
    pub(crate) fn mark_busy(self: &Arc<Self>, job_type: &str) -> BusyGuard {
        self.update_busy(job_type, |busy| busy + 1);
        BusyGuard {
            registry: Arc::clone(self),
            job_type: job_type.to_string(),
        }
    }

    fn update_busy(&self, job_type: &str, f: impl FnOnce(usize) -> usize) {
        let mut counts = self.counts.lock().unwrap();
        let entry = counts.entry(job_type.to_string()).or_default();
        entry.busy = f(entry.busy);
        metrics::set_workers_busy(job_type, entry.busy);
    }

    pub fn counts(&self, job_type: &str) -> WorkerCounts {
        self.counts
            .lock()
            .unwrap()
            .get(job_type)
            .copied()
            .unwrap_or_default()
    }

    /// Counts for every known job type, sorted by type.
    pub fn snapshot(&self) -> Vec<(String, WorkerCounts)> {
        let mut all: Vec<_> = self
            .counts
            .lock()
            .unwrap()
            .iter()
            .map(|(job_type, counts)| (job_type.clone(), *counts))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }
}

pub(crate) struct BusyGuard {
    registry: Arc<WorkerRegistry>,
    job_type: String,
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.registry
            .update_busy(&self.job_type, |busy| busy.saturating_sub(1));
    }
}
