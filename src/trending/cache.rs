use super::ranking::TrendingEntry;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Arc, RwLock};

/// One published trending list. Immutable once published.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrendingSnapshot {
    /// Increases by one with every publish.
    pub version: u64,
    pub computed_at: DateTime<Utc>,
    pub window_days: u32,
    pub entries: Vec<TrendingEntry>,
}

/// What readers see.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrendingStatus {
    /// No aggregation has finished yet.
    NotComputed,
    Ready(Arc<TrendingSnapshot>),
    /// The most recent aggregation failed. `previous` is the last good
    /// snapshot, if any.
    Failed {
        error: String,
        failed_at: DateTime<Utc>,
        previous: Option<Arc<TrendingSnapshot>>,
    },
}

#[derive(Default)]
struct CacheState {
    latest: Option<Arc<TrendingSnapshot>>,
    failure: Option<(String, DateTime<Utc>)>,
}

/// Single-writer, many-reader holder of the current trending snapshot.
///
/// Publishing swaps the snapshot pointer under a write lock, so a reader sees
/// either the old list or the new one, never a mix.
#[derive(Default)]
pub struct TrendingCache {
    state: RwLock<CacheState>,
}

impl TrendingCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the published snapshot and clear any recorded failure.
    pub fn publish(
        &self,
        entries: Vec<TrendingEntry>,
        computed_at: DateTime<Utc>,
        window_days: u32,
    ) -> Arc<TrendingSnapshot> {
        let mut state = self.state.write().unwrap();
        let version = state.latest.as_ref().map_or(0, |s| s.version) + 1;
        let snapshot = Arc::new(TrendingSnapshot {
            version,
            computed_at,
            window_days,
            entries,
        });
        state.latest = Some(Arc::clone(&snapshot));
        state.failure = None;
        snapshot
    }

    /// Record a failed aggregation. The published snapshot is left in place.
    pub fn record_failure(&self, error: impl Into<String>, failed_at: DateTime<Utc>) {
        let mut state = self.state.write().unwrap();
        state.failure = Some((error.into(), failed_at));
    }

    pub fn status(&self) -> TrendingStatus {
        let state = self.state.read().unwrap();
        match (&state.failure, &state.latest) {
            (Some((error, failed_at)), previous) => TrendingStatus::Failed {
                error: error.clone(),
                failed_at: *failed_at,
                previous: previous.clone(),
            },
            (None, Some(snapshot)) => TrendingStatus::Ready(Arc::clone(snapshot)),
            (None, None) => TrendingStatus::NotComputed,
        }
    }

    /// Last successfully published snapshot, regardless of later failures.
    pub fn latest(&self) -> Option<Arc<TrendingSnapshot>> {
        self.state.read().unwrap().latest.clone()
    }
}
