use crate::content_store::{CatalogItem, ContentStore, EventAggregate, EventKind};
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::HashMap;

/// Points per event kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScoreWeights {
    pub views: u64,
    pub shares: u64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            views: 1,
            shares: 3,
        }
    }
}

impl ScoreWeights {
    pub fn score(&self, views: u64, shares: u64) -> u64 {
        views
            .saturating_mul(self.views)
            .saturating_add(shares.saturating_mul(self.shares))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrendingEntry {
    pub item_id: String,
    pub title: String,
    pub views: u64,
    pub shares: u64,
    pub score: u64,
    /// Most recent view or share in the window.
    pub last_activity_at: DateTime<Utc>,
}

fn index_by_item(aggregates: &[EventAggregate]) -> HashMap<&str, &EventAggregate> {
    aggregates
        .iter()
        .map(|a| (a.item_id.as_str(), a))
        .collect()
}

/// Rank catalog items by weighted activity.
///
/// Events are left-joined onto the catalog: items without shares still rank on
/// views, events for unknown items are dropped. Zero scores are excluded. Ties
/// go to the more recently active item, then to the smaller item id.
pub fn rank_trending(
    catalog: &[CatalogItem],
    views: &[EventAggregate],
    shares: &[EventAggregate],
    weights: ScoreWeights,
    limit: usize,
) -> Vec<TrendingEntry> {
    let views = index_by_item(views);
    let shares = index_by_item(shares);

    let mut entries: Vec<TrendingEntry> = catalog
        .iter()
        .filter_map(|item| {
            let view = views.get(item.id.as_str());
            let share = shares.get(item.id.as_str());
            let view_count = view.map_or(0, |v| v.count);
            let share_count = share.map_or(0, |s| s.count);
            let score = weights.score(view_count, share_count);
            if score == 0 {
                return None;
            }
            let last_activity_at = view
                .map(|v| v.last_event_at)
                .into_iter()
                .chain(share.map(|s| s.last_event_at))
                .max()?;
            Some(TrendingEntry {
                item_id: item.id.clone(),
                title: item.title.clone(),
                views: view_count,
                shares: share_count,
                score,
                last_activity_at,
            })
        })
        .collect();

    entries.sort_by(compare_entries);
    entries.truncate(limit);
    entries
}

fn compare_entries(a: &TrendingEntry, b: &TrendingEntry) -> Ordering {
    b.score
        .cmp(&a.score)
        .then_with(|| b.last_activity_at.cmp(&a.last_activity_at))
        .then_with(|| a.item_id.cmp(&b.item_id))
}

/// Query the store and rank the window ending at `now` in one go.
pub fn rank_from_store(
    store: &dyn ContentStore,
    weights: ScoreWeights,
    window: chrono::Duration,
    limit: usize,
    now: DateTime<Utc>,
) -> Result<Vec<TrendingEntry>> {
    let since = now - window;
    let views = store.query_events(EventKind::View, since)?;
    let shares = store.query_events(EventKind::Share, since)?;
    let catalog = store.catalog_items()?;
    Ok(rank_trending(&catalog, &views, &shares, weights, limit))
}
