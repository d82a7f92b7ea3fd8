//! Trending items: windowed weighted ranking published as versioned snapshots.

mod aggregator;
mod cache;
mod ranking;

pub use aggregator::TrendingAggregator;
pub use cache::{TrendingCache, TrendingSnapshot, TrendingStatus};
pub use ranking::{rank_from_store, rank_trending, ScoreWeights, TrendingEntry};
