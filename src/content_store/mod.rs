//! Relational content: catalog items, users, activity events and imported recipes.

mod models;
mod schema;
mod sqlite_content_store;

pub use models::{
    CatalogItem, EventAggregate, EventKind, Ingredient, RecipeDraft, StoredRecipe,
};
pub use schema::CONTENT_VERSIONED_SCHEMAS;
pub use sqlite_content_store::SqliteContentStore;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::sync::Arc;

pub trait ContentStore: Send + Sync {
    /// Per-item counts of events of `kind` created strictly after `since`.
    fn query_events(&self, kind: EventKind, since: DateTime<Utc>) -> Result<Vec<EventAggregate>>;

    fn catalog_items(&self) -> Result<Vec<CatalogItem>>;

    /// Insert or update the recipe imported by `user_id` from `source_id`.
    /// Returns the record id, stable across repeated imports.
    fn upsert_recipe(&self, source_id: &str, user_id: &str, recipe: &RecipeDraft) -> Result<i64>;

    fn get_recipe(&self, user_id: &str, source_id: &str) -> Result<Option<StoredRecipe>>;

    /// Email address of a user, if they have a usable one.
    fn find_user_contact(&self, user_id: &str) -> Result<Option<String>>;

    /// Ids of every user with a contact address, sorted.
    fn list_recipient_ids(&self) -> Result<Vec<String>>;
}

/// Run a blocking content store call off the async runtime.
pub(crate) async fn with_content_store<T, F>(store: &Arc<dyn ContentStore>, f: F) -> Result<T>
where
    F: FnOnce(&dyn ContentStore) -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    let store = Arc::clone(store);
    tokio::task::spawn_blocking(move || f(store.as_ref()))
        .await
        .context("Content store task panicked")?
}
