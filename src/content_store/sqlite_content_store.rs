//! SQLite implementation of the content store.

use super::models::{CatalogItem, EventAggregate, EventKind, Ingredient, RecipeDraft, StoredRecipe};
use super::schema::CONTENT_VERSIONED_SCHEMAS;
use super::ContentStore;
use crate::sqlite_persistence::open_versioned;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, types::Type, Connection, OptionalExtension, Row};
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::debug;

const RECIPE_COLUMNS: &str = "id, user_id, source_id, title, category, area, instructions, \
     ingredients, tags, thumbnail_url, source_url, video_url, imported_at, updated_at";

#[derive(Clone)]
pub struct SqliteContentStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteContentStore {
    /// Opens an existing content database or creates a new one with the current schema.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = open_versioned(db_path, CONTENT_VERSIONED_SCHEMAS, "content store")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    #[cfg(test)]
    pub fn in_memory() -> Result<Self> {
        let conn = crate::sqlite_persistence::open_in_memory(CONTENT_VERSIONED_SCHEMAS)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    // =========================================================================
    // Insertion helpers
    // =========================================================================

    pub fn add_item(&self, id: &str, title: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO items (id, title, created_at) VALUES (?1, ?2, ?3) \
             ON CONFLICT(id) DO UPDATE SET title = excluded.title",
            params![id, title, Utc::now().timestamp_millis()],
        )
        .with_context(|| format!("Failed to insert item {}", id))?;
        Ok(())
    }

    pub fn add_user(&self, id: &str, display_name: Option<&str>, email: Option<&str>) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO users (id, display_name, email, created_at) VALUES (?1, ?2, ?3, ?4) \
             ON CONFLICT(id) DO UPDATE SET display_name = excluded.display_name, \
             email = excluded.email",
            params![id, display_name, email, Utc::now().timestamp_millis()],
        )
        .with_context(|| format!("Failed to insert user {}", id))?;
        Ok(())
    }

    pub fn record_event(
        &self,
        kind: EventKind,
        item_id: &str,
        user_id: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            &format!(
                "INSERT INTO {} (item_id, user_id, created_at) VALUES (?1, ?2, ?3)",
                kind.table()
            ),
            params![item_id, user_id, at.timestamp_millis()],
        )?;
        Ok(())
    }

    /// Record `count` events of `kind` for `item_id`, all at `at`.
    pub fn record_events(
        &self,
        kind: EventKind,
        item_id: &str,
        count: usize,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(&format!(
                "INSERT INTO {} (item_id, created_at) VALUES (?1, ?2)",
                kind.table()
            ))?;
            for _ in 0..count {
                stmt.execute(params![item_id, at.timestamp_millis()])?;
            }
        }
        tx.commit()?;
        Ok(())
    }
}

fn get_time(row: &Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let ms: i64 = row.get(idx)?;
    DateTime::from_timestamp_millis(ms).ok_or(rusqlite::Error::IntegralValueOutOfRange(idx, ms))
}

fn get_json_column<T: DeserializeOwned>(row: &Row, idx: usize) -> rusqlite::Result<T> {
    let text: String = row.get(idx)?;
    serde_json::from_str(&text)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn row_to_recipe(row: &Row) -> rusqlite::Result<StoredRecipe> {
    let ingredients: Vec<Ingredient> = get_json_column(row, 7)?;
    Ok(StoredRecipe {
        id: row.get(0)?,
        user_id: row.get(1)?,
        source_id: row.get(2)?,
        recipe: RecipeDraft {
            title: row.get(3)?,
            category: row.get(4)?,
            area: row.get(5)?,
            instructions: get_json_column(row, 6)?,
            ingredients,
            tags: get_json_column(row, 8)?,
            thumbnail_url: row.get(9)?,
            source_url: row.get(10)?,
            video_url: row.get(11)?,
        },
        imported_at: get_time(row, 12)?,
        updated_at: get_time(row, 13)?,
    })
}

impl ContentStore for SqliteContentStore {
    fn query_events(&self, kind: EventKind, since: DateTime<Utc>) -> Result<Vec<EventAggregate>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT item_id, COUNT(*), MAX(created_at) FROM {} \
             WHERE created_at > ?1 GROUP BY item_id ORDER BY item_id",
            kind.table()
        ))?;
        let aggregates = stmt
            .query_map(params![since.timestamp_millis()], |row| {
                Ok(EventAggregate {
                    item_id: row.get(0)?,
                    count: row.get::<_, i64>(1)? as u64,
                    last_event_at: get_time(row, 2)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        debug!(
            "Aggregated {} items from {} since {}",
            aggregates.len(),
            kind.table(),
            since
        );
        Ok(aggregates)
    }

    fn catalog_items(&self) -> Result<Vec<CatalogItem>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT id, title FROM items ORDER BY id")?;
        let items = stmt
            .query_map(params![], |row| {
                Ok(CatalogItem {
                    id: row.get(0)?,
                    title: row.get(1)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(items)
    }

    fn upsert_recipe(&self, source_id: &str, user_id: &str, recipe: &RecipeDraft) -> Result<i64> {
        let instructions = serde_json::to_string(&recipe.instructions)?;
        let ingredients = serde_json::to_string(&recipe.ingredients)?;
        let tags = serde_json::to_string(&recipe.tags)?;
        let now = Utc::now().timestamp_millis();

        let conn = self.conn.lock().unwrap();
        let id = conn.query_row(
            "INSERT INTO recipes (user_id, source_id, title, category, area, instructions, \
             ingredients, tags, thumbnail_url, source_url, video_url, imported_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?12) \
             ON CONFLICT(user_id, source_id) DO UPDATE SET \
                 title = excluded.title, category = excluded.category, area = excluded.area, \
                 instructions = excluded.instructions, ingredients = excluded.ingredients, \
                 tags = excluded.tags, thumbnail_url = excluded.thumbnail_url, \
                 source_url = excluded.source_url, video_url = excluded.video_url, \
                 updated_at = excluded.updated_at \
             RETURNING id",
            params![
                user_id,
                source_id,
                recipe.title,
                recipe.category,
                recipe.area,
                instructions,
                ingredients,
                tags,
                recipe.thumbnail_url,
                recipe.source_url,
                recipe.video_url,
                now
            ],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    fn get_recipe(&self, user_id: &str, source_id: &str) -> Result<Option<StoredRecipe>> {
        let conn = self.conn.lock().unwrap();
        let recipe = conn
            .query_row(
                &format!(
                    "SELECT {} FROM recipes WHERE user_id = ?1 AND source_id = ?2",
                    RECIPE_COLUMNS
                ),
                params![user_id, source_id],
                row_to_recipe,
            )
            .optional()?;
        Ok(recipe)
    }

    fn find_user_contact(&self, user_id: &str) -> Result<Option<String>> {
        let conn = self.conn.lock().unwrap();
        let email: Option<Option<String>> = conn
            .query_row(
                "SELECT email FROM users WHERE id = ?1",
                params![user_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(email
            .flatten()
            .map(|e| e.trim().to_string())
            .filter(|e| !e.is_empty()))
    }

    fn list_recipient_ids(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id FROM users WHERE email IS NOT NULL AND TRIM(email) != '' ORDER BY id",
        )?;
        let ids = stmt
            .query_map(params![], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(ids)
    }
}
