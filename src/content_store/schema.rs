//! Database schema for content.db.

use crate::sqlite_column;
use crate::sqlite_persistence::{Column, SqlType, Table, VersionedSchema};

// =============================================================================
// Catalog and Users - Version 0
// =============================================================================

const ITEMS_TABLE_V0: Table = Table {
    name: "items",
    columns: &[
        sqlite_column!("id", &SqlType::Text, is_primary_key = true, non_null = true),
        sqlite_column!("title", &SqlType::Text, non_null = true),
        sqlite_column!("created_at", &SqlType::Integer, non_null = true),
    ],
    indices: &[],
    unique_constraints: &[],
};

/// `email` is nullable: not every user can be contacted.
const USERS_TABLE_V0: Table = Table {
    name: "users",
    columns: &[
        sqlite_column!("id", &SqlType::Text, is_primary_key = true, non_null = true),
        sqlite_column!("display_name", &SqlType::Text),
        sqlite_column!("email", &SqlType::Text),
        sqlite_column!("created_at", &SqlType::Integer, non_null = true),
    ],
    indices: &[],
    unique_constraints: &[],
};

// =============================================================================
// Activity Events - Version 0
// =============================================================================

const VIEW_EVENTS_TABLE_V0: Table = Table {
    name: "view_events",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true, non_null = true),
        sqlite_column!("item_id", &SqlType::Text, non_null = true),
        sqlite_column!("user_id", &SqlType::Text),
        sqlite_column!("created_at", &SqlType::Integer, non_null = true),
    ],
    indices: &[("idx_view_events_created", "created_at, item_id")],
    unique_constraints: &[],
};

const SHARE_EVENTS_TABLE_V0: Table = Table {
    name: "share_events",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true, non_null = true),
        sqlite_column!("item_id", &SqlType::Text, non_null = true),
        sqlite_column!("user_id", &SqlType::Text),
        sqlite_column!("created_at", &SqlType::Integer, non_null = true),
    ],
    indices: &[("idx_share_events_created", "created_at, item_id")],
    unique_constraints: &[],
};

// =============================================================================
// Imported Recipes - Version 0
// =============================================================================

/// Imported recipes. `instructions`, `ingredients` and `tags` are JSON arrays.
const RECIPES_TABLE_V0: Table = Table {
    name: "recipes",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true, non_null = true),
        sqlite_column!("user_id", &SqlType::Text, non_null = true),
        sqlite_column!("source_id", &SqlType::Text, non_null = true),
        sqlite_column!("title", &SqlType::Text, non_null = true),
        sqlite_column!("category", &SqlType::Text),
        sqlite_column!("area", &SqlType::Text),
        sqlite_column!("instructions", &SqlType::Text, non_null = true),
        sqlite_column!("ingredients", &SqlType::Text, non_null = true),
        sqlite_column!("tags", &SqlType::Text, non_null = true),
        sqlite_column!("thumbnail_url", &SqlType::Text),
        sqlite_column!("source_url", &SqlType::Text),
        sqlite_column!("video_url", &SqlType::Text),
        sqlite_column!("imported_at", &SqlType::Integer, non_null = true),
        sqlite_column!("updated_at", &SqlType::Integer, non_null = true),
    ],
    indices: &[],
    unique_constraints: &[&["user_id", "source_id"]],
};

pub const CONTENT_VERSIONED_SCHEMAS: &[VersionedSchema] = &[VersionedSchema {
    version: 0,
    tables: &[
        ITEMS_TABLE_V0,
        USERS_TABLE_V0,
        VIEW_EVENTS_TABLE_V0,
        SHARE_EVENTS_TABLE_V0,
        RECIPES_TABLE_V0,
    ],
    migration: None,
}];
