use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of user activity counted by trending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    View,
    Share,
}

impl EventKind {
    pub(crate) fn table(&self) -> &'static str {
        match self {
            EventKind::View => "view_events",
            EventKind::Share => "share_events",
        }
    }
}

/// Event count for one item within a window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventAggregate {
    pub item_id: String,
    pub count: u64,
    pub last_event_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CatalogItem {
    pub id: String,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ingredient {
    pub name: String,
    pub measure: Option<String>,
}

/// Structured recipe produced from an external record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipeDraft {
    pub title: String,
    pub category: Option<String>,
    pub area: Option<String>,
    pub instructions: Vec<String>,
    pub ingredients: Vec<Ingredient>,
    pub tags: Vec<String>,
    pub thumbnail_url: Option<String>,
    pub source_url: Option<String>,
    pub video_url: Option<String>,
}

/// An imported recipe as persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredRecipe {
    pub id: i64,
    pub user_id: String,
    pub source_id: String,
    pub recipe: RecipeDraft,
    pub imported_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
