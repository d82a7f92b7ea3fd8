//! Database schema for jobs.db.

use crate::sqlite_column;
use crate::sqlite_persistence::{Column, SqlType, Table, VersionedSchema};

// =============================================================================
// Jobs Table - Version 0
// =============================================================================

/// One row per job identity `(job_type, id)`. Timestamps are unix millis.
const JOBS_TABLE_V0: Table = Table {
    name: "jobs",
    columns: &[
        sqlite_column!("job_type", &SqlType::Text, is_primary_key = true, non_null = true),
        sqlite_column!("id", &SqlType::Text, is_primary_key = true, non_null = true),
        sqlite_column!("payload", &SqlType::Text, non_null = true),
        sqlite_column!("status", &SqlType::Text, non_null = true),
        sqlite_column!(
            "attempts",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
        sqlite_column!("max_attempts", &SqlType::Integer, non_null = true),
        sqlite_column!("scheduled_at", &SqlType::Integer, non_null = true),
        sqlite_column!("created_at", &SqlType::Integer, non_null = true),
        sqlite_column!("updated_at", &SqlType::Integer, non_null = true),
        sqlite_column!("started_at", &SqlType::Integer),
        sqlite_column!("finished_at", &SqlType::Integer),
        sqlite_column!("last_error", &SqlType::Text),
        sqlite_column!("result", &SqlType::Text),
    ],
    indices: &[
        ("idx_jobs_claim", "job_type, status, scheduled_at"),
        ("idx_jobs_status_finished", "status, finished_at"),
    ],
    unique_constraints: &[],
};

// =============================================================================
// Repeat Specs Table - Version 0
// =============================================================================

/// One row per logical recurring job, keyed by `job_id`.
const REPEAT_SPECS_TABLE_V0: Table = Table {
    name: "repeat_specs",
    columns: &[
        sqlite_column!("job_id", &SqlType::Text, is_primary_key = true, non_null = true),
        sqlite_column!("job_type", &SqlType::Text, non_null = true),
        sqlite_column!("cron_expression", &SqlType::Text, non_null = true),
        sqlite_column!("payload_template", &SqlType::Text, non_null = true),
        sqlite_column!("next_fire_at", &SqlType::Integer, non_null = true),
        sqlite_column!("registered_at", &SqlType::Integer, non_null = true),
    ],
    indices: &[("idx_repeat_specs_next_fire", "next_fire_at")],
    unique_constraints: &[],
};

pub const JOB_STORE_VERSIONED_SCHEMAS: &[VersionedSchema] = &[VersionedSchema {
    version: 0,
    tables: &[JOBS_TABLE_V0, REPEAT_SPECS_TABLE_V0],
    migration: None,
}];
