//! Recipe Jobs Server Library
//!
//! Durable job queue, cron scheduling, worker pools and the recipe jobs that
//! run on them. Exposed as a library for the binaries and integration tests.

pub mod config;
pub mod content_store;
pub mod import;
pub mod job_store;
pub mod job_types;
pub mod maintenance;
pub mod metrics;
pub mod recommendations;
pub mod runtime;
pub mod scheduler;
pub mod service;
pub mod sqlite_persistence;
pub mod trending;
pub mod workers;

// Re-export commonly used types for convenience
pub use job_store::{JobKey, JobStore, SqliteJobStore};
pub use runtime::{Collaborators, JobsRuntime};
pub use service::JobsService;
pub use trending::TrendingStatus;
