//! Common test infrastructure
//!
//! This module provides all the infrastructure needed for end-to-end tests.
//! Tests should only import from this module, not from internal submodules.
//!
//! # Example
//!
//! ```no_run
//! mod common;
//! use common::{TestRuntime, RECIPE_PANCAKES_ID, USER_WITH_CONTACT};
//! use recipe_jobs_server::job_store::JobStatus;
//!
//! #[tokio::test]
//! async fn test_import() {
//!     let runtime = TestRuntime::spawn().await;
//!     let key = runtime
//!         .service()
//!         .enqueue_import(RECIPE_PANCAKES_ID, USER_WITH_CONTACT)
//!         .await
//!         .unwrap();
//!     runtime.wait_for_status(&key, JobStatus::Succeeded).await;
//! }
//! ```

mod constants;
mod fakes;
mod mealdb;
mod runtime;

// Public API - this is what tests import
#[allow(unused_imports)]
pub use constants::*;
#[allow(unused_imports)]
pub use fakes::RecordingSender;
pub use runtime::TestRuntime;
