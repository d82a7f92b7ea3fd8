//! Shared constants for end-to-end tests
//!
//! Recipe ids, users and catalog items seeded by the harness. When test data
//! changes, update only this file.

// ============================================================================
// Recipes served by the fake lookup service
// ============================================================================

/// "Teriyaki Chicken Casserole", 9 ingredients
pub const RECIPE_TERIYAKI_ID: &str = "52772";

/// "Pancakes", only ingredient slots 1-5 populated
pub const RECIPE_PANCAKES_ID: &str = "52854";

/// A record with no title; the transform rejects it
pub const RECIPE_UNTITLED_ID: &str = "99001";

/// Answers 503 until the fake is told otherwise
pub const RECIPE_FLAKY_ID: &str = "99002";

/// Not present in the fake lookup service
pub const RECIPE_MISSING_ID: &str = "00000";

// ============================================================================
// Users
// ============================================================================

/// User with an email address
pub const USER_WITH_CONTACT: &str = "user-ada";

pub const USER_WITH_CONTACT_EMAIL: &str = "ada@example.com";

/// User without an email address
pub const USER_WITHOUT_CONTACT: &str = "user-bob";

// ============================================================================
// Catalog
// ============================================================================

pub const ITEM_A_ID: &str = "item-a";
pub const ITEM_A_TITLE: &str = "Apple Crumble";

pub const ITEM_B_ID: &str = "item-b";
pub const ITEM_B_TITLE: &str = "Beef Wellington";

pub const ITEM_C_ID: &str = "item-c";
pub const ITEM_C_TITLE: &str = "Carrot Soup";

// ============================================================================
// Timeouts
// ============================================================================

/// How long helpers wait for a job to reach a status
pub const JOB_WAIT_TIMEOUT_MS: u64 = 5_000;
