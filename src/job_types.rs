//! Names of the job types this server knows how to run.

pub const IMPORT_RECIPE: &str = "import.recipe";
pub const TRENDING_AGGREGATE: &str = "trending.aggregate";
pub const RECOMMENDATIONS_FANOUT: &str = "recommendations.fanout";
pub const RECOMMENDATIONS_SEND: &str = "recommendations.send";
pub const PRUNE_JOBS: &str = "maintenance.prune_jobs";

/// Every job type started by `jobs-server`.
pub const ALL: &[&str] = &[
    IMPORT_RECIPE,
    TRENDING_AGGREGATE,
    RECOMMENDATIONS_FANOUT,
    RECOMMENDATIONS_SEND,
    PRUNE_JOBS,
];
