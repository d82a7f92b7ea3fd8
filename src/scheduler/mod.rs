//! Cron-driven recurring jobs.

mod cron;
mod recurring;

pub use cron::{CronError, CronExpression};
pub use recurring::{validate_recurring, Firing, RecurringScheduler};
