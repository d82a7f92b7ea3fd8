//! Per-type worker pools that claim and execute jobs.

mod handler;
mod pool;
mod registry;

pub use handler::{parse_payload, HandlerError, JobContext, JobHandler};
pub use pool::WorkerPool;
pub use registry::{WorkerCounts, WorkerRegistry};
