// src/jobs/mod.rs
// =============================================================================
// Job orchestration: the worker pool and the job manager on top of it.
//
// - pool: fixed number of workers, bounded queue, panic-to-error boundary
// - manager: start / cancel / look up crawl jobs, dedup against results
// =============================================================================

mod manager;
mod pool;

pub use manager::{
    JobHandle, JobManager, JobReport, JobResult, JobStats, UrlSummary, DEFAULT_HISTORY_LIMIT,
    MAX_HISTORY_LIMIT,
};
pub use pool::{Task, TaskOutcome, WorkerPool};
