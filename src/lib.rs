// src/lib.rs
// =============================================================================
// link-auditor: crawl a page in the background, extract its metadata and
// classify every outbound link, as a cancellable and observable job.
//
// Layout:
// - model / error / config: shared types
// - notify / store: the two outside capabilities (events, persistence)
// - checker: HTML extraction and HTTP probing
// - crawl: the per-job two-phase pipeline
// - jobs: worker pool and job manager, the public entry point
//
// Typical use:
//   let manager = JobManager::new(&config, store.clone(), store, notifier)?;
//   let handle = manager.start_crawl("https://example.com").await?;
//   let result = handle.wait().await?;
// =============================================================================

pub mod checker;
pub mod config;
pub mod crawl;
pub mod error;
pub mod jobs;
pub mod model;
pub mod notify;
pub mod store;

pub use config::AuditConfig;
pub use error::{AuditError, StoreError};
pub use jobs::{JobHandle, JobManager, JobResult};
