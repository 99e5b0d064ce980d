// src/store/mod.rs
// =============================================================================
// Persistence seam for URL records and crawl jobs.
//
// The crawl core only talks to these two traits. The database behind them
// is somebody else's concern; this crate ships an in-memory implementation
// (memory.rs) that the CLI and the tests use.
//
// Writes to one record are assumed to be serialized by the store. Exactly
// one pipeline task owns a given job's URL record at a time, so the core
// never issues conflicting writes.
// =============================================================================

mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::model::{CrawlJob, JobId, JobStatus, UrlId, UrlRecord, UrlStatus};

#[async_trait]
pub trait UrlStore: Send + Sync {
    async fn get_url_by_target(&self, target: &str) -> Result<Option<UrlRecord>, StoreError>;

    async fn get_url(&self, id: UrlId) -> Result<Option<UrlRecord>, StoreError>;

    // Returns the id assigned to the new record
    async fn create_url(&self, record: UrlRecord) -> Result<UrlId, StoreError>;

    // Replaces the whole record in one write
    async fn update_url(&self, record: &UrlRecord) -> Result<(), StoreError>;

    async fn update_url_status(&self, id: UrlId, status: UrlStatus) -> Result<(), StoreError>;
}

#[async_trait]
pub trait JobStore: Send + Sync {
    async fn create_job(&self, job: &CrawlJob) -> Result<(), StoreError>;

    async fn update_job(&self, job: &CrawlJob) -> Result<(), StoreError>;

    async fn get_job(&self, id: &JobId) -> Result<Option<CrawlJob>, StoreError>;

    async fn jobs_by_status(&self, status: JobStatus) -> Result<Vec<CrawlJob>, StoreError>;

    /// Newest first
    async fn jobs_by_url(&self, url_id: UrlId) -> Result<Vec<CrawlJob>, StoreError>;

    /// Newest first, at most `limit` jobs
    async fn job_history(&self, limit: usize) -> Result<Vec<CrawlJob>, StoreError>;
}
