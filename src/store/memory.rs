// src/store/memory.rs
// =============================================================================
// In-memory implementation of UrlStore and JobStore.
//
// One mutex guards everything, which also gives us the "writes to the same
// record are serialized" property the pipeline relies on. The lock is never
// held across an .await.
// =============================================================================

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use super::{JobStore, UrlStore};
use crate::error::StoreError;
use crate::model::{CrawlJob, JobId, JobStatus, UrlId, UrlRecord, UrlStatus};

#[derive(Debug, Default)]
struct Tables {
    next_url_id: UrlId,
    urls: HashMap<UrlId, UrlRecord>,
    jobs: HashMap<JobId, CrawlJob>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Tables>, StoreError> {
        self.tables
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".to_string()))
    }
}

// Newest first. created_at can tie for jobs created in the same instant, so
// the id breaks ties to keep the order stable.
fn newest_first(jobs: &mut [CrawlJob]) {
    jobs.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| a.id.cmp(&b.id))
    });
}

#[async_trait]
impl UrlStore for MemoryStore {
    async fn get_url_by_target(&self, target: &str) -> Result<Option<UrlRecord>, StoreError> {
        let tables = self.lock()?;
        Ok(tables.urls.values().find(|r| r.url == target).cloned())
    }

    async fn get_url(&self, id: UrlId) -> Result<Option<UrlRecord>, StoreError> {
        Ok(self.lock()?.urls.get(&id).cloned())
    }

    async fn create_url(&self, mut record: UrlRecord) -> Result<UrlId, StoreError> {
        let mut tables = self.lock()?;
        tables.next_url_id += 1;
        let id = tables.next_url_id;
        record.id = id;
        tables.urls.insert(id, record);
        Ok(id)
    }

    async fn update_url(&self, record: &UrlRecord) -> Result<(), StoreError> {
        let mut tables = self.lock()?;
        match tables.urls.get_mut(&record.id) {
            Some(existing) => {
                *existing = record.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound {
                kind: "url",
                id: record.id.to_string(),
            }),
        }
    }

    async fn update_url_status(&self, id: UrlId, status: UrlStatus) -> Result<(), StoreError> {
        let mut tables = self.lock()?;
        let record = tables.urls.get_mut(&id).ok_or_else(|| StoreError::NotFound {
            kind: "url",
            id: id.to_string(),
        })?;
        record.status = status;
        Ok(())
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn create_job(&self, job: &CrawlJob) -> Result<(), StoreError> {
        self.lock()?.jobs.insert(job.id.clone(), job.clone());
        Ok(())
    }

    async fn update_job(&self, job: &CrawlJob) -> Result<(), StoreError> {
        let mut tables = self.lock()?;
        match tables.jobs.get_mut(&job.id) {
            Some(existing) => {
                *existing = job.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound {
                kind: "job",
                id: job.id.to_string(),
            }),
        }
    }

    async fn get_job(&self, id: &JobId) -> Result<Option<CrawlJob>, StoreError> {
        Ok(self.lock()?.jobs.get(id).cloned())
    }

    async fn jobs_by_status(&self, status: JobStatus) -> Result<Vec<CrawlJob>, StoreError> {
        let mut jobs: Vec<CrawlJob> = self
            .lock()?
            .jobs
            .values()
            .filter(|j| j.status == status)
            .cloned()
            .collect();
        newest_first(&mut jobs);
        Ok(jobs)
    }

    async fn jobs_by_url(&self, url_id: UrlId) -> Result<Vec<CrawlJob>, StoreError> {
        let mut jobs: Vec<CrawlJob> = self
            .lock()?
            .jobs
            .values()
            .filter(|j| j.url_id == url_id)
            .cloned()
            .collect();
        newest_first(&mut jobs);
        Ok(jobs)
    }

    async fn job_history(&self, limit: usize) -> Result<Vec<CrawlJob>, StoreError> {
        let mut jobs: Vec<CrawlJob> = self.lock()?.jobs.values().cloned().collect();
        newest_first(&mut jobs);
        jobs.truncate(limit);
        Ok(jobs)
    }
}
