// src/jobs/manager.rs
// =============================================================================
// The job manager: the public entry point of the crawl core.
//
// How it works:
// 1. start_crawl() reserves the target in the registry, then checks the
//    stored URL record. A finished record is returned as-is; a crawl already
//    queued or running is refused; anything else gets a new queued job. If
//    the job cannot be saved the record is forced to error so the target
//    stays crawlable.
// 2. The job is wrapped in a pool task. A small supervisor task waits for
//    the outcome, makes sure the job reached a terminal state (even if the
//    task panicked), fills the handle's result slot and only then drops the
//    job from the registry.
// 3. cancel_job() signals the job's cancellation token; the pipeline picks
//    it up at its next checkpoint.
//
// One JobManager is built at startup and shared (it is cheap to clone).
// The registry of in-flight jobs is the only shared mutable state and sits
// behind a single RwLock.
// =============================================================================

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use super::pool::{Task, TaskOutcome, WorkerPool};
use crate::config::AuditConfig;
use crate::crawl::{CrawlPipeline, PipelineDeps};
use crate::error::AuditError;
use crate::model::{CrawlJob, JobId, JobStatus, LinkKind, UrlId, UrlRecord, UrlStatus};
use crate::notify::{EventKind, EventPayload, Notifier};
use crate::store::{JobStore, UrlStore};

pub const DEFAULT_HISTORY_LIMIT: usize = 50;
pub const MAX_HISTORY_LIMIT: usize = 1000;

/// What a job ended with.
#[derive(Debug, Clone)]
pub struct JobResult {
    /// Final job snapshot
    pub job: CrawlJob,
    /// The URL record as stored after the job finished
    pub record: Option<UrlRecord>,
    /// Why the job did not complete, if it did not
    pub error: Option<AuditError>,
}

impl JobResult {
    pub fn is_completed(&self) -> bool {
        self.job.status == JobStatus::Completed
    }
}

// Returned by start_crawl. The result slot holds exactly one value and can
// be polled without blocking.
#[derive(Debug)]
pub struct JobHandle {
    job: CrawlJob,
    existing: bool,
    slot: oneshot::Receiver<JobResult>,
    ready: Option<JobResult>,
}

impl JobHandle {
    fn live(job: CrawlJob, slot: oneshot::Receiver<JobResult>) -> Self {
        JobHandle {
            job,
            existing: false,
            slot,
            ready: None,
        }
    }

    // A handle whose result is already known
    fn finished(result: JobResult) -> Self {
        let (_, slot) = oneshot::channel();
        JobHandle {
            job: result.job.clone(),
            existing: true,
            slot,
            ready: Some(result),
        }
    }

    pub fn job_id(&self) -> &JobId {
        &self.job.id
    }

    /// Snapshot taken when the job was accepted
    pub fn job(&self) -> &CrawlJob {
        &self.job
    }

    /// True when the result came from an earlier crawl and no task was started
    pub fn is_existing(&self) -> bool {
        self.existing
    }

    pub fn try_result(&mut self) -> Option<&JobResult> {
        if self.ready.is_none() {
            if let Ok(result) = self.slot.try_recv() {
                self.ready = Some(result);
            }
        }
        self.ready.as_ref()
    }

    pub async fn wait(mut self) -> Result<JobResult, AuditError> {
        if let Some(result) = self.ready.take() {
            return Ok(result);
        }
        self.slot.await.map_err(|_| {
            AuditError::PanicRecovered(format!("result of job {} was lost", self.job.id))
        })
    }
}

/// Compact view of a URL record for status reports.
#[derive(Debug, Clone, Serialize)]
pub struct UrlSummary {
    pub url_id: UrlId,
    pub url: String,
    pub status: UrlStatus,
    pub title: String,
    pub status_code: u16,
    pub html_version: String,
    pub login_form: bool,
    pub tags_count: usize,
    pub links_count: usize,
    pub internal_links: usize,
    pub external_links: usize,
    pub inaccessible_links: usize,
}

impl From<&UrlRecord> for UrlSummary {
    fn from(record: &UrlRecord) -> Self {
        UrlSummary {
            url_id: record.id,
            url: record.url.clone(),
            status: record.status,
            title: record.title.clone(),
            status_code: record.status_code,
            html_version: record.html_version.clone(),
            login_form: record.login_form,
            tags_count: record.tags.len(),
            links_count: record.links.len(),
            internal_links: record.count_links(LinkKind::Internal),
            external_links: record.count_links(LinkKind::External),
            inaccessible_links: record.count_links(LinkKind::Inaccessible),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JobReport {
    pub job: CrawlJob,
    pub is_active: bool,
    pub running_duration_ms: i64,
    /// Still tracked by the manager
    pub in_memory: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<UrlSummary>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct JobStats {
    pub total: usize,
    pub queued: usize,
    pub running: usize,
    pub completed: usize,
    pub cancelled: usize,
    pub error: usize,
    /// Jobs currently tracked by the manager
    pub active: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avg_duration_ms: Option<f64>,
}

struct ActiveJob {
    target: String,
    cancel: CancellationToken,
}

enum Prepared {
    Queued(CrawlJob),
    Existing(JobResult),
}

struct Inner {
    deps: Arc<PipelineDeps>,
    pool: WorkerPool,
    active: RwLock<HashMap<JobId, ActiveJob>>,
    shutdown_timeout: Duration,
}

#[derive(Clone)]
pub struct JobManager {
    inner: Arc<Inner>,
}

impl JobManager {
    // Builds the HTTP client and starts the worker pool. Must be called
    // inside a tokio runtime.
    pub fn new(
        config: &AuditConfig,
        urls: Arc<dyn UrlStore>,
        jobs: Arc<dyn JobStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self, AuditError> {
        config.validate()?;
        let deps = PipelineDeps::new(config, urls, jobs, notifier)?;
        Ok(JobManager {
            inner: Arc::new(Inner {
                deps: Arc::new(deps),
                pool: WorkerPool::from_config(config),
                active: RwLock::new(HashMap::new()),
                shutdown_timeout: config.shutdown_timeout,
            }),
        })
    }

    pub async fn start_crawl(&self, target: &str) -> Result<JobHandle, AuditError> {
        let target = validate_target(target)?;
        let deps = &self.inner.deps;

        // Reserve the target first. The store I/O below runs without the
        // registry lock; the reservation alone keeps a second caller for the
        // same target out.
        let job_id = JobId::generate();
        let cancel = self.inner.pool.new_task_token();
        {
            let mut active = self.inner.active.write().await;
            if active.values().any(|a| a.target == target) {
                return Err(AuditError::AlreadyInProgress { target });
            }
            active.insert(
                job_id.clone(),
                ActiveJob {
                    target: target.clone(),
                    cancel: cancel.clone(),
                },
            );
        }

        let job = match self.prepare_job(&job_id, &target).await {
            Ok(Prepared::Queued(job)) => job,
            Ok(Prepared::Existing(result)) => {
                self.release(&job_id).await;
                return Ok(JobHandle::finished(result));
            }
            Err(e) => {
                self.release(&job_id).await;
                return Err(e);
            }
        };

        info!(job_id = %job.id, target = %job.target, url_id = job.url_id, "crawl queued");
        deps.publish(EventKind::Queued, EventPayload::for_job(&job));

        let task = CrawlTask {
            pipeline: CrawlPipeline::new(job.clone(), deps.clone()),
        };
        let outcome = match self.inner.pool.enqueue(Box::new(task), cancel).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(job_id = %job.id, error = %e, "crawl could not be queued");
                // The job never reached a worker, so it is closed out here
                let abandoned = CrawlPipeline::new(job.clone(), deps.clone())
                    .abandon(e.clone())
                    .await;
                self.release(&job.id).await;
                return match abandoned {
                    Err(partial @ AuditError::PartialFailure { .. }) => Err(partial),
                    _ => Err(e),
                };
            }
        };

        let (slot_tx, slot_rx) = oneshot::channel();
        tokio::spawn(supervise(self.inner.clone(), job.clone(), outcome, slot_tx));
        Ok(JobHandle::live(job, slot_rx))
    }

    // Looks at the stored record for the target and persists a queued job
    // for it, unless a finished result can be handed back instead.
    async fn prepare_job(&self, job_id: &JobId, target: &str) -> Result<Prepared, AuditError> {
        let deps = &self.inner.deps;
        let url_id = match deps.urls.get_url_by_target(target).await? {
            Some(record) if record.is_reusable() => {
                info!(target = %target, url_id = record.id, "returning existing crawl result");
                return Ok(Prepared::Existing(existing_result(record)));
            }
            Some(record) if record.status.is_in_progress() => {
                return Err(AuditError::AlreadyInProgress {
                    target: target.to_string(),
                });
            }
            Some(record) => {
                debug!(url_id = record.id, status = %record.status, "re-crawling stale record");
                deps.urls.update_url_status(record.id, UrlStatus::Queued).await?;
                record.id
            }
            None => deps.urls.create_url(UrlRecord::queued(target)).await?,
        };

        let job = CrawlJob {
            id: job_id.clone(),
            ..CrawlJob::new(target, url_id)
        };
        if let Err(e) = deps.jobs.create_job(&job).await {
            // The record is queued now but no job will ever run it
            let cause = AuditError::from(e);
            warn!(target = %target, url_id, error = %cause, "job record could not be created");
            return Err(match deps.urls.update_url_status(url_id, UrlStatus::Error).await {
                Ok(()) => cause,
                Err(compensating) => AuditError::PartialFailure {
                    primary: cause.to_string(),
                    compensating: format!("url status: {}", compensating),
                },
            });
        }
        Ok(Prepared::Queued(job))
    }

    async fn release(&self, job_id: &JobId) {
        self.inner.active.write().await.remove(job_id);
    }

    // Best effort: the job may finish between the check and the signal, in
    // which case the pipeline's finalize step ignores the late cancel.
    pub async fn cancel_job(&self, job_id: &JobId) -> bool {
        let active = self.inner.active.read().await;
        let Some(entry) = active.get(job_id) else {
            debug!(job_id = %job_id, "cancel requested for unknown job");
            return false;
        };
        if let Ok(Some(job)) = self.inner.deps.jobs.get_job(job_id).await {
            if job.status.is_terminal() {
                debug!(job_id = %job_id, status = %job.status, "cancel requested for finished job");
                return false;
            }
        }
        entry.cancel.cancel();
        info!(job_id = %job_id, "cancellation requested");
        true
    }

    pub async fn get_job(&self, job_id: &JobId) -> Result<Option<CrawlJob>, AuditError> {
        Ok(self.inner.deps.jobs.get_job(job_id).await?)
    }

    pub async fn get_job_status(&self, job_id: &JobId) -> Result<JobReport, AuditError> {
        let job = self
            .get_job(job_id)
            .await?
            .ok_or_else(|| AuditError::NotFound(job_id.clone()))?;
        let record = self.inner.deps.urls.get_url(job.url_id).await?;
        let in_memory = self.inner.active.read().await.contains_key(job_id);

        Ok(JobReport {
            is_active: job.is_active(),
            running_duration_ms: job.running_duration_ms(),
            in_memory,
            url: record.as_ref().map(UrlSummary::from),
            job,
        })
    }

    // Snapshots of every job the manager is still tracking
    pub async fn list_active_jobs(&self) -> Result<HashMap<JobId, CrawlJob>, AuditError> {
        let ids: Vec<JobId> = self.inner.active.read().await.keys().cloned().collect();
        let mut jobs = HashMap::with_capacity(ids.len());
        for id in ids {
            // A job can leave the registry while we look it up
            if let Some(job) = self.inner.deps.jobs.get_job(&id).await? {
                jobs.insert(id, job);
            }
        }
        Ok(jobs)
    }

    /// Newest first. `None` means the default of 50; anything else is
    /// clamped to 1..=1000.
    pub async fn job_history(&self, limit: Option<usize>) -> Result<Vec<CrawlJob>, AuditError> {
        let limit = limit
            .unwrap_or(DEFAULT_HISTORY_LIMIT)
            .clamp(1, MAX_HISTORY_LIMIT);
        Ok(self.inner.deps.jobs.job_history(limit).await?)
    }

    pub async fn jobs_by_url(&self, url_id: UrlId) -> Result<Vec<CrawlJob>, AuditError> {
        Ok(self.inner.deps.jobs.jobs_by_url(url_id).await?)
    }

    pub async fn jobs_by_status(&self, status: JobStatus) -> Result<Vec<CrawlJob>, AuditError> {
        Ok(self.inner.deps.jobs.jobs_by_status(status).await?)
    }

    pub async fn job_stats(&self) -> Result<JobStats, AuditError> {
        let jobs = &self.inner.deps.jobs;
        let mut stats = JobStats {
            queued: jobs.jobs_by_status(JobStatus::Queued).await?.len(),
            running: jobs.jobs_by_status(JobStatus::Running).await?.len(),
            cancelled: jobs.jobs_by_status(JobStatus::Cancelled).await?.len(),
            error: jobs.jobs_by_status(JobStatus::Error).await?.len(),
            active: self.inner.active.read().await.len(),
            ..Default::default()
        };

        let completed = jobs.jobs_by_status(JobStatus::Completed).await?;
        stats.completed = completed.len();
        let durations: Vec<i64> = completed.iter().filter_map(|j| j.duration_ms).collect();
        if !durations.is_empty() {
            stats.avg_duration_ms =
                Some(durations.iter().sum::<i64>() as f64 / durations.len() as f64);
        }

        stats.total = stats.queued + stats.running + stats.completed + stats.cancelled + stats.error;
        Ok(stats)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        self.inner.shutdown_timeout
    }

    // Stops accepting crawls, cancels everything in flight and waits up to
    // `timeout` for the workers. Returns true if they drained in time.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        let in_flight = self.inner.active.read().await.len();
        info!(in_flight, "job manager shutting down");
        self.inner.pool.shutdown(timeout).await
    }
}

// One pipeline run as a pool task
struct CrawlTask {
    pipeline: CrawlPipeline,
}

#[async_trait]
impl Task for CrawlTask {
    fn name(&self) -> String {
        format!("crawl {}", self.pipeline.job().id)
    }

    async fn run(self: Box<Self>, cancel: CancellationToken) -> Result<(), AuditError> {
        self.pipeline.run(cancel).await
    }
}

// Waits for one job's pool outcome and closes it out
async fn supervise(
    inner: Arc<Inner>,
    job: CrawlJob,
    outcome: TaskOutcome,
    slot: oneshot::Sender<JobResult>,
) {
    let deps = &inner.deps;
    let result = outcome.await.unwrap_or_else(|_| {
        Err(AuditError::PanicRecovered(
            "worker dropped the task".to_string(),
        ))
    });

    let mut latest = deps
        .jobs
        .get_job(&job.id)
        .await
        .ok()
        .flatten()
        .unwrap_or_else(|| job.clone());

    // A panicking task never reached its finalize step
    if !latest.status.is_terminal() {
        let cause = match &result {
            Err(e) => e.clone(),
            Ok(()) => AuditError::PanicRecovered("task ended without a terminal state".to_string()),
        };
        warn!(job_id = %job.id, error = %cause, "closing out unfinished job");
        if let Err(e) = CrawlPipeline::new(latest.clone(), deps.clone())
            .abandon(cause)
            .await
        {
            debug!(job_id = %job.id, error = %e, "job abandoned");
        }
        if let Ok(Some(reloaded)) = deps.jobs.get_job(&job.id).await {
            latest = reloaded;
        }
    }

    let record = deps.urls.get_url(job.url_id).await.ok().flatten();
    // Terminal status is persisted and broadcast by now
    inner.active.write().await.remove(&job.id);

    debug!(job_id = %job.id, status = %latest.status, "job finished");
    // The caller may have dropped the handle
    let _ = slot.send(JobResult {
        job: latest,
        record,
        error: result.err(),
    });
}

fn validate_target(target: &str) -> Result<String, AuditError> {
    let target = target.trim();
    let invalid = |reason: String| AuditError::InvalidTarget {
        target: target.to_string(),
        reason,
    };
    let url = Url::parse(target).map_err(|e| invalid(e.to_string()))?;
    match url.scheme() {
        "http" | "https" => Ok(target.to_string()),
        other => Err(invalid(format!("unsupported scheme '{}'", other))),
    }
}

// The pseudo-job handed back when a finished result already exists. It is
// not persisted.
fn existing_result(record: UrlRecord) -> JobResult {
    let now = Utc::now();
    let job = CrawlJob {
        id: record.job_id.clone().unwrap_or_else(JobId::generate),
        target: record.url.clone(),
        url_id: record.id,
        status: JobStatus::Completed,
        created_at: now,
        started_at: None,
        completed_at: Some(now),
        duration_ms: None,
        error_message: None,
    };
    JobResult {
        job,
        record: Some(record),
        error: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::testing::RecordingNotifier;
    use crate::notify::CrawlEvent;
    use crate::store::testing::FlakyStore;
    use crate::store::MemoryStore;
    use httpmock::{Method::GET, MockServer};
    use std::time::Instant;

    fn config() -> AuditConfig {
        AuditConfig {
            workers: 2,
            queue_capacity: 8,
            request_timeout: Duration::from_secs(5),
            ..Default::default()
        }
    }

    fn manager_with(
        config: &AuditConfig,
        notifier: Arc<dyn Notifier>,
    ) -> (JobManager, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let manager = JobManager::new(config, store.clone(), store.clone(), notifier).unwrap();
        (manager, store)
    }

    async fn simple_site(delay: Duration) -> MockServer {
        let site = MockServer::start_async().await;
        site.mock_async(|when, then| {
            when.method(GET).path("/");
            then.status(200)
                .body(r#"<!DOCTYPE html><title>Home</title><a href="/a">a</a>"#)
                .delay(delay);
        })
        .await;
        site.mock_async(|when, then| {
            when.path("/a");
            then.status(200);
        })
        .await;
        site
    }

    #[tokio::test]
    async fn test_start_and_wait() {
        let site = simple_site(Duration::ZERO).await;
        let notifier = Arc::new(RecordingNotifier::default());
        let (manager, _) = manager_with(&config(), notifier.clone());

        let handle = manager.start_crawl(&site.url("/")).await.unwrap();
        assert!(!handle.is_existing());
        assert_eq!(handle.job().status, JobStatus::Queued);
        let job_id = handle.job_id().clone();

        let result = handle.wait().await.unwrap();
        assert!(result.is_completed());
        assert!(result.error.is_none());
        let record = result.record.unwrap();
        assert_eq!(record.title, "Home");
        assert_eq!(record.links.len(), 1);

        assert_eq!(
            notifier.kinds_for(&job_id),
            vec![
                EventKind::Queued,
                EventKind::Started,
                EventKind::HalfCompleted,
                EventKind::Completed
            ]
        );
        // removed from the registry before the result was delivered
        assert!(manager.list_active_jobs().await.unwrap().is_empty());
        let report = manager.get_job_status(&job_id).await.unwrap();
        assert!(!report.in_memory);
        assert_eq!(report.url.unwrap().internal_links, 1);
    }

    #[tokio::test]
    async fn test_duplicate_start_is_refused() {
        let site = simple_site(Duration::from_millis(500)).await;
        let (manager, _) = manager_with(&config(), Arc::new(RecordingNotifier::default()));
        let target = site.url("/");

        let (first, second) = tokio::join!(manager.start_crawl(&target), manager.start_crawl(&target));
        let (ok, refused) = match (first, second) {
            (Ok(handle), Err(e)) | (Err(e), Ok(handle)) => (handle, e),
            other => panic!("expected exactly one accepted crawl, got {:?}", other),
        };
        assert!(matches!(refused, AuditError::AlreadyInProgress { .. }));
        assert_eq!(manager.list_active_jobs().await.unwrap().len(), 1);
        assert!(ok.wait().await.unwrap().is_completed());
    }

    #[tokio::test]
    async fn test_existing_result_is_reused() {
        let (manager, store) = manager_with(&config(), Arc::new(RecordingNotifier::default()));
        let mut record = UrlRecord::queued("http://example.invalid/");
        record.status = UrlStatus::Done;
        record.title = "Cached".to_string();
        let url_id = store.create_url(record).await.unwrap();

        let mut handle = manager.start_crawl("http://example.invalid/").await.unwrap();
        assert!(handle.is_existing());
        let result = handle.try_result().unwrap();
        assert!(result.is_completed());
        assert_eq!(result.record.as_ref().unwrap().title, "Cached");
        assert!(result.job.completed_at.is_some());

        // no job was created
        assert!(manager.jobs_by_url(url_id).await.unwrap().is_empty());
        assert!(manager.job_history(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_in_progress_record_is_refused() {
        let (manager, store) = manager_with(&config(), Arc::new(RecordingNotifier::default()));
        let mut record = UrlRecord::queued("http://example.invalid/");
        record.status = UrlStatus::Running;
        store.create_url(record).await.unwrap();

        let result = manager.start_crawl("http://example.invalid/").await;
        assert!(matches!(result, Err(AuditError::AlreadyInProgress { .. })));
    }

    #[tokio::test]
    async fn test_stale_record_is_recrawled_in_place() {
        let site = simple_site(Duration::ZERO).await;
        let (manager, store) = manager_with(&config(), Arc::new(RecordingNotifier::default()));
        let mut record = UrlRecord::queued(site.url("/"));
        record.status = UrlStatus::Error;
        let url_id = store.create_url(record).await.unwrap();

        let handle = manager.start_crawl(&site.url("/")).await.unwrap();
        assert_eq!(handle.job().url_id, url_id);
        let result = handle.wait().await.unwrap();
        assert!(result.is_completed());
        assert_eq!(manager.jobs_by_url(url_id).await.unwrap().len(), 1);
    }

    fn flaky_manager() -> (JobManager, Arc<FlakyStore>) {
        let store = Arc::new(FlakyStore::new(MemoryStore::new()));
        let manager = JobManager::new(
            &config(),
            store.clone(),
            store.clone(),
            Arc::new(RecordingNotifier::default()),
        )
        .unwrap();
        (manager, store)
    }

    #[tokio::test]
    async fn test_failed_job_insert_leaves_target_crawlable() {
        let site = simple_site(Duration::ZERO).await;
        let target = site.url("/");
        let (manager, store) = flaky_manager();

        store.fail_create_job(true);
        let first = manager.start_crawl(&target).await;
        assert!(matches!(first, Err(AuditError::Persistence(_))));
        let record = store.get_url_by_target(&target).await.unwrap().unwrap();
        assert_eq!(record.status, UrlStatus::Error);
        assert!(manager.list_active_jobs().await.unwrap().is_empty());

        store.fail_create_job(false);
        let second = manager.start_crawl(&target).await.unwrap();
        assert_eq!(second.job().url_id, record.id);
        assert!(second.wait().await.unwrap().is_completed());
    }

    #[tokio::test]
    async fn test_failed_job_insert_and_status_write() {
        let (manager, store) = flaky_manager();
        store.fail_create_job(true);
        store.fail_url_status(Some(UrlStatus::Error));

        match manager.start_crawl("http://example.invalid/").await {
            Err(AuditError::PartialFailure { primary, compensating }) => {
                assert!(primary.starts_with("failed to save crawl results"));
                assert!(compensating.starts_with("url status"));
            }
            other => panic!("expected PartialFailure, got {:?}", other),
        }
        assert!(manager.list_active_jobs().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_target() {
        let (manager, _) = manager_with(&config(), Arc::new(RecordingNotifier::default()));
        assert!(matches!(
            manager.start_crawl("not a url").await,
            Err(AuditError::InvalidTarget { .. })
        ));
        assert!(matches!(
            manager.start_crawl("ftp://example.com/").await,
            Err(AuditError::InvalidTarget { .. })
        ));
    }

    #[tokio::test]
    async fn test_cancel_job() {
        let site = simple_site(Duration::from_secs(3)).await;
        let notifier = Arc::new(RecordingNotifier::default());
        let (manager, store) = manager_with(&config(), notifier.clone());

        let handle = manager.start_crawl(&site.url("/")).await.unwrap();
        let job_id = handle.job_id().clone();
        assert!(manager.cancel_job(&job_id).await);

        let started = Instant::now();
        let result = handle.wait().await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(result.job.status, JobStatus::Cancelled);
        assert_eq!(result.error, Some(AuditError::Cancelled));
        assert!(result.job.completed_at.is_some());
        let record = store.get_url(result.job.url_id).await.unwrap().unwrap();
        assert_eq!(record.status, UrlStatus::Cancelled);
        assert_eq!(notifier.kinds_for(&job_id).last(), Some(&EventKind::Cancelled));

        // terminal now
        assert!(!manager.cancel_job(&job_id).await);
    }

    #[tokio::test]
    async fn test_unknown_job() {
        let (manager, _) = manager_with(&config(), Arc::new(RecordingNotifier::default()));
        let missing = JobId::from("missing");
        assert!(!manager.cancel_job(&missing).await);
        assert_eq!(manager.get_job(&missing).await.unwrap(), None);
        assert_eq!(
            manager.get_job_status(&missing).await.unwrap_err(),
            AuditError::NotFound(missing)
        );
    }

    // Panics when a job starts, to exercise the task boundary
    #[derive(Default)]
    struct PanicOnStart {
        inner: RecordingNotifier,
    }

    impl Notifier for PanicOnStart {
        fn publish(&self, event: CrawlEvent) {
            let started = event.kind == EventKind::Started;
            self.inner.publish(event);
            if started {
                panic!("notifier exploded");
            }
        }
    }

    #[tokio::test]
    async fn test_panicking_job_ends_in_error() {
        let site = simple_site(Duration::ZERO).await;
        let notifier = Arc::new(PanicOnStart::default());
        let config = AuditConfig {
            workers: 1,
            ..config()
        };
        let (manager, store) = manager_with(&config, notifier.clone());

        let handle = manager.start_crawl(&site.url("/")).await.unwrap();
        let job_id = handle.job_id().clone();
        let result = handle.wait().await.unwrap();
        assert_eq!(result.job.status, JobStatus::Error);
        assert!(matches!(result.error, Some(AuditError::PanicRecovered(_))));
        assert!(result
            .job
            .error_message
            .unwrap()
            .contains("notifier exploded"));
        let record = store.get_url(result.job.url_id).await.unwrap().unwrap();
        assert_eq!(record.status, UrlStatus::Error);
        assert_eq!(notifier.inner.kinds_for(&job_id).last(), Some(&EventKind::Error));

        // the single worker is still usable
        let other = simple_site(Duration::ZERO).await;
        let handle = manager.start_crawl(&other.url("/")).await;
        // the second crawl also panics on start, but it still gets a result
        assert!(handle.unwrap().wait().await.is_ok());
    }

    #[tokio::test]
    async fn test_history_and_stats() {
        let site = simple_site(Duration::ZERO).await;
        let bad = MockServer::start_async().await;
        bad.mock_async(|when, then| {
            when.path("/");
            then.status(500);
        })
        .await;
        let (manager, _) = manager_with(&config(), Arc::new(RecordingNotifier::default()));

        let ok = manager.start_crawl(&site.url("/")).await.unwrap();
        ok.wait().await.unwrap();
        let failed = manager.start_crawl(&bad.url("/")).await.unwrap();
        let failed_result = failed.wait().await.unwrap();
        assert!(matches!(failed_result.error, Some(AuditError::FetchFailure { .. })));

        let history = manager.job_history(Some(0)).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, JobStatus::Error);
        assert_eq!(manager.job_history(None).await.unwrap().len(), 2);
        assert_eq!(
            manager.jobs_by_status(JobStatus::Completed).await.unwrap().len(),
            1
        );

        let stats = manager.job_stats().await.unwrap();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.error, 1);
        assert_eq!(stats.active, 0);
        assert!(stats.avg_duration_ms.is_some());
    }

    #[tokio::test]
    async fn test_shutdown_cancels_in_flight_and_refuses_new() {
        let site = simple_site(Duration::from_secs(3)).await;
        let (manager, _) = manager_with(&config(), Arc::new(RecordingNotifier::default()));

        let handle = manager.start_crawl(&site.url("/")).await.unwrap();
        let started = Instant::now();
        assert!(manager.shutdown(Duration::from_secs(5)).await);
        assert!(started.elapsed() < Duration::from_secs(2));

        let result = handle.wait().await.unwrap();
        assert_eq!(result.job.status, JobStatus::Cancelled);

        let other = simple_site(Duration::ZERO).await;
        let late = manager.start_crawl(&other.url("/")).await;
        assert_eq!(late.err(), Some(AuditError::PoolClosed));
        // the refused job was closed out rather than left queued
        let errored = manager.jobs_by_status(JobStatus::Error).await.unwrap();
        assert_eq!(errored.len(), 1);
        assert!(manager.list_active_jobs().await.unwrap().is_empty());
    }
}
