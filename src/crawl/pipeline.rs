// src/crawl/pipeline.rs
// =============================================================================
// The per-job crawl pipeline.
//
// How it works:
// 1. Checkpoint, then mark the job and its URL record as running
// 2. Checkpoint, then phase 1: fetch the target once and extract metadata
//    (broadcast half_completed)
// 3. Checkpoint, then phase 2: probe every distinct candidate link and
//    classify it, checking for cancellation between probes
// 4. finalize(): write the terminal state of the job and the URL record and
//    broadcast it, exactly once
//
// A pipeline owns its job for its whole life. Nothing else writes the job
// record or the URL record while it runs.
// =============================================================================

use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};
use url::Url;

use super::stage::{Checkpoint, Stage};
use crate::checker::{classify_link, extract_page, CandidateLink, PageInfo, ProbeOutcome, WebClient};
use crate::config::AuditConfig;
use crate::error::AuditError;
use crate::model::{CrawlJob, JobStatus, Link, UrlRecord, UrlStatus};
use crate::notify::{CrawlEvent, EventKind, EventPayload, Notifier};
use crate::store::{JobStore, UrlStore};

// Everything a pipeline needs from the outside world
pub struct PipelineDeps {
    pub urls: Arc<dyn UrlStore>,
    pub jobs: Arc<dyn JobStore>,
    pub notifier: Arc<dyn Notifier>,
    pub web: WebClient,
    pub probe_concurrency: usize,
}

impl PipelineDeps {
    pub fn new(
        config: &AuditConfig,
        urls: Arc<dyn UrlStore>,
        jobs: Arc<dyn JobStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self, AuditError> {
        Ok(PipelineDeps {
            urls,
            jobs,
            notifier,
            web: WebClient::new(config)?,
            probe_concurrency: config.probe_concurrency.max(1),
        })
    }

    pub fn publish(&self, kind: EventKind, payload: EventPayload) {
        self.notifier.publish(CrawlEvent::new(kind, payload));
    }
}

// How the pipeline body ended, before anything terminal was written
#[derive(Debug)]
enum Outcome {
    Completed(UrlRecord),
    Cancelled,
    Failed(AuditError),
}

// Phase 1 output
struct MainPage {
    status_code: u16,
    info: PageInfo,
}

pub struct CrawlPipeline {
    job: CrawlJob,
    stage: Stage,
    deps: Arc<PipelineDeps>,
}

impl CrawlPipeline {
    pub fn new(job: CrawlJob, deps: Arc<PipelineDeps>) -> Self {
        let stage = match job.status {
            JobStatus::Queued => Stage::Queued,
            JobStatus::Running => Stage::Running,
            JobStatus::Completed => Stage::Completed,
            JobStatus::Cancelled => Stage::Cancelled,
            JobStatus::Error => Stage::Error,
        };
        CrawlPipeline { job, stage, deps }
    }

    pub fn job(&self) -> &CrawlJob {
        &self.job
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    // Runs the whole pipeline and writes the terminal state
    //
    // Returns Ok only when the job completed. Cancellation comes back as
    // AuditError::Cancelled, every other failure as the error that ended
    // the job (or PartialFailure if the terminal writes failed too).
    pub async fn run(mut self, cancel: CancellationToken) -> Result<(), AuditError> {
        let span = info_span!("crawl", job_id = %self.job.id, target = %self.job.target);
        async move {
            let outcome = self.drive(&cancel).await;
            self.finalize_with(outcome).await
        }
        .instrument(span)
        .await
    }

    // Ends a job that never got to (or never returned from) run(), e.g. when
    // the task panicked or could not be queued.
    pub async fn abandon(mut self, error: AuditError) -> Result<(), AuditError> {
        self.finalize_with(Outcome::Failed(error)).await
    }

    async fn drive(&mut self, cancel: &CancellationToken) -> Outcome {
        if Checkpoint::check(cancel) == Checkpoint::Stop {
            info!("cancelled before start");
            return Outcome::Cancelled;
        }
        if let Err(e) = self.start().await {
            return Outcome::Failed(e);
        }

        if Checkpoint::check(cancel) == Checkpoint::Stop {
            info!("cancelled before phase 1");
            return Outcome::Cancelled;
        }
        let target = match Url::parse(&self.job.target) {
            Ok(url) => url,
            Err(e) => {
                return Outcome::Failed(AuditError::InvalidTarget {
                    target: self.job.target.clone(),
                    reason: e.to_string(),
                })
            }
        };
        let main = match self.fetch_and_extract(&target, cancel).await {
            Ok(Some(main)) => main,
            Ok(None) => return Outcome::Cancelled,
            Err(e) => return Outcome::Failed(e),
        };

        if Checkpoint::check(cancel) == Checkpoint::Stop {
            info!("cancelled before phase 2");
            return Outcome::Cancelled;
        }
        let links = match self.verify_links(&target, &main.info.links, cancel).await {
            Some(links) => links,
            None => return Outcome::Cancelled,
        };

        let mut record = self.build_record(&main);
        record.links = links;
        Outcome::Completed(record)
    }

    async fn start(&mut self) -> Result<(), AuditError> {
        let mut job = self.job.clone();
        job.mark_running()?;
        self.deps
            .urls
            .update_url_status(job.url_id, UrlStatus::Running)
            .await?;
        self.deps.jobs.update_job(&job).await?;
        self.job = job;
        self.advance(Stage::Running);

        info!("crawl started");
        self.deps
            .publish(EventKind::Started, EventPayload::for_job(&self.job));
        Ok(())
    }

    // Phase 1. Ok(None) means the token fired while the fetch was in flight.
    async fn fetch_and_extract(
        &mut self,
        target: &Url,
        cancel: &CancellationToken,
    ) -> Result<Option<MainPage>, AuditError> {
        self.advance(Stage::Phase1Fetch);

        let page = tokio::select! {
            _ = cancel.cancelled() => {
                info!("cancelled during main fetch");
                return Ok(None);
            }
            page = self.deps.web.fetch_page(target) => page?,
        };

        let info = extract_page(&page.body, &page.effective_url);
        let main = MainPage {
            status_code: page.status_code,
            info,
        };
        self.advance(Stage::Phase1Done);

        info!(
            title = %main.info.title,
            status = main.status_code,
            html_version = %main.info.html_version,
            candidates = main.info.links.len(),
            "phase 1 done"
        );
        // links are not verified yet, so the payload carries none
        let partial = self.build_record(&main);
        self.deps.publish(
            EventKind::HalfCompleted,
            EventPayload::for_job(&self.job).with_record(&partial),
        );
        Ok(Some(main))
    }

    // Phase 2. None means the token fired between probes.
    async fn verify_links(
        &mut self,
        target: &Url,
        candidates: &[CandidateLink],
        cancel: &CancellationToken,
    ) -> Option<Vec<Link>> {
        self.advance(Stage::Phase2Verify);

        let candidates = dedupe(candidates.to_vec());
        debug!(distinct = candidates.len(), "verifying links");

        let web = self.deps.web.clone();
        let mut probes = stream::iter(candidates)
            .map(|candidate| {
                let web = web.clone();
                async move {
                    let outcome = match web.probe(&candidate.url).await {
                        Ok(status_code) => ProbeOutcome {
                            status_code,
                            reachable: true,
                        },
                        Err(e) => {
                            debug!(error = %e, "link probe failed");
                            ProbeOutcome::from(&e)
                        }
                    };
                    (candidate, outcome)
                }
            })
            .buffer_unordered(self.deps.probe_concurrency);

        // Only this loop touches `links`, so collecting needs no lock
        let mut links = Vec::new();
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!(checked = links.len(), "cancelled during link verification");
                    return None;
                }
                next = probes.next() => match next {
                    Some((candidate, outcome)) => links.push(classify_link(target, &candidate, &outcome)),
                    None => break,
                },
            }
        }

        links.sort_by(|a, b| a.kind.cmp(&b.kind).then_with(|| a.link.cmp(&b.link)));
        Some(links)
    }

    fn build_record(&self, main: &MainPage) -> UrlRecord {
        UrlRecord {
            id: self.job.url_id,
            url: self.job.target.clone(),
            status: UrlStatus::Done,
            title: main.info.title.clone(),
            status_code: main.status_code,
            html_version: main.info.html_version.clone(),
            login_form: main.info.login_form,
            tags: main.info.histogram.to_tags(),
            links: Vec::new(),
            job_id: Some(self.job.id.clone()),
        }
    }

    // Writes the terminal state. Calling it again after a terminal stage is
    // a no-op, so a job gets at most one terminal write.
    async fn finalize_with(&mut self, outcome: Outcome) -> Result<(), AuditError> {
        if self.stage.is_terminal() {
            debug!(stage = %self.stage, "already finalized");
            return Ok(());
        }

        match outcome {
            Outcome::Completed(record) => match self.persist_success(&record).await {
                Ok(()) => {
                    self.advance(Stage::Completed);
                    info!(
                        duration_ms = self.job.duration_ms.unwrap_or_default(),
                        links = record.links.len(),
                        "crawl completed"
                    );
                    self.deps.publish(
                        EventKind::Completed,
                        EventPayload::for_job(&self.job).with_record(&record),
                    );
                    Ok(())
                }
                Err(e) => {
                    error!(error = %e, "failed to save crawl results");
                    self.finalize_failed(e).await
                }
            },
            Outcome::Cancelled => self.finalize_cancelled().await,
            Outcome::Failed(e) => self.finalize_failed(e).await,
        }
    }

    // The result goes to the URL record in one update, then the job
    async fn persist_success(&mut self, record: &UrlRecord) -> Result<(), AuditError> {
        self.deps.urls.update_url(record).await?;
        let mut job = self.job.clone();
        job.mark_completed()?;
        self.deps.jobs.update_job(&job).await?;
        self.job = job;
        Ok(())
    }

    async fn finalize_cancelled(&mut self) -> Result<(), AuditError> {
        if let Err(e) = self.job.mark_cancelled() {
            warn!(error = %e, "job could not be marked cancelled");
        }
        self.advance(Stage::Cancelled);

        let failures = self.write_terminal(UrlStatus::Cancelled).await;
        info!("crawl cancelled");
        self.deps
            .publish(EventKind::Cancelled, EventPayload::for_job(&self.job));

        match failures {
            None => Err(AuditError::Cancelled),
            Some(compensating) => Err(AuditError::PartialFailure {
                primary: AuditError::Cancelled.to_string(),
                compensating,
            }),
        }
    }

    async fn finalize_failed(&mut self, cause: AuditError) -> Result<(), AuditError> {
        let message = cause.to_string();
        if let Err(e) = self.job.mark_error(message.clone()) {
            warn!(error = %e, "job could not be marked as failed");
        }
        self.advance(Stage::Error);

        let failures = self.write_terminal(UrlStatus::Error).await;
        error!(error = %message, "crawl failed");
        self.deps
            .publish(EventKind::Error, EventPayload::for_job(&self.job));

        match failures {
            None => Err(cause),
            Some(compensating) => Err(AuditError::PartialFailure {
                primary: message,
                compensating,
            }),
        }
    }

    // Attempts both terminal writes, the job record and the URL status.
    // Returns a description of whatever failed.
    async fn write_terminal(&self, url_status: UrlStatus) -> Option<String> {
        let mut failures = Vec::new();
        if let Err(e) = self.deps.jobs.update_job(&self.job).await {
            failures.push(format!("job record: {}", e));
        }
        if let Err(e) = self
            .deps
            .urls
            .update_url_status(self.job.url_id, url_status)
            .await
        {
            failures.push(format!("url status: {}", e));
        }

        if failures.is_empty() {
            None
        } else {
            let joined = failures.join("; ");
            error!(failures = %joined, "terminal status write failed");
            Some(joined)
        }
    }

    fn advance(&mut self, next: Stage) {
        if self.stage.can_advance_to(next) {
            debug!(from = %self.stage, to = %next, "stage");
            self.stage = next;
        } else {
            warn!(from = %self.stage, to = %next, "ignored backwards stage transition");
        }
    }
}

// Sorts by URL and drops adjacent duplicates. A URL that appeared both as a
// relative and an absolute href keeps the relative flag.
fn dedupe(mut candidates: Vec<CandidateLink>) -> Vec<CandidateLink> {
    candidates.sort_by(|a, b| a.url.cmp(&b.url));
    candidates.dedup_by(|later, kept| {
        if later.url == kept.url {
            kept.relative |= later.relative;
            true
        } else {
            false
        }
    });
    candidates
}
