// src/model.rs
// =============================================================================
// The data that flows between the job manager, the crawl pipeline and the
// persistence layer.
//
// - CrawlJob: one execution attempt of the pipeline for a target
// - UrlRecord: the crawl result for a target, owned by the store
// - Link / Tag: pieces of a UrlRecord
//
// Status values only move forward. CrawlJob enforces that through its
// mark_* methods, which refuse backwards or repeated terminal transitions.
// =============================================================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

use crate::error::AuditError;

/// Numeric id of a URL record, assigned by the store.
pub type UrlId = u64;

// Opaque job identifier. A target can have many historical jobs, so the job
// id is separate from the URL record id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn generate() -> Self {
        JobId(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for JobId {
    fn from(value: &str) -> Self {
        JobId(value.to_string())
    }
}

impl From<String> for JobId {
    fn from(value: String) -> Self {
        JobId(value)
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Cancelled,
    Error,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Cancelled => "cancelled",
            JobStatus::Error => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Cancelled | JobStatus::Error)
    }

    // queued -> running -> completed, and cancelled/error from any
    // non-terminal state. Nothing leaves a terminal state.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        match (self, next) {
            (JobStatus::Queued, JobStatus::Running) => true,
            (JobStatus::Running, JobStatus::Completed) => true,
            (from, JobStatus::Cancelled | JobStatus::Error) => !from.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrawlJob {
    pub id: JobId,
    /// The URL submitted for crawling
    pub target: String,
    pub url_id: UrlId,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl CrawlJob {
    pub fn new(target: impl Into<String>, url_id: UrlId) -> Self {
        CrawlJob {
            id: JobId::generate(),
            target: target.into(),
            url_id,
            status: JobStatus::Queued,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            duration_ms: None,
            error_message: None,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self.status, JobStatus::Queued | JobStatus::Running)
    }

    // Milliseconds spent running so far: up to now while active, up to
    // completed_at once terminal. Zero when the job never started.
    pub fn running_duration_ms(&self) -> i64 {
        let Some(started) = self.started_at else {
            return 0;
        };
        let end = self.completed_at.unwrap_or_else(Utc::now);
        (end - started).num_milliseconds()
    }

    pub fn mark_running(&mut self) -> Result<(), AuditError> {
        self.transition(JobStatus::Running)?;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    pub fn mark_completed(&mut self) -> Result<(), AuditError> {
        self.transition(JobStatus::Completed)?;
        self.close();
        Ok(())
    }

    pub fn mark_cancelled(&mut self) -> Result<(), AuditError> {
        self.transition(JobStatus::Cancelled)?;
        self.close();
        Ok(())
    }

    pub fn mark_error(&mut self, message: impl Into<String>) -> Result<(), AuditError> {
        self.transition(JobStatus::Error)?;
        self.error_message = Some(message.into());
        self.close();
        Ok(())
    }

    fn transition(&mut self, next: JobStatus) -> Result<(), AuditError> {
        if !self.status.can_transition_to(next) {
            return Err(AuditError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    // completed_at is set exactly when the job becomes terminal
    fn close(&mut self) {
        let now = Utc::now();
        self.completed_at = Some(now);
        self.duration_ms = self.started_at.map(|started| (now - started).num_milliseconds());
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UrlStatus {
    Queued,
    Running,
    Done,
    Error,
    Cancelled,
}

impl UrlStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UrlStatus::Queued => "queued",
            UrlStatus::Running => "running",
            UrlStatus::Done => "done",
            UrlStatus::Error => "error",
            UrlStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_in_progress(&self) -> bool {
        matches!(self, UrlStatus::Queued | UrlStatus::Running)
    }
}

impl fmt::Display for UrlStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkKind {
    Internal,
    External,
    Inaccessible,
}

impl LinkKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkKind::Internal => "internal",
            LinkKind::External => "external",
            LinkKind::Inaccessible => "inaccessible",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    pub link: String,
    #[serde(rename = "type")]
    pub kind: LinkKind,
    /// Observed HTTP status, 0 when no response was received
    pub status_code: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub tag_name: String,
    pub count: u32,
}

// Occurrence count per tag name. Backed by a BTreeMap so that the output
// order is stable across runs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagHistogram(BTreeMap<String, u32>);

impl TagHistogram {
    pub fn increment(&mut self, tag_name: &str) {
        *self.0.entry(tag_name.to_string()).or_insert(0) += 1;
    }

    pub fn get(&self, tag_name: &str) -> Option<u32> {
        self.0.get(tag_name).copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn to_tags(&self) -> Vec<Tag> {
        self.0
            .iter()
            .map(|(name, count)| Tag {
                tag_name: name.clone(),
                count: *count,
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrlRecord {
    pub id: UrlId,
    pub url: String,
    pub status: UrlStatus,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub status_code: u16,
    #[serde(default)]
    pub html_version: String,
    #[serde(default)]
    pub login_form: bool,
    #[serde(default)]
    pub tags: Vec<Tag>,
    #[serde(default)]
    pub links: Vec<Link>,
    /// Job that last crawled this record
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<JobId>,
}

impl UrlRecord {
    // A fresh record for a target that has never been crawled. The store
    // assigns the real id on create.
    pub fn queued(url: impl Into<String>) -> Self {
        UrlRecord {
            id: 0,
            url: url.into(),
            status: UrlStatus::Queued,
            title: String::new(),
            status_code: 0,
            html_version: String::new(),
            login_form: false,
            tags: Vec::new(),
            links: Vec::new(),
            job_id: None,
        }
    }

    // Only a finished crawl with a title counts as a reusable result
    pub fn is_reusable(&self) -> bool {
        self.status == UrlStatus::Done && !self.title.is_empty()
    }

    pub fn count_links(&self, kind: LinkKind) -> usize {
        self.links.iter().filter(|l| l.kind == kind).count()
    }
}
