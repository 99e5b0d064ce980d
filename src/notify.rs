// src/notify.rs
// =============================================================================
// Lifecycle events and the capability that publishes them.
//
// The pipeline calls Notifier::publish synchronously at each step, so the
// events of one job come out in pipeline order:
//   queued < started < half_completed < completed | cancelled | error
// Delivery is fire-and-forget: no acknowledgement, no replay, and nothing
// is promised about ordering between different jobs.
// =============================================================================

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

use crate::model::{CrawlJob, JobId, Link, Tag, UrlRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EventKind {
    Queued,
    Started,
    HalfCompleted,
    Completed,
    Error,
    Cancelled,
}

impl EventKind {
    // Event names as subscribers see them
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::Queued => "crawl_queued",
            EventKind::Started => "crawl_started",
            EventKind::HalfCompleted => "crawl_half_completed",
            EventKind::Completed => "crawl_completed",
            EventKind::Error => "crawl_error",
            EventKind::Cancelled => "crawl_cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, EventKind::Completed | EventKind::Error | EventKind::Cancelled)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventPayload {
    pub job_id: String,
    pub url: String,
    pub url_id: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub title: String,
    #[serde(skip_serializing_if = "is_zero")]
    pub status_code: u16,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub html_version: String,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub login_form: bool,
    #[serde(skip_serializing_if = "is_zero_usize")]
    pub links_count: usize,
    #[serde(skip_serializing_if = "is_zero_usize")]
    pub tags_count: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<Tag>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub links: Vec<Link>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

fn is_zero(value: &u16) -> bool {
    *value == 0
}

fn is_zero_usize(value: &usize) -> bool {
    *value == 0
}

impl EventPayload {
    pub fn for_job(job: &CrawlJob) -> Self {
        EventPayload {
            job_id: job.id.to_string(),
            url: job.target.clone(),
            url_id: job.url_id.to_string(),
            status: job.status.to_string(),
            started_at: job.started_at,
            completed_at: job.completed_at,
            error: job.error_message.clone(),
            ..Default::default()
        }
    }

    // Copies the crawl result into the payload. Links are left empty when
    // the record has none yet (the half_completed case).
    pub fn with_record(mut self, record: &UrlRecord) -> Self {
        self.title = record.title.clone();
        self.status_code = record.status_code;
        self.html_version = record.html_version.clone();
        self.login_form = record.login_form;
        self.tags_count = record.tags.len();
        self.tags = record.tags.clone();
        self.links_count = record.links.len();
        self.links = record.links.clone();
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CrawlEvent {
    pub kind: EventKind,
    pub payload: EventPayload,
}

impl CrawlEvent {
    pub fn new(kind: EventKind, payload: EventPayload) -> Self {
        CrawlEvent { kind, payload }
    }

    pub fn name(&self) -> &'static str {
        self.kind.name()
    }

    pub fn job_id(&self) -> JobId {
        JobId::from(self.payload.job_id.as_str())
    }
}

/// Publishes lifecycle events to whoever is listening.
pub trait Notifier: Send + Sync {
    fn publish(&self, event: CrawlEvent);
}

// Fan-out over a tokio broadcast channel. Late subscribers miss earlier
// events, and a slow subscriber that falls behind the channel capacity
// loses the oldest ones.
#[derive(Debug, Clone)]
pub struct BroadcastNotifier {
    sender: broadcast::Sender<CrawlEvent>,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        BroadcastNotifier { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CrawlEvent> {
        self.sender.subscribe()
    }
}

impl Default for BroadcastNotifier {
    fn default() -> Self {
        Self::new(256)
    }
}

impl Notifier for BroadcastNotifier {
    fn publish(&self, event: CrawlEvent) {
        let name = event.name();
        let job_id = event.payload.job_id.clone();
        // Err only means nobody is subscribed right now
        match self.sender.send(event) {
            Ok(receivers) => debug!(event = name, job_id = %job_id, receivers, "broadcast event"),
            Err(_) => debug!(event = name, job_id = %job_id, "no subscribers for event"),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{LinkKind, UrlStatus};

    #[test]
    fn test_event_names() {
        assert_eq!(EventKind::HalfCompleted.name(), "crawl_half_completed");
        assert!(EventKind::Cancelled.is_terminal());
        assert!(!EventKind::Started.is_terminal());
    }

    #[test]
    fn test_payload_skips_empty_fields() {
        let job = CrawlJob::new("http://example.com", 7);
        let payload = EventPayload::for_job(&job);
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["urlId"], "7");
        assert_eq!(json["status"], "queued");
        assert!(json.get("title").is_none());
        assert!(json.get("links").is_none());
        assert!(json.get("loginForm").is_none());
    }

    #[test]
    fn test_payload_with_record() {
        let job = CrawlJob::new("http://example.com", 7);
        let mut record = UrlRecord::queued("http://example.com");
        record.status = UrlStatus::Done;
        record.title = "Example".to_string();
        record.login_form = true;
        record.links.push(Link {
            link: "http://example.com/a".to_string(),
            kind: LinkKind::Internal,
            status_code: 200,
        });
        let payload = EventPayload::for_job(&job).with_record(&record);
        assert_eq!(payload.links_count, 1);
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["title"], "Example");
        assert_eq!(json["loginForm"], true);
        assert_eq!(json["links"][0]["type"], "internal");
    }

    #[tokio::test]
    async fn test_broadcast_reaches_subscriber() {
        let notifier = BroadcastNotifier::new(8);
        // publishing with no subscribers is not an error
        notifier.publish(CrawlEvent::new(EventKind::Queued, EventPayload::default()));

        let mut rx = notifier.subscribe();
        let job = CrawlJob::new("http://example.com", 1);
        notifier.publish(CrawlEvent::new(EventKind::Started, EventPayload::for_job(&job)));
        let event = rx.recv().await.unwrap();
        assert_eq!(event.kind, EventKind::Started);
        assert_eq!(event.job_id(), job.id);
    }
}
