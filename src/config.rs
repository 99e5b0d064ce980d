// src/config.rs
// =============================================================================
// Runtime settings for the job manager, the worker pool and the HTTP client.
//
// The CLI fills this struct from flags / LINK_AUDITOR_* environment
// variables (see cli.rs); library users build it directly or start from
// AuditConfig::default().
// =============================================================================

use std::time::Duration;

use crate::error::AuditError;

#[derive(Debug, Clone)]
pub struct AuditConfig {
    /// Number of crawl jobs that may run at the same time
    pub workers: usize,
    /// Jobs waiting for a free worker before submissions start to block
    pub queue_capacity: usize,
    /// How long a submission may block on a full queue
    pub submit_timeout: Duration,
    /// Timeout for every outbound request (main fetch and probes)
    pub request_timeout: Duration,
    /// Redirects followed before a request is treated as failed
    pub max_redirects: usize,
    /// Link probes in flight at once within a single job
    pub probe_concurrency: usize,
    pub user_agent: String,
    /// How long shutdown waits for in-flight jobs
    pub shutdown_timeout: Duration,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            workers: 5,
            queue_capacity: 64,
            submit_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(10),
            max_redirects: 5,
            probe_concurrency: 8,
            user_agent: default_user_agent(),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl AuditConfig {
    pub fn validate(&self) -> Result<(), AuditError> {
        let invalid = |reason: &str| AuditError::InvalidConfig(reason.to_string());
        if self.workers == 0 {
            return Err(invalid("workers must be at least 1"));
        }
        if self.queue_capacity == 0 {
            return Err(invalid("queue capacity must be at least 1"));
        }
        if self.probe_concurrency == 0 {
            return Err(invalid("probe concurrency must be at least 1"));
        }
        Ok(())
    }
}

pub fn default_user_agent() -> String {
    format!("link-auditor/{}", env!("CARGO_PKG_VERSION"))
}
