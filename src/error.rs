// src/error.rs
// =============================================================================
// Error types for the library.
//
// AuditError covers everything the job API can report. Per-link failures
// (LinkProbeFailure) never reach a caller as an error: the pipeline turns
// them into an "inaccessible" link. Every other kind ends the job and is
// broadcast with its Display message.
//
// StoreError is what persistence adapters return. It converts into
// AuditError::Persistence through #[from], so `?` works across the seam.
// =============================================================================

use thiserror::Error;

use crate::model::{JobId, JobStatus};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuditError {
    #[error("a crawl of {target} is already in progress")]
    AlreadyInProgress { target: String },

    #[error("crawl job {0} not found")]
    NotFound(JobId),

    #[error("invalid target '{target}': {reason}")]
    InvalidTarget { target: String, reason: String },

    #[error("failed to fetch {url}: {reason}")]
    FetchFailure { url: String, reason: String },

    #[error("link {url} could not be checked: {reason}")]
    LinkProbeFailure {
        url: String,
        status_code: u16,
        reason: String,
    },

    #[error("failed to save crawl results: {0}")]
    Persistence(#[from] StoreError),

    #[error("{primary}; compensating status write also failed: {compensating}")]
    PartialFailure {
        primary: String,
        compensating: String,
    },

    #[error("crawl job was cancelled")]
    Cancelled,

    #[error("crawl task panicked: {0}")]
    PanicRecovered(String),

    #[error("task queue is full, submission timed out")]
    QueueFull,

    #[error("worker pool is shut down")]
    PoolClosed,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid job transition {from} -> {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_converts() {
        fn save() -> Result<(), AuditError> {
            Err(StoreError::Unavailable("disk full".to_string()))?;
            Ok(())
        }
        let err = save().unwrap_err();
        assert_eq!(
            err.to_string(),
            "failed to save crawl results: store unavailable: disk full"
        );
    }

    #[test]
    fn test_transition_message() {
        let err = AuditError::InvalidTransition {
            from: JobStatus::Completed,
            to: JobStatus::Running,
        };
        assert_eq!(err.to_string(), "invalid job transition completed -> running");
    }
}
