// src/crawl/stage.rs
// =============================================================================
// Pipeline states and cancellation checkpoints.
//
//   Queued -> Running -> Phase1Fetch -> Phase1Done -> Phase2Verify -> Completed
//
// Cancelled and Error are reachable from any non-terminal state. A stage
// never moves backwards.
// =============================================================================

use std::fmt;
use tokio_util::sync::CancellationToken;

use crate::model::JobStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    Queued,
    Running,
    Phase1Fetch,
    Phase1Done,
    Phase2Verify,
    Completed,
    Cancelled,
    Error,
}

impl Stage {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::Completed | Stage::Cancelled | Stage::Error)
    }

    // The coarse job status persisted for this stage
    pub fn job_status(&self) -> JobStatus {
        match self {
            Stage::Queued => JobStatus::Queued,
            Stage::Running | Stage::Phase1Fetch | Stage::Phase1Done | Stage::Phase2Verify => {
                JobStatus::Running
            }
            Stage::Completed => JobStatus::Completed,
            Stage::Cancelled => JobStatus::Cancelled,
            Stage::Error => JobStatus::Error,
        }
    }

    pub fn can_advance_to(&self, next: Stage) -> bool {
        if self.is_terminal() {
            return false;
        }
        match next {
            Stage::Cancelled | Stage::Error => true,
            // the happy path moves exactly one step at a time
            _ => next as u8 == *self as u8 + 1,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Queued => "QUEUED",
            Stage::Running => "RUNNING",
            Stage::Phase1Fetch => "PHASE1_FETCH",
            Stage::Phase1Done => "PHASE1_DONE",
            Stage::Phase2Verify => "PHASE2_VERIFY",
            Stage::Completed => "COMPLETED",
            Stage::Cancelled => "CANCELLED",
            Stage::Error => "ERROR",
        };
        f.write_str(name)
    }
}

// Result of looking at the cancellation token at a checkpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Checkpoint {
    Continue,
    Stop,
}

impl Checkpoint {
    pub fn check(token: &CancellationToken) -> Self {
        if token.is_cancelled() {
            Checkpoint::Stop
        } else {
            Checkpoint::Continue
        }
    }
}
