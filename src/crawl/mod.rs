// src/crawl/mod.rs
// =============================================================================
// This module runs one crawl job from start to finish.
//
// Features:
// - Two phases: fetch + extract the target page, then verify its links
// - Cooperative cancellation at named checkpoints
// - A single idempotent finalize step that writes the terminal state
//
// The job manager (src/jobs/) wraps a pipeline in a pool task; this module
// knows nothing about pools or registries.
// =============================================================================

mod pipeline;
mod stage;

pub use pipeline::{CrawlPipeline, PipelineDeps};
pub use stage::{Checkpoint, Stage};
