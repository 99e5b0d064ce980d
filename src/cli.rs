// src/cli.rs
// =============================================================================
// Command-line interface, defined with clap's derive API.
//
// Every tuning knob is a flag with a LINK_AUDITOR_* environment variable
// fallback. ConfigArgs turns the parsed flags into an AuditConfig.
// =============================================================================

use clap::{Args, Parser, Subcommand};
use std::time::Duration;

use link_auditor::config::default_user_agent;
use link_auditor::AuditConfig;

#[derive(Parser, Debug)]
#[command(
    name = "link-auditor",
    version,
    about = "Crawl pages in the background and classify their outbound links",
    long_about = "link-auditor fetches each target page once, extracts its title, doctype, \
                  login form and heading/paragraph counts, then probes every outbound link \
                  and sorts it into internal, external or inaccessible."
)]
pub struct Cli {
    /// Log progress to stderr (RUST_LOG overrides this)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Crawl one or more pages and report their links
    ///
    /// Example: link-auditor crawl https://example.com https://example.org --workers 2
    Crawl {
        /// Pages to crawl; each becomes its own job
        #[arg(required = true)]
        targets: Vec<String>,

        /// Output results in JSON format instead of a table
        #[arg(long)]
        json: bool,

        /// Print every lifecycle event (crawl_started, ...) to stderr as it happens
        #[arg(long)]
        events: bool,

        #[command(flatten)]
        config: ConfigArgs,
    },
}

#[derive(Args, Debug, Clone)]
pub struct ConfigArgs {
    /// Jobs that may run at the same time
    #[arg(long, env = "LINK_AUDITOR_WORKERS", default_value_t = 5)]
    pub workers: usize,

    /// Jobs that may wait for a free worker
    #[arg(long, env = "LINK_AUDITOR_QUEUE_CAPACITY", default_value_t = 64)]
    pub queue_capacity: usize,

    /// Seconds a submission waits on a full queue
    #[arg(long, env = "LINK_AUDITOR_SUBMIT_TIMEOUT_SECS", default_value_t = 5)]
    pub submit_timeout_secs: u64,

    /// Per-request timeout in seconds (main fetch and link probes)
    #[arg(long, env = "LINK_AUDITOR_TIMEOUT_SECS", default_value_t = 10)]
    pub timeout_secs: u64,

    #[arg(long, env = "LINK_AUDITOR_MAX_REDIRECTS", default_value_t = 5)]
    pub max_redirects: usize,

    /// Link probes in flight at once within one job
    #[arg(long, env = "LINK_AUDITOR_PROBE_CONCURRENCY", default_value_t = 8)]
    pub probe_concurrency: usize,

    /// User-Agent header sent with every request
    #[arg(long, env = "LINK_AUDITOR_USER_AGENT")]
    pub user_agent: Option<String>,

    /// Seconds to wait for in-flight jobs on shutdown
    #[arg(long, env = "LINK_AUDITOR_SHUTDOWN_TIMEOUT_SECS", default_value_t = 30)]
    pub shutdown_timeout_secs: u64,
}

impl ConfigArgs {
    pub fn to_config(&self) -> AuditConfig {
        AuditConfig {
            workers: self.workers,
            queue_capacity: self.queue_capacity,
            submit_timeout: Duration::from_secs(self.submit_timeout_secs),
            request_timeout: Duration::from_secs(self.timeout_secs),
            max_redirects: self.max_redirects,
            probe_concurrency: self.probe_concurrency,
            user_agent: self.user_agent.clone().unwrap_or_else(default_user_agent),
            shutdown_timeout: Duration::from_secs(self.shutdown_timeout_secs),
        }
    }
}
