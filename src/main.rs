// src/main.rs
// =============================================================================
// This is the entry point of the CLI.
//
// What happens here:
// 1. Parse command-line arguments using clap and install logging
// 2. Build the job manager (in-memory store, broadcast notifier)
// 3. Start one crawl job per target and wait for all of them
//    (Ctrl-C cancels whatever is still running)
// 4. Print the results and exit with a code:
//    0 = every job completed with no inaccessible links
//    1 = an inaccessible link, or a job that did not complete
//    2 = internal error
// =============================================================================

mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cli::{Cli, Commands};
use link_auditor::jobs::{JobResult, UrlSummary};
use link_auditor::model::{JobId, Link, LinkKind};
use link_auditor::notify::BroadcastNotifier;
use link_auditor::store::MemoryStore;
use link_auditor::{AuditConfig, JobManager};

#[tokio::main]
async fn main() {
    let exit_code = match run().await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            2
        }
    };

    std::process::exit(exit_code);
}

async fn run() -> Result<i32> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Crawl {
            targets,
            json,
            events,
            config,
        } => handle_crawl(&targets, json, events, config.to_config()).await,
    }
}

// Logs go to stderr so that --json output on stdout stays clean
fn init_tracing(verbose: bool) {
    let default_filter = if verbose { "info,link_auditor=debug" } else { "warn" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

// One line of the final report
#[derive(Debug, Serialize)]
struct TargetReport {
    target: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    job_id: Option<JobId>,
    status: String,
    /// Result came from an earlier crawl
    existing: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    duration_ms: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<UrlSummary>,
    links: Vec<Link>,
}

impl TargetReport {
    fn rejected(target: &str, error: String) -> Self {
        TargetReport {
            target: target.to_string(),
            job_id: None,
            status: "rejected".to_string(),
            existing: false,
            duration_ms: None,
            error: Some(error),
            summary: None,
            links: Vec::new(),
        }
    }

    fn from_result(result: JobResult, existing: bool) -> Self {
        let error = result
            .error
            .as_ref()
            .map(|e| e.to_string())
            .or_else(|| result.job.error_message.clone());
        let (summary, links) = match &result.record {
            Some(record) => (Some(UrlSummary::from(record)), record.links.clone()),
            None => (None, Vec::new()),
        };
        TargetReport {
            target: result.job.target.clone(),
            job_id: Some(result.job.id.clone()),
            status: result.job.status.to_string(),
            existing,
            duration_ms: result.job.duration_ms,
            error,
            summary,
            links,
        }
    }

    fn is_clean(&self) -> bool {
        self.status == "completed"
            && self.links.iter().all(|l| l.kind != LinkKind::Inaccessible)
    }
}

async fn handle_crawl(
    targets: &[String],
    json: bool,
    events: bool,
    config: AuditConfig,
) -> Result<i32> {
    let store = Arc::new(MemoryStore::new());
    let notifier = Arc::new(BroadcastNotifier::default());
    if events {
        spawn_event_printer(&notifier);
    }

    let manager = JobManager::new(&config, store.clone(), store, notifier)
        .context("failed to start the job manager")?;

    if !json {
        println!(
            "🔍 Auditing {} target(s) with {} worker(s)",
            targets.len(),
            config.workers
        );
    }

    // Submit everything first so the pool can run jobs side by side
    let mut reports = Vec::new();
    let mut handles = Vec::new();
    for target in targets {
        match manager.start_crawl(target).await {
            Ok(handle) => handles.push(handle),
            Err(e) => {
                warn!(target = %target, error = %e, "crawl rejected");
                reports.push(TargetReport::rejected(target, e.to_string()));
            }
        }
    }

    let job_ids: Vec<JobId> = handles.iter().map(|h| h.job_id().clone()).collect();
    let interrupt = manager.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, cancelling running jobs");
            for id in &job_ids {
                interrupt.cancel_job(id).await;
            }
        }
    });

    let waits = handles.into_iter().map(|handle| async move {
        let existing = handle.is_existing();
        let target = handle.job().target.clone();
        (target, existing, handle.wait().await)
    });
    for (target, existing, outcome) in futures::future::join_all(waits).await {
        match outcome {
            Ok(result) => reports.push(TargetReport::from_result(result, existing)),
            Err(e) => reports.push(TargetReport::rejected(&target, e.to_string())),
        }
    }

    if !manager.shutdown(manager.shutdown_timeout()).await {
        warn!("some jobs were still running at shutdown");
    }
    info!(targets = reports.len(), "audit finished");

    print_results(&reports, json)?;

    if reports.iter().all(TargetReport::is_clean) {
        Ok(0)
    } else {
        Ok(1)
    }
}

// Streams lifecycle events to stderr as JSON lines
fn spawn_event_printer(notifier: &BroadcastNotifier) {
    let mut events = notifier.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => match serde_json::to_string(&event.payload) {
                    Ok(payload) => eprintln!("{} {}", event.name(), payload),
                    Err(e) => warn!(error = %e, "could not serialize event"),
                },
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "event printer fell behind"),
                Err(RecvError::Closed) => break,
            }
        }
    });
}

fn print_results(reports: &[TargetReport], json: bool) -> Result<()> {
    if json {
        let json_output = serde_json::to_string_pretty(reports)?;
        println!("{}", json_output);
    } else {
        print_table(reports);
    }
    Ok(())
}

fn print_table(reports: &[TargetReport]) {
    println!();
    println!("{:<50} {:<12} {:<8} {:<30}", "TARGET", "STATUS", "LINKS", "TITLE / ERROR");
    println!("{}", "=".repeat(103));
    for report in reports {
        let detail = match (&report.error, &report.summary) {
            (Some(error), _) => error.clone(),
            (None, Some(summary)) => summary.title.clone(),
            (None, None) => String::new(),
        };
        let status = if report.existing {
            format!("{} (cached)", report.status)
        } else {
            report.status.clone()
        };
        println!(
            "{:<50} {:<12} {:<8} {:<30}",
            truncate(&report.target, 47),
            status,
            report.links.len(),
            truncate(&detail, 60)
        );
    }

    for report in reports.iter().filter(|r| !r.links.is_empty()) {
        println!();
        println!("🔗 {}", report.target);
        if let Some(summary) = &report.summary {
            println!(
                "   HTML {} | HTTP {} | login form: {} | {} tag kind(s)",
                summary.html_version,
                summary.status_code,
                if summary.login_form { "yes" } else { "no" },
                summary.tags_count
            );
        }
        println!("   {:<70} {:<14} {:<6}", "LINK", "TYPE", "CODE");
        for link in &report.links {
            println!(
                "   {:<70} {:<14} {:<6}",
                truncate(&link.link, 67),
                format_kind(link.kind),
                link.status_code
            );
        }
    }

    println!();
    let links: Vec<&Link> = reports.iter().flat_map(|r| r.links.iter()).collect();
    let count = |kind: LinkKind| links.iter().filter(|l| l.kind == kind).count();
    let completed = reports.iter().filter(|r| r.status == "completed").count();

    println!("📊 Summary:");
    println!("   ✅ Completed jobs: {}/{}", completed, reports.len());
    println!("   🏠 Internal: {}", count(LinkKind::Internal));
    println!("   🌐 External: {}", count(LinkKind::External));
    println!("   ❌ Inaccessible: {}", count(LinkKind::Inaccessible));
}

fn format_kind(kind: LinkKind) -> String {
    match kind {
        LinkKind::Internal => "🏠 internal".to_string(),
        LinkKind::External => "🌐 external".to_string(),
        LinkKind::Inaccessible => "❌ inaccessible".to_string(),
    }
}

// Shortens long text for the table, on a char boundary
fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() > max {
        let cut: String = text.chars().take(max).collect();
        format!("{}...", cut)
    } else {
        text.to_string()
    }
}
