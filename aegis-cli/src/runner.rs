//! Scan execution and terminal output

use std::net::SocketAddr;

use aegis_core::api::StatusServer;
use aegis_core::state::{RepoSource, Severity};
use aegis_core::{OrchestratorConfig, ScanRequest, ScanSession, Scheduler, SessionEvent};
use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::args::ScanArgs;

/// Build the scan request from command-line flags
pub fn build_request(args: &ScanArgs) -> ScanRequest {
    let mut request = ScanRequest::new(args.mode);
    if let Some(ref url) = args.repo {
        let mut repo = RepoSource::new(url.clone());
        if let Some(ref branch) = args.branch {
            repo = repo.with_branch(branch.clone());
        }
        if let Some(ref token) = args.token {
            repo = repo.with_token(token.clone());
        }
        request = request.with_repo(repo);
    }
    if let Some(ref url) = args.target_url {
        request = request.with_target_url(url.clone());
    }
    if let Some(concurrency) = args.concurrency {
        request = request.with_concurrency(concurrency);
    }
    if !args.agents.is_empty() {
        request = request.with_enabled_agents(args.agents.iter().copied());
    }
    request
}

/// Run one scan to completion, streaming progress to stdout.
///
/// Ctrl-C requests cancellation; the scan still drains to a terminal state.
pub async fn run_scan(config: OrchestratorConfig, args: ScanArgs) -> Result<ScanSession> {
    let scheduler = Scheduler::from_config(&config)?;
    let janitor = scheduler.spawn_janitor(
        config.scheduler.janitor_interval(),
        config.scheduler.retention(),
    );

    let server = if args.serve {
        let addr: SocketAddr = config
            .server
            .bind
            .parse()
            .with_context(|| format!("invalid server bind address: {}", config.server.bind))?;
        let server = StatusServer::start(scheduler.clone(), addr).await?;
        println!("Status API listening on {}", server.url());
        Some(server)
    } else {
        None
    };

    let snapshot = scheduler.start_scan(build_request(&args))?;
    let scan_id = snapshot.scan_id.clone();
    println!(
        "Scan {} started ({} mode): {}",
        scan_id,
        snapshot.mode,
        snapshot
            .agents()
            .iter()
            .map(|a| a.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    );

    let mut subscription = scheduler.subscribe(&scan_id)?;
    let mut cancelling = false;
    loop {
        tokio::select! {
            event = subscription.next() => match event {
                Some(event) => print_event(&event),
                None => break,
            },
            signal = tokio::signal::ctrl_c(), if !cancelling => {
                if let Err(e) = signal {
                    warn!("Failed to listen for ctrl-c: {}", e);
                }
                cancelling = true;
                println!("Cancelling scan {}...", scan_id);
                scheduler.cancel(&scan_id)?;
            }
        }
    }

    let session = scheduler.wait(&scan_id).await?;
    info!(scan_id = %scan_id, "Scan finished");

    if let Some(server) = server {
        server.shutdown().await;
    }
    scheduler.shutdown();
    janitor.abort();
    Ok(session)
}

/// Show a stored scan, the latest one when no id is given
pub fn load_status(config: &OrchestratorConfig, scan_id: Option<&str>) -> Result<ScanSession> {
    let scheduler = Scheduler::from_config(config)?;
    match scan_id {
        Some(id) => Ok(scheduler.status(id)?),
        None => scheduler
            .latest()?
            .context("no scans recorded; set output.archive to keep scan history"),
    }
}

fn print_event(event: &SessionEvent) {
    match event {
        SessionEvent::LogAppended { line, .. } => println!("{}", line),
        SessionEvent::FindingAppended { finding, .. } => println!(
            "  [{}] {} ({})",
            finding.severity.as_str().to_uppercase(),
            finding.title,
            finding.source_agent
        ),
        SessionEvent::Snapshot { .. }
        | SessionEvent::TaskUpdated { .. }
        | SessionEvent::ScanFinished { .. } => {}
    }
}

/// Human-readable end-of-scan summary
pub fn render_summary(session: &ScanSession) -> String {
    let mut out = String::new();
    let status = if session.cancelled {
        "cancelled"
    } else if session.finished_at.is_some() {
        "finished"
    } else {
        "running"
    };
    out.push_str(&format!("Scan {} {}\n", session.scan_id, status));
    out.push_str(&format!("Target: {}\n", session.target));
    out.push_str(&format!("Mode: {}\n\n", session.mode));

    out.push_str("Agents:\n");
    for task in &session.agent_tasks {
        let detail = match (task.error, task.message.as_deref()) {
            (Some(kind), Some(msg)) => format!("{} ({})", msg, kind),
            (Some(kind), None) => kind.to_string(),
            (None, Some(msg)) => msg.to_string(),
            (None, None) => String::new(),
        };
        out.push_str(&format!(
            "  {:<12} {:<10} {}\n",
            task.agent.as_str(),
            task.status.as_str(),
            detail
        ));
    }

    let summary = session.findings_summary();
    out.push_str(&format!("\nFindings: {}\n", summary.total()));
    for severity in Severity::DESCENDING {
        let count = summary.count(severity);
        if count > 0 {
            out.push_str(&format!("  {:<14} {}\n", severity.as_str(), count));
        }
    }
    out
}
