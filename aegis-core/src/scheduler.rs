//! Scan scheduler
//!
//! Runs the selected agents of a scan in waves. Within a wave a bounded pool
//! of workers claims pending tasks; the next wave starts only once every
//! task of the previous one is terminal. All state changes go through the
//! [`SessionStore`], which publishes them to subscribers.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::{Semaphore, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::agents::{
    AdapterRegistry, AdaptivePolicy, AgentContext, EndpointSignalPolicy, PolicyDecision,
    ProgressReporter, ScanRequest, select_agents,
};
use crate::canonical::Canonicalizer;
use crate::config::OrchestratorConfig;
use crate::error::{AdapterError, ErrorKind};
use crate::events::Broadcaster;
use crate::state::archive::SessionArchive;
use crate::state::models::{AgentCategory, AgentName, RepoSource, ScanMode, ScanSession, Wave};
use crate::state::store::{SessionStore, Subscription};
use crate::state::task::AgentStatus;
use crate::tools::executor::ToolExecutor;
use crate::workspace::{GitWorkspace, SourceWorkspaceProvider, Workspace, WorkspaceProvider};
use crate::Result;

/// Default worker pool size per scan
pub const DEFAULT_CONCURRENCY: usize = 3;

/// Handle to a scan that is still running
#[derive(Debug, Clone)]
struct RunHandle {
    cancel: CancellationToken,
    done: watch::Receiver<bool>,
}

/// Per-scan values every worker needs
#[derive(Debug, Clone)]
struct ScanPlan {
    scan_id: String,
    mode: ScanMode,
    target_url: Option<String>,
    workspace: Option<PathBuf>,
    output_dir: PathBuf,
    concurrency: usize,
    cancel: CancellationToken,
}

/// Drives scans from request to `scan_finished`
#[derive(Clone)]
pub struct Scheduler {
    store: Arc<SessionStore>,
    registry: Arc<AdapterRegistry>,
    workspaces: Arc<dyn WorkspaceProvider>,
    policy: Arc<dyn AdaptivePolicy>,
    concurrency: usize,
    output_dir: PathBuf,
    runs: Arc<Mutex<HashMap<String, RunHandle>>>,
    shutdown: CancellationToken,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("registry", &self.registry)
            .field("concurrency", &self.concurrency)
            .field("output_dir", &self.output_dir)
            .finish()
    }
}

impl Scheduler {
    pub fn new(
        store: Arc<SessionStore>,
        registry: AdapterRegistry,
        workspaces: Arc<dyn WorkspaceProvider>,
    ) -> Self {
        Self {
            store,
            registry: Arc::new(registry),
            workspaces,
            policy: Arc::new(EndpointSignalPolicy),
            concurrency: DEFAULT_CONCURRENCY,
            output_dir: std::env::temp_dir().join("aegis_output"),
            runs: Arc::new(Mutex::new(HashMap::new())),
            shutdown: CancellationToken::new(),
        }
    }

    /// Scheduler wired from configuration: archive, built-in adapters and
    /// the local/git workspace provider
    pub fn from_config(config: &OrchestratorConfig) -> Result<Self> {
        let mut store = SessionStore::new(Broadcaster::new(config.scheduler.event_capacity));
        if let Some(ref path) = config.output.archive {
            store = store.with_archive(Arc::new(SessionArchive::open(path)?));
        }
        let git = GitWorkspace::from_config(
            config.output.workspaces_dir.clone(),
            &config.tools,
            &config.workspace,
        );

        Ok(Self::new(
            Arc::new(store),
            AdapterRegistry::with_defaults(config),
            Arc::new(SourceWorkspaceProvider::new(git)),
        )
        .with_concurrency(config.scheduler.concurrency)
        .with_output_dir(config.output.results_dir.clone()))
    }

    pub fn with_policy(mut self, policy: Arc<dyn AdaptivePolicy>) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Tool reports go to `dir/<scan_id>`
    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    /// Validate `request`, create its session and start running it.
    ///
    /// Returns the initial snapshot with every selected agent pending.
    pub fn start_scan(&self, request: ScanRequest) -> Result<ScanSession> {
        let request = request.normalized();
        let agents = select_agents(&request)?;
        let scan_id = Uuid::new_v4().simple().to_string();
        let session = ScanSession::new(
            scan_id.clone(),
            request.mode,
            request.repo.as_ref(),
            request.target_url.as_deref(),
            &agents,
        );
        let snapshot = self.store.create(session)?;

        let cancel = self.shutdown.child_token();
        let (done_tx, done_rx) = watch::channel(false);
        self.runs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                scan_id.clone(),
                RunHandle {
                    cancel: cancel.clone(),
                    done: done_rx,
                },
            );

        info!(
            scan_id = %scan_id,
            mode = %request.mode,
            "Starting scan of {} with {} agents",
            snapshot.target,
            agents.len()
        );

        let scheduler = self.clone();
        tokio::spawn(async move {
            scheduler.run_scan(request, scan_id.clone(), cancel).await;
            scheduler
                .runs
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&scan_id);
            done_tx.send_replace(true);
        });

        Ok(snapshot)
    }

    /// Request cancellation of a scan.
    ///
    /// Running agents are killed and fail with `cancellation_requested`,
    /// pending ones are skipped. Returns `false` if the scan had already
    /// finished or was already cancelled.
    pub fn cancel(&self, scan_id: &str) -> Result<bool> {
        let handle = self.run_handle(scan_id);
        let Some(handle) = handle else {
            // Unknown ids still report not found
            self.store.get(scan_id)?;
            return Ok(false);
        };

        if !self.store.mark_cancelled(scan_id)? {
            return Ok(false);
        }
        info!(scan_id, "Cancellation requested");
        self.store.append_log(scan_id, "Scan cancellation requested")?;
        handle.cancel.cancel();
        self.skip_pending(scan_id, "scan cancelled");
        Ok(true)
    }

    /// Wait for a scan to finish and return its final state
    pub async fn wait(&self, scan_id: &str) -> Result<ScanSession> {
        if let Some(handle) = self.run_handle(scan_id) {
            let mut done = handle.done;
            // Sender dropped means the run task ended
            let _ = done.wait_for(|finished| *finished).await;
        }
        self.store.get(scan_id)
    }

    pub fn status(&self, scan_id: &str) -> Result<ScanSession> {
        self.store.get(scan_id)
    }

    pub fn latest(&self) -> Result<Option<ScanSession>> {
        self.store.latest()
    }

    pub fn subscribe(&self, scan_id: &str) -> Result<Subscription> {
        self.store.subscribe(scan_id)
    }

    /// Ids of scans that are still running
    pub fn active_scans(&self) -> Vec<String> {
        self.runs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    /// Periodically evict finished sessions older than `retention`
    pub fn spawn_janitor(&self, interval: Duration, retention: Duration) -> JoinHandle<()> {
        let store = Arc::clone(&self.store);
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let evicted = store.evict_expired(retention);
                        if !evicted.is_empty() {
                            info!("Evicted {} expired scan sessions", evicted.len());
                        }
                    }
                    _ = shutdown.cancelled() => {
                        debug!("Janitor stopped");
                        break;
                    }
                }
            }
        })
    }

    /// Cancel every running scan and stop the janitor
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    fn run_handle(&self, scan_id: &str) -> Option<RunHandle> {
        self.runs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(scan_id)
            .cloned()
    }

    /// Skip every task of the scan that has not started
    fn skip_pending(&self, scan_id: &str, reason: &str) {
        let Ok(session) = self.store.get(scan_id) else {
            return;
        };
        for agent in session.agents_with_status(AgentStatus::Pending) {
            // A worker may have claimed it in the meantime
            if let Err(e) = self.store.update_task(scan_id, agent, |t| t.skip(reason)) {
                debug!(scan_id, %agent, "Not skipped: {}", e);
            }
        }
    }

    fn log(&self, scan_id: &str, line: impl Into<String>) {
        if let Err(e) = self.store.append_log(scan_id, line) {
            warn!(scan_id, "Failed to append log line: {}", e);
        }
    }

    async fn run_scan(&self, request: ScanRequest, scan_id: String, cancel: CancellationToken) {
        let output_dir = self.output_dir.join(&scan_id);
        if let Err(e) = tokio::fs::create_dir_all(&output_dir).await {
            warn!(scan_id = %scan_id, "Failed to create {}: {}", output_dir.display(), e);
        }

        let workspace = match request.repo {
            Some(ref repo) => self.acquire_workspace(&scan_id, repo, &cancel).await,
            None => None,
        };

        let plan = ScanPlan {
            scan_id: scan_id.clone(),
            mode: request.mode,
            target_url: request.target_url.clone(),
            workspace: workspace.as_ref().map(|w| w.path.clone()),
            output_dir,
            concurrency: request.concurrency.unwrap_or(self.concurrency).max(1),
            cancel: cancel.clone(),
        };

        for wave in Wave::ORDER {
            if cancel.is_cancelled() {
                break;
            }
            let agents = match self.store.get(&scan_id) {
                Ok(session) => session.agents_in_wave(wave),
                Err(e) => {
                    error!(scan_id = %scan_id, "Session vanished mid-scan: {}", e);
                    break;
                }
            };
            if agents.is_empty() {
                continue;
            }
            debug!(scan_id = %scan_id, wave = wave.number(), "Starting wave with {:?}", agents);
            self.run_wave(&plan, &agents).await;
        }

        if cancel.is_cancelled() {
            // Shutdown cancels without going through `cancel`
            if let Ok(true) = self.store.mark_cancelled(&scan_id) {
                self.log(&scan_id, "Scan cancelled by shutdown");
            }
            self.skip_pending(&scan_id, "scan cancelled");
        }

        if let Some(workspace) = workspace {
            let path = workspace.path.clone();
            match self.workspaces.release(workspace).await {
                Ok(()) => debug!(scan_id = %scan_id, "Released workspace {}", path.display()),
                Err(e) => warn!(scan_id = %scan_id, "Failed to release workspace: {}", e),
            }
        }

        match self.store.mark_finished(&scan_id) {
            Ok(session) => {
                let summary = session.findings_summary();
                info!(
                    scan_id = %scan_id,
                    cancelled = session.cancelled,
                    "Scan finished with {} findings ({} critical, {} high)",
                    summary.total(),
                    summary.critical,
                    summary.high
                );
            }
            Err(e) => error!(scan_id = %scan_id, "Failed to finish scan: {}", e),
        }
    }

    /// Check out the repository. On failure the repository agents are
    /// skipped and the rest of the scan continues.
    async fn acquire_workspace(
        &self,
        scan_id: &str,
        repo: &RepoSource,
        cancel: &CancellationToken,
    ) -> Option<Workspace> {
        self.log(scan_id, format!("Preparing workspace for {}", repo.url));
        let acquired = tokio::select! {
            r = self.workspaces.acquire(repo, scan_id) => r,
            _ = cancel.cancelled() => {
                debug!(scan_id, "Workspace acquisition cancelled");
                return None;
            }
        };

        match acquired {
            Ok(workspace) => {
                let path = workspace.path.display().to_string();
                if let Err(e) = self.store.set_workspace(scan_id, path.clone()) {
                    warn!(scan_id, "Failed to record workspace: {}", e);
                }
                match workspace.commit {
                    Some(ref commit) => {
                        self.log(scan_id, format!("Workspace ready at {} ({})", path, commit))
                    }
                    None => self.log(scan_id, format!("Workspace ready at {}", path)),
                }
                Some(workspace)
            }
            Err(e) => {
                warn!(scan_id, "Workspace unavailable: {}", e);
                self.log(scan_id, format!("Workspace unavailable: {}", e));
                let reason = format!("workspace unavailable: {}", e);
                let selected = match self.store.get(scan_id) {
                    Ok(session) => session.agents(),
                    Err(e) => {
                        warn!(scan_id, "Failed to read session: {}", e);
                        return None;
                    }
                };
                for agent in selected
                    .into_iter()
                    .filter(|a| a.category() == AgentCategory::Static)
                {
                    if let Err(e) = self.store.update_task(scan_id, agent, |t| t.skip(reason.clone())) {
                        warn!(scan_id, %agent, "Failed to skip agent: {}", e);
                    }
                }
                None
            }
        }
    }

    /// Run one wave to its barrier: every task of `agents` is terminal on return
    async fn run_wave(&self, plan: &ScanPlan, agents: &[AgentName]) {
        let semaphore = Arc::new(Semaphore::new(plan.concurrency));
        let adaptive = plan.mode == ScanMode::Adaptive;

        let mut finished_tx = HashMap::new();
        let mut finished_rx = HashMap::new();
        for agent in agents {
            let (tx, rx) = watch::channel(false);
            finished_tx.insert(*agent, tx);
            finished_rx.insert(*agent, rx);
        }

        let mut workers = JoinSet::new();
        for agent in agents.iter().copied() {
            let dependencies: Vec<watch::Receiver<bool>> = if adaptive {
                self.policy
                    .depends_on(agent, agents)
                    .into_iter()
                    .filter_map(|dep| finished_rx.get(&dep).cloned())
                    .collect()
            } else {
                Vec::new()
            };
            let Some(done) = finished_tx.remove(&agent) else {
                continue;
            };

            let scheduler = self.clone();
            let plan = plan.clone();
            let semaphore = Arc::clone(&semaphore);
            workers.spawn(async move {
                for mut dependency in dependencies {
                    let _ = dependency.wait_for(|finished| *finished).await;
                }
                if adaptive && !scheduler.admit(&plan.scan_id, agent) {
                    done.send_replace(true);
                    return;
                }

                let permit = tokio::select! {
                    permit = semaphore.acquire_owned() => permit.ok(),
                    _ = plan.cancel.cancelled() => None,
                };
                if let Some(_permit) = permit {
                    if let Err(e) = scheduler.run_agent(&plan, agent).await {
                        error!(scan_id = %plan.scan_id, %agent, "Agent run aborted: {}", e);
                    }
                }
                done.send_replace(true);
            });
        }

        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                error!(scan_id = %plan.scan_id, "Worker task failed: {}", e);
            }
        }

        self.settle_wave(plan, agents);
    }

    /// Ask the adaptive policy whether `agent` still runs; skips it if not
    fn admit(&self, scan_id: &str, agent: AgentName) -> bool {
        let Ok(session) = self.store.get(scan_id) else {
            return false;
        };
        match self.policy.decide(agent, &session) {
            PolicyDecision::Run => true,
            PolicyDecision::Skip(reason) => {
                info!(scan_id, %agent, "Adaptive policy skipped agent: {}", reason);
                self.log(scan_id, format!("[{}] skipped: {}", agent, reason));
                if let Err(e) = self.store.update_task(scan_id, agent, |t| t.skip(reason)) {
                    debug!(scan_id, %agent, "Not skipped: {}", e);
                }
                false
            }
        }
    }

    /// Force any task a worker left behind into a terminal state
    fn settle_wave(&self, plan: &ScanPlan, agents: &[AgentName]) {
        let Ok(session) = self.store.get(&plan.scan_id) else {
            return;
        };
        for agent in agents {
            let Some(task) = session.task(*agent) else {
                continue;
            };
            let outcome = match task.status {
                AgentStatus::Pending if plan.cancel.is_cancelled() => self
                    .store
                    .update_task(&plan.scan_id, *agent, |t| t.skip("scan cancelled")),
                AgentStatus::Pending => self
                    .store
                    .update_task(&plan.scan_id, *agent, |t| t.skip("not scheduled")),
                AgentStatus::Running => self.store.update_task(&plan.scan_id, *agent, |t| {
                    t.fail(ErrorKind::AdapterExecutionError, "worker aborted")
                }),
                _ => continue,
            };
            if let Err(e) = outcome {
                warn!(scan_id = %plan.scan_id, %agent, "Failed to settle task: {}", e);
            }
        }
    }

    /// Run one agent through its whole lifecycle
    async fn run_agent(&self, plan: &ScanPlan, agent: AgentName) -> Result<()> {
        let scan_id = plan.scan_id.as_str();
        if plan.cancel.is_cancelled() {
            return Ok(());
        }

        let Some(adapter) = self.registry.get(agent) else {
            let reason = format!("no adapter registered for {}", agent);
            self.log(scan_id, format!("[{}] skipped: {}", agent, reason));
            self.store.update_task(scan_id, agent, |t| t.skip(reason))?;
            return Ok(());
        };

        let previous_findings = self.store.get(scan_id)?.findings;
        let profile = plan.mode.profile();
        let timeout = profile.scale_timeout(adapter.default_timeout());

        let started = format!("{} started", agent.display_name());
        if let Err(e) = self.store.update_task(scan_id, agent, |t| t.start(started)) {
            // Skipped by a concurrent cancel
            debug!(scan_id, %agent, "Not started: {}", e);
            return Ok(());
        }
        self.log(
            scan_id,
            format!(
                "[{}] {} started (timeout {}s)",
                agent,
                agent.display_name(),
                timeout.as_secs()
            ),
        );

        let ctx = AgentContext {
            scan_id: scan_id.to_string(),
            agent,
            mode: plan.mode,
            profile,
            workspace: plan.workspace.clone(),
            target_url: plan.target_url.clone(),
            output_dir: plan.output_dir.clone(),
            previous_findings,
            timeout,
            executor: ToolExecutor::new(),
            progress: ProgressReporter::new(Arc::clone(&self.store), scan_id, agent),
            cancel: plan.cancel.child_token(),
        };

        let outcome = tokio::select! {
            r = tokio::time::timeout(timeout, adapter.run(&ctx)) => match r {
                Ok(result) => result,
                Err(_) => Err(AdapterError::Timeout { secs: timeout.as_secs() }),
            },
            _ = plan.cancel.cancelled() => Err(AdapterError::Cancelled),
        };

        for execution in ctx.executor.executions() {
            let elapsed = execution
                .duration()
                .map(|d| format!("{:.1}s", d.num_milliseconds() as f64 / 1000.0))
                .unwrap_or_else(|| "-".to_string());
            let status = match (execution.exit_code, execution.error.as_deref()) {
                (Some(code), _) => format!("exit {}", code),
                (None, Some(err)) => err.to_string(),
                (None, None) => "no exit status".to_string(),
            };
            self.log(
                scan_id,
                format!("[{}] {} {} in {}", agent, execution.tool, status, elapsed),
            );
        }

        match outcome {
            Ok(raw) => {
                let batch = Canonicalizer::new(scan_id).canonicalize_batch(agent, raw.into_raw_findings());
                for dropped in &batch.dropped {
                    self.log(scan_id, format!("[{}] warning: {}", agent, dropped));
                }
                let mut added = 0usize;
                let mut duplicates = batch.duplicates;
                for finding in batch.findings {
                    if self.store.append_finding(scan_id, finding)? {
                        added += 1;
                    } else {
                        duplicates += 1;
                    }
                }
                let message = format!("{} findings", added);
                self.store
                    .update_task(scan_id, agent, |t| t.complete(message))?;
                self.log(
                    scan_id,
                    format!(
                        "[{}] completed with {} findings ({} duplicates discarded)",
                        agent, added, duplicates
                    ),
                );
                info!(scan_id, %agent, added, duplicates, "Agent completed");
            }
            Err(err) => {
                let kind = err.kind();
                let message = err.to_string();
                warn!(scan_id, %agent, kind = %kind, "Agent failed: {}", message);
                self.store
                    .update_task(scan_id, agent, |t| t.fail(kind, message.clone()))?;
                self.log(scan_id, format!("[{}] failed ({}): {}", agent, kind, message));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::workspace::LocalWorkspace;
    use tempfile::TempDir;

    fn scheduler() -> (Scheduler, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let scheduler = Scheduler::new(
            Arc::new(SessionStore::default()),
            AdapterRegistry::new(),
            Arc::new(LocalWorkspace),
        )
        .with_output_dir(dir.path());
        (scheduler, dir)
    }

    #[tokio::test]
    async fn test_start_scan_rejects_request_without_source() {
        let (scheduler, _dir) = scheduler();
        let err = scheduler
            .start_scan(ScanRequest::new(ScanMode::Standard))
            .unwrap_err();
        assert!(matches!(err, crate::Error::Config(_)));
        assert!(scheduler.store().is_empty());
    }

    #[tokio::test]
    async fn test_missing_adapters_are_skipped() {
        let (scheduler, _dir) = scheduler();
        let snapshot = scheduler
            .start_scan(ScanRequest::new(ScanMode::Fast).with_target_url("http://t"))
            .unwrap();
        assert_eq!(snapshot.scan_id.len(), 32);
        assert!(snapshot
            .agent_tasks
            .iter()
            .all(|t| t.status == AgentStatus::Pending));

        let session = scheduler.wait(&snapshot.scan_id).await.unwrap();
        assert!(session.finished_at.is_some());
        assert!(session.is_terminal());
        assert_eq!(
            session.agents_with_status(AgentStatus::Skipped).len(),
            session.agent_tasks.len()
        );
    }

    #[tokio::test]
    async fn test_unavailable_workspace_skips_repository_agents() {
        let (scheduler, _dir) = scheduler();
        let snapshot = scheduler
            .start_scan(
                ScanRequest::new(ScanMode::Fast)
                    .with_repo(RepoSource::new("/nonexistent/aegis/repo"))
                    .with_target_url("http://t"),
            )
            .unwrap();

        let session = scheduler.wait(&snapshot.scan_id).await.unwrap();
        let task = session.task(AgentName::Static).unwrap();
        assert_eq!(task.status, AgentStatus::Skipped);
        assert!(task
            .message
            .as_deref()
            .unwrap()
            .starts_with("workspace unavailable"));
        assert!(session.logs.iter().any(|l| l.starts_with("Workspace unavailable")));
    }

    #[tokio::test]
    async fn test_cancel_unknown_and_finished_scans() {
        let (scheduler, _dir) = scheduler();
        assert!(matches!(
            scheduler.cancel("nope"),
            Err(crate::Error::SessionNotFound(_))
        ));

        let snapshot = scheduler
            .start_scan(ScanRequest::new(ScanMode::Fast).with_target_url("http://t"))
            .unwrap();
        scheduler.wait(&snapshot.scan_id).await.unwrap();
        assert!(!scheduler.cancel(&snapshot.scan_id).unwrap());
        assert!(scheduler.active_scans().is_empty());
    }

    #[tokio::test]
    async fn test_workspace_failure_skips_only_selected_repository_agents() {
        let (scheduler, _dir) = scheduler();
        let snapshot = scheduler
            .start_scan(
                ScanRequest::new(ScanMode::Fast)
                    .with_repo(RepoSource::new("/nonexistent/aegis/repo"))
                    .with_target_url("http://t")
                    .with_enabled_agents([AgentName::Secret, AgentName::Dast]),
            )
            .unwrap();

        let session = scheduler.wait(&snapshot.scan_id).await.unwrap();
        assert!(session.task(AgentName::Static).is_none());
        let secret = session.task(AgentName::Secret).unwrap();
        assert!(secret
            .message
            .as_deref()
            .unwrap()
            .starts_with("workspace unavailable"));
        let dast = session.task(AgentName::Dast).unwrap();
        assert_eq!(dast.status, AgentStatus::Skipped);
        assert!(dast.message.as_deref().unwrap().starts_with("no adapter"));
    }

    #[tokio::test]
    async fn test_blank_target_url_runs_repository_scan() {
        let (scheduler, dir) = scheduler();
        let mut request = ScanRequest::new(ScanMode::Fast)
            .with_repo(RepoSource::new(dir.path().to_string_lossy()));
        request.target_url = Some(String::new());

        let snapshot = scheduler.start_scan(request).unwrap();
        assert!(snapshot.target_url.is_none());
        assert!(snapshot.task(AgentName::Static).is_some());
        assert!(snapshot.task(AgentName::Dast).is_none());
        scheduler.wait(&snapshot.scan_id).await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_cancel_during_clone_removes_workspace() {
        use crate::workspace::GitWorkspace;
        use std::os::unix::fs::PermissionsExt;

        let tools = tempfile::tempdir().unwrap();
        let git = tools.path().join("slow-git");
        std::fs::write(
            &git,
            "#!/bin/sh\nfor last in \"$@\"; do :; done\nmkdir -p \"$last/.git\"\ntouch \"$last/README\"\nexec sleep 30\n",
        )
        .unwrap();
        std::fs::set_permissions(&git, std::fs::Permissions::from_mode(0o755)).unwrap();

        let workspaces = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        let scheduler = Scheduler::new(
            Arc::new(SessionStore::default()),
            AdapterRegistry::new(),
            Arc::new(GitWorkspace::new(workspaces.path()).with_git_bin(git.to_string_lossy())),
        )
        .with_output_dir(output.path());

        let snapshot = scheduler
            .start_scan(
                ScanRequest::new(ScanMode::Fast)
                    .with_repo(RepoSource::new("https://github.com/acme/app")),
            )
            .unwrap();
        let checkout = workspaces
            .path()
            .join(format!("{}-acme-app", snapshot.scan_id));

        let appeared = tokio::time::timeout(Duration::from_secs(5), async {
            while !checkout.join("README").exists() {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        })
        .await;
        assert!(appeared.is_ok(), "clone never started");

        assert!(scheduler.cancel(&snapshot.scan_id).unwrap());
        let session = tokio::time::timeout(Duration::from_secs(10), scheduler.wait(&snapshot.scan_id))
            .await
            .unwrap()
            .unwrap();
        assert!(session.cancelled);
        assert!(session.is_terminal());
        assert!(!checkout.exists());
        assert_eq!(std::fs::read_dir(workspaces.path()).unwrap().count(), 0);
    }
}
