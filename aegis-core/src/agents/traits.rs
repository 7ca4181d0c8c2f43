//! Agent adapter trait definitions

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::AdapterError;
use crate::state::models::{AgentName, Finding, ModeProfile, ScanMode};
use crate::state::store::SessionStore;
use crate::tools::executor::ToolExecutor;
use crate::tools::parsers::RawResult;

/// Reports an agent's progress into the session it belongs to
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    store: Option<Arc<SessionStore>>,
    scan_id: String,
    agent: AgentName,
}

impl ProgressReporter {
    pub fn new(store: Arc<SessionStore>, scan_id: impl Into<String>, agent: AgentName) -> Self {
        Self {
            store: Some(store),
            scan_id: scan_id.into(),
            agent,
        }
    }

    /// A reporter that goes nowhere, for running adapters outside a scan
    pub fn detached(agent: AgentName) -> Self {
        Self {
            store: None,
            scan_id: String::new(),
            agent,
        }
    }

    /// Record progress. Values below the last reported one are clamped.
    pub fn report(&self, percent: u8, message: impl Into<String>) {
        let Some(ref store) = self.store else {
            return;
        };
        let message = message.into();
        if let Err(e) = store.update_task(&self.scan_id, self.agent, |task| {
            task.report_progress(percent, Some(message)).map(|_| ())
        }) {
            debug!(scan_id = %self.scan_id, agent = %self.agent, "Progress not recorded: {}", e);
        }
    }

    /// Append a line to the session log
    pub fn log(&self, line: impl Into<String>) {
        let Some(ref store) = self.store else {
            return;
        };
        if let Err(e) = store.append_log(&self.scan_id, line) {
            debug!(scan_id = %self.scan_id, "Log line dropped: {}", e);
        }
    }
}

/// Everything an adapter may look at while it runs
#[derive(Debug, Clone)]
pub struct AgentContext {
    pub scan_id: String,
    pub agent: AgentName,
    pub mode: ScanMode,
    pub profile: ModeProfile,
    /// Checked-out repository, when the scan has one
    pub workspace: Option<PathBuf>,
    /// Live target, when the scan has one
    pub target_url: Option<String>,
    /// Directory for tool report files
    pub output_dir: PathBuf,
    /// Findings of earlier waves, in append order
    pub previous_findings: Vec<Finding>,
    /// Effective timeout after mode scaling
    pub timeout: Duration,
    pub executor: ToolExecutor,
    pub progress: ProgressReporter,
    pub cancel: CancellationToken,
}

impl AgentContext {
    /// Context with defaults for everything but the agent and scan id
    pub fn new(scan_id: impl Into<String>, agent: AgentName, mode: ScanMode) -> Self {
        Self {
            scan_id: scan_id.into(),
            agent,
            mode,
            profile: mode.profile(),
            workspace: None,
            target_url: None,
            output_dir: std::env::temp_dir(),
            previous_findings: Vec::new(),
            timeout: Duration::from_secs(60),
            executor: ToolExecutor::new(),
            progress: ProgressReporter::detached(agent),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_workspace(mut self, path: impl Into<PathBuf>) -> Self {
        self.workspace = Some(path.into());
        self
    }

    pub fn with_target_url(mut self, url: impl Into<String>) -> Self {
        self.target_url = Some(url.into());
        self
    }

    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    pub fn with_previous_findings(mut self, findings: Vec<Finding>) -> Self {
        self.previous_findings = findings;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_progress(mut self, progress: ProgressReporter) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// The repository checkout, or an execution error naming `program`
    pub fn require_workspace(&self, program: &str) -> Result<&Path, AdapterError> {
        self.workspace
            .as_deref()
            .ok_or_else(|| AdapterError::launch(program, "no repository workspace"))
    }

    /// The live target, or an execution error naming `program`
    pub fn require_target(&self, program: &str) -> Result<&str, AdapterError> {
        self.target_url
            .as_deref()
            .ok_or_else(|| AdapterError::launch(program, "no target URL"))
    }
}

/// One scanner integration
#[async_trait]
pub trait ToolAdapter: Send + Sync {
    /// The agent slot this adapter fills
    fn agent(&self) -> AgentName;

    /// Base timeout before mode scaling
    fn default_timeout(&self) -> Duration;

    /// Run the tool and return its parsed output
    async fn run(&self, ctx: &AgentContext) -> Result<RawResult, AdapterError>;
}
