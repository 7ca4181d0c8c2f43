//! Data models for scan sessions

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::state::task::{AgentStatus, AgentTask};

/// Open key/value bag carried by findings, never interpreted by the core
pub type Metadata = BTreeMap<String, serde_json::Value>;

/// Severity level for findings.
///
/// Variants are declared from least to most severe so the derived ordering
/// can be used directly for sorting and threshold filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Informational,
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// All severities, most severe first
    pub const DESCENDING: [Severity; 5] = [
        Severity::Critical,
        Severity::High,
        Severity::Medium,
        Severity::Low,
        Severity::Informational,
    ];

    /// Map a tool-reported severity onto the five-level scale.
    ///
    /// Unrecognized input is treated as informational.
    pub fn normalize(raw: &str) -> Severity {
        match raw.trim().to_lowercase().as_str() {
            "critical" | "crit" | "severe" => Severity::Critical,
            "high" => Severity::High,
            "medium" | "moderate" | "med" => Severity::Medium,
            "low" => Severity::Low,
            _ => Severity::Informational,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::High => "high",
            Severity::Medium => "medium",
            Severity::Low => "low",
            Severity::Informational => "informational",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "critical" => Ok(Severity::Critical),
            "high" => Ok(Severity::High),
            "medium" => Ok(Severity::Medium),
            "low" => Ok(Severity::Low),
            "info" | "informational" => Ok(Severity::Informational),
            _ => Err(format!("Unknown severity: {}", s)),
        }
    }
}

/// Broad family an agent belongs to; drives selection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentCategory {
    /// Needs a repository checkout
    Static,
    /// Needs a live target URL
    Dynamic,
    /// Consumes other agents' output
    Meta,
}

/// Scheduling barrier an agent runs in
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Wave {
    Discovery = 1,
    Analysis = 2,
    Reporting = 3,
}

impl Wave {
    pub const ORDER: [Wave; 3] = [Wave::Discovery, Wave::Analysis, Wave::Reporting];

    pub fn number(&self) -> u8 {
        *self as u8
    }
}

/// The closed set of agents the orchestrator knows how to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentName {
    Static,
    Dependency,
    Secret,
    Dast,
    Fuzzer,
    Template,
    Adaptive,
    Threat,
    Report,
}

impl AgentName {
    /// Every agent, in scheduling order
    pub const ALL: [AgentName; 9] = [
        AgentName::Static,
        AgentName::Dependency,
        AgentName::Secret,
        AgentName::Dast,
        AgentName::Fuzzer,
        AgentName::Template,
        AgentName::Adaptive,
        AgentName::Threat,
        AgentName::Report,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AgentName::Static => "static",
            AgentName::Dependency => "dependency",
            AgentName::Secret => "secret",
            AgentName::Dast => "dast",
            AgentName::Fuzzer => "fuzzer",
            AgentName::Template => "template",
            AgentName::Adaptive => "adaptive",
            AgentName::Threat => "threat",
            AgentName::Report => "report",
        }
    }

    /// Human-readable name used in log lines
    pub fn display_name(&self) -> &'static str {
        match self {
            AgentName::Static => "Static Code Analysis",
            AgentName::Dependency => "Dependency Scanner",
            AgentName::Secret => "Secret Leakage Scanner",
            AgentName::Dast => "DAST Baseline Scan",
            AgentName::Fuzzer => "Fuzzer / Directory Discovery",
            AgentName::Template => "Template Scanner",
            AgentName::Adaptive => "Adaptive Analysis",
            AgentName::Threat => "Threat Prioritization",
            AgentName::Report => "Reporting",
        }
    }

    pub fn category(&self) -> AgentCategory {
        match self {
            AgentName::Static | AgentName::Dependency | AgentName::Secret => {
                AgentCategory::Static
            }
            AgentName::Dast | AgentName::Fuzzer | AgentName::Template => AgentCategory::Dynamic,
            AgentName::Adaptive | AgentName::Threat | AgentName::Report => AgentCategory::Meta,
        }
    }

    pub fn wave(&self) -> Wave {
        match self {
            AgentName::Adaptive | AgentName::Threat => Wave::Analysis,
            AgentName::Report => Wave::Reporting,
            _ => Wave::Discovery,
        }
    }
}

impl std::fmt::Display for AgentName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AgentName {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        AgentName::ALL
            .into_iter()
            .find(|a| a.as_str() == s.trim().to_lowercase())
            .ok_or_else(|| format!("Unknown agent: {}", s))
    }
}

/// Scan depth/intensity mode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanMode {
    #[default]
    Adaptive,
    Standard,
    Fast,
    Deep,
}

impl ScanMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanMode::Adaptive => "adaptive",
            ScanMode::Standard => "standard",
            ScanMode::Fast => "fast",
            ScanMode::Deep => "deep",
        }
    }

    /// Per-agent tuning derived from the mode
    pub fn profile(&self) -> ModeProfile {
        match self {
            ScanMode::Fast => ModeProfile {
                timeout_factor: 0.5,
                crawl_depth: 1,
            },
            ScanMode::Standard | ScanMode::Adaptive => ModeProfile {
                timeout_factor: 1.0,
                crawl_depth: 2,
            },
            ScanMode::Deep => ModeProfile {
                timeout_factor: 2.0,
                crawl_depth: 4,
            },
        }
    }
}

impl std::fmt::Display for ScanMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ScanMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "adaptive" => Ok(ScanMode::Adaptive),
            "standard" => Ok(ScanMode::Standard),
            "fast" => Ok(ScanMode::Fast),
            "deep" => Ok(ScanMode::Deep),
            _ => Err(format!("Unknown scan mode: {}", s)),
        }
    }
}

/// Timeout and depth scaling applied to every agent of a scan
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModeProfile {
    pub timeout_factor: f64,
    pub crawl_depth: u32,
}

impl ModeProfile {
    /// Scale a base timeout, never going below one second
    pub fn scale_timeout(&self, base: std::time::Duration) -> std::time::Duration {
        base.mul_f64(self.timeout_factor)
            .max(std::time::Duration::from_secs(1))
    }
}

/// Repository source of a scan
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoSource {
    /// Git URL or local directory
    pub url: String,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default, skip_serializing)]
    pub token: Option<String>,
}

impl RepoSource {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            branch: None,
            token: None,
        }
    }

    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = Some(branch.into());
        self
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }
}

/// A canonical vulnerability/issue record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub id: String,
    pub title: String,
    pub description: String,
    pub remediation: String,
    pub severity: Severity,
    pub source_agent: AgentName,
    #[serde(default)]
    pub metadata: Metadata,
}

/// Summary of findings by severity
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FindingsSummary {
    pub critical: u32,
    pub high: u32,
    pub medium: u32,
    pub low: u32,
    pub informational: u32,
}

impl FindingsSummary {
    pub fn from_findings<'a>(findings: impl IntoIterator<Item = &'a Finding>) -> Self {
        let mut summary = Self::default();
        for finding in findings {
            match finding.severity {
                Severity::Critical => summary.critical += 1,
                Severity::High => summary.high += 1,
                Severity::Medium => summary.medium += 1,
                Severity::Low => summary.low += 1,
                Severity::Informational => summary.informational += 1,
            }
        }
        summary
    }

    pub fn total(&self) -> u32 {
        self.critical + self.high + self.medium + self.low + self.informational
    }

    pub fn count(&self, severity: Severity) -> u32 {
        match severity {
            Severity::Critical => self.critical,
            Severity::High => self.high,
            Severity::Medium => self.medium,
            Severity::Low => self.low,
            Severity::Informational => self.informational,
        }
    }
}

/// Authoritative state of one scan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanSession {
    pub scan_id: String,
    pub target: String,
    pub mode: ScanMode,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub repo_url: Option<String>,
    #[serde(default)]
    pub repo_branch: Option<String>,
    #[serde(default)]
    pub target_url: Option<String>,
    #[serde(default)]
    pub workspace_path: Option<String>,
    /// Ordered by scheduling order; the agent set is fixed at creation
    pub agent_tasks: Vec<AgentTask>,
    #[serde(default)]
    pub findings: Vec<Finding>,
    #[serde(default)]
    pub logs: Vec<String>,
    #[serde(default)]
    pub cancelled: bool,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
}

impl ScanSession {
    /// Create a session with one pending task per selected agent
    pub fn new(
        scan_id: impl Into<String>,
        mode: ScanMode,
        repo: Option<&RepoSource>,
        target_url: Option<&str>,
        agents: &[AgentName],
    ) -> Self {
        let target = match (repo, target_url) {
            (Some(r), Some(u)) => format!("{} + {}", r.url, u),
            (Some(r), None) => r.url.clone(),
            (None, Some(u)) => u.to_string(),
            (None, None) => "unknown".to_string(),
        };

        Self {
            scan_id: scan_id.into(),
            target,
            mode,
            created_at: Utc::now(),
            repo_url: repo.map(|r| r.url.clone()),
            repo_branch: repo.and_then(|r| r.branch.clone()),
            target_url: target_url.map(str::to_string),
            workspace_path: None,
            agent_tasks: agents.iter().map(|a| AgentTask::new(*a)).collect(),
            findings: Vec::new(),
            logs: Vec::new(),
            cancelled: false,
            finished_at: None,
        }
    }

    pub fn task(&self, agent: AgentName) -> Option<&AgentTask> {
        self.agent_tasks.iter().find(|t| t.agent == agent)
    }

    pub(crate) fn task_mut(&mut self, agent: AgentName) -> Option<&mut AgentTask> {
        self.agent_tasks.iter_mut().find(|t| t.agent == agent)
    }

    /// Selected agents in scheduling order
    pub fn agents(&self) -> Vec<AgentName> {
        self.agent_tasks.iter().map(|t| t.agent).collect()
    }

    /// Agents of one wave, in scheduling order
    pub fn agents_in_wave(&self, wave: Wave) -> Vec<AgentName> {
        self.agent_tasks
            .iter()
            .filter(|t| t.agent.wave() == wave)
            .map(|t| t.agent)
            .collect()
    }

    /// True once every agent task reached a terminal state
    pub fn is_terminal(&self) -> bool {
        self.agent_tasks.iter().all(|t| t.status.is_terminal())
    }

    pub fn contains_finding(&self, id: &str) -> bool {
        self.findings.iter().any(|f| f.id == id)
    }

    pub fn findings_summary(&self) -> FindingsSummary {
        FindingsSummary::from_findings(&self.findings)
    }

    pub fn findings_from(&self, agent: AgentName) -> impl Iterator<Item = &Finding> {
        self.findings.iter().filter(move |f| f.source_agent == agent)
    }

    /// Agents that ended in the given status
    pub fn agents_with_status(&self, status: AgentStatus) -> Vec<AgentName> {
        self.agent_tasks
            .iter()
            .filter(|t| t.status == status)
            .map(|t| t.agent)
            .collect()
    }
}
