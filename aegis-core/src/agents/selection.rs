//! Agent selection
//!
//! Decides which agents a scan runs from the sources it was given. Mode
//! never changes the selected set; it only scales timeouts and depth.

use serde::{Deserialize, Serialize};

use crate::state::models::{AgentCategory, AgentName, RepoSource, ScanMode};
use crate::{Error, Result};

/// A request to scan a repository and/or a live target
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScanRequest {
    #[serde(default)]
    pub repo: Option<RepoSource>,
    #[serde(default)]
    pub target_url: Option<String>,
    #[serde(default)]
    pub mode: ScanMode,
    /// Worker pool size override
    #[serde(default)]
    pub concurrency: Option<usize>,
    /// Allow-list narrowing the selected agents
    #[serde(default)]
    pub enabled_agents: Option<Vec<AgentName>>,
}

impl ScanRequest {
    pub fn new(mode: ScanMode) -> Self {
        Self {
            mode,
            ..Self::default()
        }
    }

    pub fn with_repo(mut self, repo: RepoSource) -> Self {
        self.repo = Some(repo);
        self
    }

    pub fn with_target_url(mut self, url: impl Into<String>) -> Self {
        self.target_url = Some(url.into());
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = Some(concurrency);
        self
    }

    pub fn with_enabled_agents(mut self, agents: impl IntoIterator<Item = AgentName>) -> Self {
        self.enabled_agents = Some(agents.into_iter().collect());
        self
    }

    /// Repository source, unless its URL is blank
    pub fn repo_source(&self) -> Option<&RepoSource> {
        self.repo.as_ref().filter(|r| !r.url.trim().is_empty())
    }

    /// Target URL, unless it is blank
    pub fn target(&self) -> Option<&str> {
        self.target_url
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty())
    }

    /// Drop blank sources so they count as absent, and trim the rest
    pub fn normalized(mut self) -> Self {
        self.target_url = self.target().map(str::to_string);
        self.repo = self.repo.filter(|r| !r.url.trim().is_empty()).map(|mut r| {
            r.url = r.url.trim().to_string();
            r
        });
        self
    }

    /// Check the request before any session exists
    pub fn validate(&self) -> Result<()> {
        if self.repo_source().is_none() && self.target().is_none() {
            return Err(Error::Config(
                "either a repository or a target URL is required".to_string(),
            ));
        }
        if let Some(url) = self.target() {
            validate_target_url(url)?;
        }
        if self.concurrency == Some(0) {
            return Err(Error::Config("concurrency must be at least 1".to_string()));
        }
        Ok(())
    }
}

/// Only absolute http(s) URLs with a host are scannable
pub fn validate_target_url(url: &str) -> Result<()> {
    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .ok_or_else(|| Error::Config(format!("target URL must be http(s): {}", url)))?;
    let host = rest.split(['/', '?', '#']).next().unwrap_or_default();
    if host.is_empty() {
        return Err(Error::Config(format!("target URL has no host: {}", url)));
    }
    Ok(())
}

/// Agents to run for `request`, in scheduling order.
///
/// Repository agents need a repo, dynamic agents need a target URL, and the
/// analysis and reporting agents run whenever either exists.
pub fn select_agents(request: &ScanRequest) -> Result<Vec<AgentName>> {
    request.validate()?;

    let has_repo = request.repo_source().is_some();
    let has_target = request.target().is_some();

    let selected: Vec<AgentName> = AgentName::ALL
        .into_iter()
        .filter(|agent| match agent.category() {
            AgentCategory::Static => has_repo,
            AgentCategory::Dynamic => has_target,
            AgentCategory::Meta => true,
        })
        .filter(|agent| {
            request
                .enabled_agents
                .as_ref()
                .is_none_or(|enabled| enabled.contains(agent))
        })
        .collect();

    if selected.is_empty() {
        return Err(Error::Config(
            "no agents selected for the given sources".to_string(),
        ));
    }
    Ok(selected)
}
