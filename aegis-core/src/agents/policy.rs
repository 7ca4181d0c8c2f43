//! Adaptive-mode scheduling policy
//!
//! In adaptive mode the scheduler asks a policy two things: which agents
//! must finish before another may claim a worker, and whether a pending
//! agent is still worth running given what the session already knows.

use crate::state::models::{AgentName, ScanSession};
use crate::state::task::AgentStatus;
use crate::tools::parsers::ENDPOINT_KEY;

/// Outcome of a policy check for one pending agent
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyDecision {
    Run,
    Skip(String),
}

/// Data-driven skip and ordering rules for adaptive scans
pub trait AdaptivePolicy: Send + Sync {
    /// Agents of the same wave that must be terminal before `agent` starts.
    ///
    /// Only agents present in `selected` are returned.
    fn depends_on(&self, agent: AgentName, selected: &[AgentName]) -> Vec<AgentName>;

    /// Decide whether `agent` should still run
    fn decide(&self, agent: AgentName, session: &ScanSession) -> PolicyDecision;
}

/// Skips the fuzzer when the DAST crawl found no endpoints to fuzz
#[derive(Debug, Clone, Copy, Default)]
pub struct EndpointSignalPolicy;

impl AdaptivePolicy for EndpointSignalPolicy {
    fn depends_on(&self, agent: AgentName, selected: &[AgentName]) -> Vec<AgentName> {
        match agent {
            AgentName::Fuzzer if selected.contains(&AgentName::Dast) => vec![AgentName::Dast],
            _ => Vec::new(),
        }
    }

    fn decide(&self, agent: AgentName, session: &ScanSession) -> PolicyDecision {
        if agent != AgentName::Fuzzer {
            return PolicyDecision::Run;
        }
        let dast_completed = session
            .task(AgentName::Dast)
            .is_some_and(|t| t.status == AgentStatus::Completed);
        if !dast_completed {
            return PolicyDecision::Run;
        }
        let has_endpoints = session
            .findings_from(AgentName::Dast)
            .any(|f| f.metadata.contains_key(ENDPOINT_KEY));
        if has_endpoints {
            PolicyDecision::Run
        } else {
            PolicyDecision::Skip("dast reported no endpoints to fuzz".to_string())
        }
    }
}
