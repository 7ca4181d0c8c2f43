//! In-process analysis agents
//!
//! These run after the discovery wave and work only on the findings already
//! in the session. They never spawn a process.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use super::traits::{AgentContext, ToolAdapter};
use crate::canonical::RawFinding;
use crate::config::TimeoutsConfig;
use crate::error::AdapterError;
use crate::state::models::{AgentName, Finding, FindingsSummary, Severity};
use crate::tools::parsers::{ENDPOINT_KEY, RawResult};

/// How many top threats are named in a description
const TOP_THREATS: usize = 3;

/// Metadata keys that name a file inside the repository
const LOCATION_KEYS: [&str; 3] = ["path", "file", "target"];

fn is_urgent(finding: &Finding) -> bool {
    finding.severity >= Severity::High
}

fn counts_by_agent(findings: &[Finding]) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for finding in findings {
        *counts.entry(finding.source_agent.to_string()).or_insert(0) += 1;
    }
    counts
}

fn severity_line(summary: &FindingsSummary) -> String {
    let parts: Vec<String> = Severity::DESCENDING
        .into_iter()
        .filter(|s| *s != Severity::Informational)
        .filter_map(|s| match summary.count(s) {
            0 => None,
            n => Some(format!("{}: {}", s.as_str().to_uppercase(), n)),
        })
        .collect();
    if parts.is_empty() {
        "No findings".to_string()
    } else {
        parts.join(", ")
    }
}

fn summary_json(summary: &FindingsSummary) -> serde_json::Value {
    json!({
        "critical": summary.critical,
        "high": summary.high,
        "medium": summary.medium,
        "low": summary.low,
        "informational": summary.informational,
    })
}

fn check_cancelled(ctx: &AgentContext) -> Result<(), AdapterError> {
    if ctx.cancel.is_cancelled() {
        return Err(AdapterError::Cancelled);
    }
    Ok(())
}

/// Correlates discovery findings across tools
#[derive(Debug, Clone)]
pub struct AdaptiveAnalysisAgent {
    timeout: Duration,
}

impl AdaptiveAnalysisAgent {
    pub fn new(timeouts: &TimeoutsConfig) -> Self {
        Self {
            timeout: timeouts.for_agent(AgentName::Adaptive),
        }
    }

    /// Files reported by more than one agent, sorted
    fn hotspots(findings: &[Finding]) -> Vec<String> {
        let mut reporters: BTreeMap<&str, BTreeSet<AgentName>> = BTreeMap::new();
        for finding in findings {
            for key in LOCATION_KEYS {
                if let Some(location) = finding.metadata.get(key).and_then(|v| v.as_str()) {
                    reporters
                        .entry(location)
                        .or_default()
                        .insert(finding.source_agent);
                }
            }
        }
        reporters
            .into_iter()
            .filter(|(_, agents)| agents.len() > 1)
            .map(|(location, _)| location.to_string())
            .collect()
    }

    /// Distinct live URLs reported by dynamic agents
    fn endpoints(findings: &[Finding]) -> BTreeSet<String> {
        let mut endpoints = BTreeSet::new();
        for value in findings.iter().filter_map(|f| f.metadata.get(ENDPOINT_KEY)) {
            match value {
                serde_json::Value::String(url) => {
                    endpoints.insert(url.clone());
                }
                serde_json::Value::Array(urls) => {
                    endpoints.extend(urls.iter().filter_map(|u| u.as_str()).map(str::to_string));
                }
                _ => {}
            }
        }
        endpoints
    }

    pub fn analyze(&self, findings: &[Finding]) -> Vec<RawFinding> {
        if findings.is_empty() {
            return vec![
                RawFinding::new("Adaptive Security Analysis", "informational")
                    .with_native_id("adaptive-analysis")
                    .with_description("No findings were available to correlate.")
                    .with_remediation("Continue regular security monitoring.")
                    .with_metadata("total_findings", 0),
            ];
        }

        let summary = FindingsSummary::from_findings(findings);
        let hotspots = Self::hotspots(findings);
        let endpoints = Self::endpoints(findings);
        let priorities: Vec<&str> = findings
            .iter()
            .filter(|f| is_urgent(f))
            .map(|f| f.title.as_str())
            .take(5)
            .collect();

        let mut description = format!(
            "Correlated {} findings from {} agents ({}).",
            findings.len(),
            counts_by_agent(findings).len(),
            severity_line(&summary)
        );
        if !hotspots.is_empty() {
            description.push_str(&format!(
                " {} locations were flagged by more than one tool.",
                hotspots.len()
            ));
        }
        if !endpoints.is_empty() {
            description.push_str(&format!(
                " {} live endpoints were observed.",
                endpoints.len()
            ));
        }

        let mut results = vec![
            RawFinding::new("Adaptive Security Analysis", "informational")
                .with_native_id("adaptive-analysis")
                .with_description(description)
                .with_remediation("Start with locations reported by multiple tools.")
                .with_metadata("total_findings", findings.len())
                .with_metadata("by_agent", json!(counts_by_agent(findings)))
                .with_metadata("hotspots", hotspots)
                .with_metadata("endpoint_count", endpoints.len())
                .with_metadata("priorities", priorities),
        ];

        let secrets = findings
            .iter()
            .filter(|f| f.source_agent == AgentName::Secret)
            .count();
        if secrets > 0 && !endpoints.is_empty() {
            results.push(
                RawFinding::new("Leaked secrets with a reachable live target", "high")
                    .with_native_id("adaptive-secret-exposure")
                    .with_description(format!(
                        "{} secrets were found in the repository while the deployed application exposes {} endpoints. Leaked credentials may grant direct access to the running service.",
                        secrets,
                        endpoints.len()
                    ))
                    .with_remediation(
                        "Rotate the leaked credentials and verify they are not accepted by the live service.",
                    )
                    .with_metadata("secret_count", secrets)
                    .with_metadata("endpoint_count", endpoints.len()),
            );
        }
        results
    }
}

#[async_trait]
impl ToolAdapter for AdaptiveAnalysisAgent {
    fn agent(&self) -> AgentName {
        AgentName::Adaptive
    }

    fn default_timeout(&self) -> Duration {
        self.timeout
    }

    async fn run(&self, ctx: &AgentContext) -> Result<RawResult, AdapterError> {
        check_cancelled(ctx)?;
        ctx.progress.report(
            20,
            format!("correlating {} findings", ctx.previous_findings.len()),
        );
        Ok(RawResult::Findings(self.analyze(&ctx.previous_findings)))
    }
}

/// Ranks findings and names the most urgent ones
#[derive(Debug, Clone)]
pub struct ThreatAgent {
    timeout: Duration,
}

impl ThreatAgent {
    pub fn new(timeouts: &TimeoutsConfig) -> Self {
        Self {
            timeout: timeouts.for_agent(AgentName::Threat),
        }
    }

    /// Findings with the same title from the same agent count once
    fn unique_count(findings: &[Finding]) -> usize {
        findings
            .iter()
            .map(|f| (f.title.to_lowercase(), f.source_agent))
            .collect::<HashSet<_>>()
            .len()
    }

    pub fn prioritize(&self, findings: &[Finding]) -> RawFinding {
        if findings.is_empty() {
            return RawFinding::new("No Threats Identified", "informational")
                .with_native_id("threat-none")
                .with_description("Scan completed with no security findings to prioritize.")
                .with_remediation("Continue regular security monitoring.")
                .with_metadata("total_findings", 0);
        }

        let summary = FindingsSummary::from_findings(findings);
        let unique = Self::unique_count(findings);
        let duplicates = findings.len() - unique;

        let mut urgent: Vec<&Finding> = findings.iter().filter(|f| is_urgent(f)).collect();
        urgent.sort_by(|a, b| b.severity.cmp(&a.severity));

        let mut parts = vec![format!(
            "Threat analysis complete. Findings: {}.",
            severity_line(&summary)
        )];
        if duplicates > 0 {
            parts.push(format!("{} duplicate findings removed.", duplicates));
        }
        if !urgent.is_empty() {
            parts.push(format!(
                "{} high-priority issues require immediate attention.",
                urgent.len()
            ));
            let top: Vec<String> = urgent
                .iter()
                .take(TOP_THREATS)
                .map(|f| format!("- {} (from {})", f.title, f.source_agent))
                .collect();
            parts.push(format!("\nTop threats:\n{}", top.join("\n")));
        }

        RawFinding::new("Threat Prioritization Analysis", "informational")
            .with_native_id("threat-priority")
            .with_description(parts.join(" "))
            .with_remediation("Address Critical and High severity issues first, then Medium and Low.")
            .with_metadata("total_findings", findings.len())
            .with_metadata("unique_findings", unique)
            .with_metadata("duplicates_removed", duplicates)
            .with_metadata("critical_count", summary.critical)
            .with_metadata("high_count", summary.high)
            .with_metadata("medium_count", summary.medium)
            .with_metadata("low_count", summary.low)
            .with_metadata("by_agent", json!(counts_by_agent(findings)))
            .with_metadata(
                "top_threats",
                urgent
                    .iter()
                    .take(TOP_THREATS)
                    .map(|f| f.id.clone())
                    .collect::<Vec<_>>(),
            )
    }
}

#[async_trait]
impl ToolAdapter for ThreatAgent {
    fn agent(&self) -> AgentName {
        AgentName::Threat
    }

    fn default_timeout(&self) -> Duration {
        self.timeout
    }

    async fn run(&self, ctx: &AgentContext) -> Result<RawResult, AdapterError> {
        check_cancelled(ctx)?;
        ctx.progress.report(20, "prioritizing findings");
        Ok(RawResult::Findings(vec![
            self.prioritize(&ctx.previous_findings),
        ]))
    }
}

/// Summarizes the whole scan for report renderers
#[derive(Debug, Clone)]
pub struct ReportAgent {
    timeout: Duration,
}

impl ReportAgent {
    pub fn new(timeouts: &TimeoutsConfig) -> Self {
        Self {
            timeout: timeouts.for_agent(AgentName::Report),
        }
    }

    pub fn summarize(&self, ctx: &AgentContext) -> RawFinding {
        let findings = &ctx.previous_findings;
        let summary = FindingsSummary::from_findings(findings);

        let description = if findings.is_empty() {
            "No security findings were identified in this scan.".to_string()
        } else {
            format!(
                "This scan identified {} security findings across {} agents. {}.",
                findings.len(),
                counts_by_agent(findings).len(),
                severity_line(&summary)
            )
        };

        let mut ordered: Vec<&Finding> = findings.iter().collect();
        ordered.sort_by(|a, b| b.severity.cmp(&a.severity));
        let sections: Vec<serde_json::Value> = ordered
            .iter()
            .map(|f| {
                json!({
                    "id": f.id,
                    "title": f.title,
                    "severity": f.severity,
                    "source_agent": f.source_agent,
                })
            })
            .collect();

        RawFinding::new("Security Scan Report Generated", "informational")
            .with_native_id("report-summary")
            .with_description(description)
            .with_remediation(
                "Address all critical and high findings immediately, plan remediation for medium ones, and re-scan after applying fixes.",
            )
            .with_metadata("scan_id", ctx.scan_id.clone())
            .with_metadata("mode", ctx.mode.as_str())
            .with_metadata("target_url", ctx.target_url.clone())
            .with_metadata("findings_by_severity", summary_json(&summary))
            .with_metadata("findings_by_agent", json!(counts_by_agent(findings)))
            .with_metadata("findings", sections)
    }
}

#[async_trait]
impl ToolAdapter for ReportAgent {
    fn agent(&self) -> AgentName {
        AgentName::Report
    }

    fn default_timeout(&self) -> Duration {
        self.timeout
    }

    async fn run(&self, ctx: &AgentContext) -> Result<RawResult, AdapterError> {
        check_cancelled(ctx)?;
        ctx.progress.report(20, "summarizing scan");
        Ok(RawResult::Findings(vec![self.summarize(ctx)]))
    }
}
