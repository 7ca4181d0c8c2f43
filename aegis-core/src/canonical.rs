//! Raw tool records → canonical findings
//!
//! Parsers only translate a tool's own schema into [`RawFinding`]s. Everything
//! that must be uniform across tools happens here: severity normalization,
//! deterministic ids, dropping incomplete records, in-batch dedup.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::state::models::{AgentName, Finding, Metadata, Severity};

/// Hex characters of the sha256 digest kept in a finding id
const ID_HASH_LEN: usize = 16;

/// A tool-reported issue before normalization
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawFinding {
    /// Identifier the tool itself uses for this issue, if any
    pub native_id: Option<String>,
    pub title: Option<String>,
    /// Severity as the tool spells it
    pub severity: Option<String>,
    pub description: String,
    pub remediation: String,
    pub metadata: Metadata,
}

impl RawFinding {
    pub fn new(title: impl Into<String>, severity: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            severity: Some(severity.into()),
            ..Self::default()
        }
    }

    pub fn with_native_id(mut self, id: impl Into<String>) -> Self {
        self.native_id = Some(id.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_remediation(mut self, remediation: impl Into<String>) -> Self {
        self.remediation = remediation.into();
        self
    }

    pub fn with_metadata(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }
}

/// Why a raw record did not become a finding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    MissingTitle,
    MissingSeverity,
}

impl std::fmt::Display for DropReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DropReason::MissingTitle => write!(f, "missing title"),
            DropReason::MissingSeverity => write!(f, "missing severity"),
        }
    }
}

/// Result of canonicalizing one adapter's output
#[derive(Debug, Default)]
pub struct CanonicalBatch {
    pub findings: Vec<Finding>,
    /// One warning line per dropped record
    pub dropped: Vec<String>,
    pub duplicates: usize,
}

/// Canonicalizes findings for one scan
#[derive(Debug, Clone)]
pub struct Canonicalizer {
    scan_id: String,
}

impl Canonicalizer {
    pub fn new(scan_id: impl Into<String>) -> Self {
        Self {
            scan_id: scan_id.into(),
        }
    }

    /// `{scan_id}-{agent}-{hash}` where hash covers the native id, or the
    /// title and description when the tool has no id of its own
    pub fn finding_id(
        &self,
        agent: AgentName,
        native_id: Option<&str>,
        title: &str,
        description: &str,
    ) -> String {
        let mut hasher = Sha256::new();
        match native_id.map(str::trim).filter(|id| !id.is_empty()) {
            Some(id) => hasher.update(id.as_bytes()),
            None => {
                hasher.update(title.as_bytes());
                hasher.update([0u8]);
                hasher.update(description.as_bytes());
            }
        }
        let digest = hex::encode(hasher.finalize());
        let short = digest.get(..ID_HASH_LEN).unwrap_or(&digest);
        format!("{}-{}-{}", self.scan_id, agent, short)
    }

    pub fn canonicalize(
        &self,
        agent: AgentName,
        raw: RawFinding,
    ) -> std::result::Result<Finding, DropReason> {
        let title = raw
            .title
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .ok_or(DropReason::MissingTitle)?;
        let severity = raw
            .severity
            .filter(|s| !s.trim().is_empty())
            .ok_or(DropReason::MissingSeverity)?;

        let id = self.finding_id(agent, raw.native_id.as_deref(), &title, &raw.description);
        Ok(Finding {
            id,
            title,
            description: raw.description,
            remediation: raw.remediation,
            severity: Severity::normalize(&severity),
            source_agent: agent,
            metadata: raw.metadata,
        })
    }

    /// Canonicalize a whole adapter result, dropping incomplete records and
    /// collapsing duplicates within the batch (first occurrence wins)
    pub fn canonicalize_batch(
        &self,
        agent: AgentName,
        raws: impl IntoIterator<Item = RawFinding>,
    ) -> CanonicalBatch {
        let mut batch = CanonicalBatch::default();
        let mut seen = HashSet::new();

        for (index, raw) in raws.into_iter().enumerate() {
            match self.canonicalize(agent, raw) {
                Ok(finding) => {
                    if seen.insert(finding.id.clone()) {
                        batch.findings.push(finding);
                    } else {
                        batch.duplicates += 1;
                    }
                }
                Err(reason) => {
                    warn!(scan_id = %self.scan_id, %agent, index, "Dropping finding: {}", reason);
                    batch
                        .dropped
                        .push(format!("{}: dropped record #{} ({})", agent, index + 1, reason));
                }
            }
        }
        batch
    }
}
