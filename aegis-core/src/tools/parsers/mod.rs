//! Tool output parsers
//!
//! Each parser understands one tool's JSON schema and produces
//! [`RawFinding`]s; normalization happens in [`crate::canonical`].

mod ffuf;
mod gitleaks;
mod nuclei;
mod semgrep;
mod trivy;
mod zap;

pub use ffuf::{FfufOutput, FfufResult};
pub use gitleaks::{GitleaksFinding, GitleaksOutput};
pub use nuclei::{NucleiEntry, NucleiOutput};
pub use semgrep::{SemgrepOutput, SemgrepResult};
pub use trivy::{TrivyOutput, TrivyVulnerability};
pub use zap::{ZapAlert, ZapOutput};

use crate::canonical::RawFinding;

/// Metadata key carrying a URL observed on the live target
pub const ENDPOINT_KEY: &str = "endpoint";

/// Trait for tool output parsing
pub trait ToolOutput {
    fn to_raw_findings(&self) -> Vec<RawFinding>;
}

/// Parsed output of one adapter run, one variant per tool family
#[derive(Debug)]
pub enum RawResult {
    Semgrep(SemgrepOutput),
    Trivy(TrivyOutput),
    Gitleaks(GitleaksOutput),
    Zap(ZapOutput),
    Ffuf(FfufOutput),
    Nuclei(NucleiOutput),
    /// Records produced in-process by analysis agents
    Findings(Vec<RawFinding>),
}

impl RawResult {
    pub fn into_raw_findings(self) -> Vec<RawFinding> {
        match self {
            RawResult::Semgrep(o) => o.to_raw_findings(),
            RawResult::Trivy(o) => o.to_raw_findings(),
            RawResult::Gitleaks(o) => o.to_raw_findings(),
            RawResult::Zap(o) => o.to_raw_findings(),
            RawResult::Ffuf(o) => o.to_raw_findings(),
            RawResult::Nuclei(o) => o.to_raw_findings(),
            RawResult::Findings(raws) => raws,
        }
    }
}
