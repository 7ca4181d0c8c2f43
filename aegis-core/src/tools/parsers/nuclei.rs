use serde::Deserialize;
use tracing::debug;

use crate::canonical::RawFinding;

use super::{ENDPOINT_KEY, ToolOutput};

/// Nuclei JSONL output, one entry per line
#[derive(Debug, Default)]
pub struct NucleiOutput(pub Vec<NucleiEntry>);

#[derive(Debug, Deserialize)]
pub struct NucleiEntry {
    #[serde(rename = "template-id")]
    pub template_id: Option<String>,
    #[serde(rename = "matched-at")]
    pub matched_at: Option<String>,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub info: NucleiInfo,
}

#[derive(Debug, Default, Deserialize)]
pub struct NucleiInfo {
    pub name: Option<String>,
    pub severity: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub remediation: Option<String>,
    #[serde(default)]
    pub tags: Option<serde_json::Value>,
}

impl NucleiOutput {
    /// Parse nuclei `-jsonl` output. Lines that are not JSON objects are skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if no line parses and at least one looked like JSON
    pub fn parse(output: &str) -> Result<Self, serde_json::Error> {
        let mut entries = Vec::new();
        let mut first_err = None;

        for line in output.lines().map(str::trim).filter(|l| !l.is_empty()) {
            if !line.starts_with('{') {
                debug!("skipping non-JSON nuclei line");
                continue;
            }
            match serde_json::from_str::<NucleiEntry>(line) {
                Ok(entry) => entries.push(entry),
                Err(e) => {
                    first_err.get_or_insert(e);
                }
            }
        }

        match first_err {
            Some(e) if entries.is_empty() => Err(e),
            _ => Ok(Self(entries)),
        }
    }
}

impl ToolOutput for NucleiOutput {
    fn to_raw_findings(&self) -> Vec<RawFinding> {
        self.0
            .iter()
            .map(|entry| {
                let native_id = match (&entry.template_id, &entry.matched_at) {
                    (Some(t), Some(m)) => Some(format!("{}:{}", t, m)),
                    (Some(t), None) => Some(t.clone()),
                    _ => None,
                };

                let mut finding = RawFinding {
                    native_id,
                    title: entry.info.name.clone().or_else(|| entry.template_id.clone()),
                    severity: entry.info.severity.clone(),
                    description: entry.info.description.clone(),
                    remediation: entry.info.remediation.clone().unwrap_or_else(|| {
                        "Review template references and patch affected service.".to_string()
                    }),
                    ..RawFinding::default()
                };

                if let Some(ref t) = entry.template_id {
                    finding = finding.with_metadata("template_id", t.clone());
                }
                if let Some(ref m) = entry.matched_at {
                    finding = finding
                        .with_metadata("matched_at", m.clone())
                        .with_metadata(ENDPOINT_KEY, vec![m.clone()]);
                }
                if let Some(ref host) = entry.host {
                    finding = finding.with_metadata("host", host.clone());
                }
                if let Some(ref tags) = entry.info.tags {
                    finding = finding.with_metadata("tags", tags.clone());
                }
                finding
            })
            .collect()
    }
}
