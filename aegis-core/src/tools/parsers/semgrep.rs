use serde::Deserialize;

use crate::canonical::RawFinding;

use super::ToolOutput;

#[derive(Debug, Deserialize)]
pub struct SemgrepOutput {
    #[serde(default)]
    pub results: Vec<SemgrepResult>,
    #[serde(default, rename = "errors")]
    pub _errors: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct SemgrepResult {
    pub check_id: String,
    pub path: String,
    pub start: SemgrepLocation,
    pub extra: SemgrepExtra,
}

#[derive(Debug, Deserialize)]
pub struct SemgrepLocation {
    pub line: u32,
    #[serde(default)]
    pub col: u32,
}

#[derive(Debug, Deserialize)]
pub struct SemgrepExtra {
    #[serde(default)]
    pub message: String,
    pub severity: Option<String>,
    pub metadata: Option<SemgrepMetadata>,
    pub lines: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SemgrepMetadata {
    pub cwe: Option<Vec<String>>,
    pub owasp: Option<Vec<String>>,
}

impl SemgrepOutput {
    /// Parse Semgrep JSON output
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is malformed or doesn't match the expected schema
    pub fn parse(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

fn map_severity(raw: &str) -> String {
    match raw.to_lowercase().as_str() {
        "error" => "high".to_string(),
        "warning" => "medium".to_string(),
        "info" | "informational" => "informational".to_string(),
        other => other.to_string(),
    }
}

impl ToolOutput for SemgrepOutput {
    fn to_raw_findings(&self) -> Vec<RawFinding> {
        self.results
            .iter()
            .map(|r| {
                let mut finding = RawFinding {
                    native_id: Some(format!("{}:{}:{}", r.check_id, r.path, r.start.line)),
                    title: Some(r.check_id.clone()),
                    severity: r.extra.severity.as_deref().map(map_severity),
                    description: r.extra.message.clone(),
                    remediation: "Review the code referenced by the Semgrep rule.".to_string(),
                    ..RawFinding::default()
                }
                .with_metadata("path", r.path.clone())
                .with_metadata("line", r.start.line)
                .with_metadata("column", r.start.col);

                if let Some(ref lines) = r.extra.lines {
                    finding = finding.with_metadata("snippet", lines.clone());
                }

                if let Some(ref metadata) = r.extra.metadata {
                    if let Some(cwe) = metadata.cwe.as_ref().and_then(|c| c.first()) {
                        finding = finding.with_metadata("cwe", cwe.clone());
                    }
                    if let Some(ref owasp) = metadata.owasp {
                        finding = finding.with_metadata("owasp", owasp.clone());
                    }
                }

                finding
            })
            .collect()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_semgrep_output() {
        let json = r#"{
            "results": [{
                "check_id": "python.lang.security.audit.dangerous-subprocess-use",
                "path": "src/main.py",
                "start": {"line": 10, "col": 1},
                "end": {"line": 10, "col": 50},
                "extra": {
                    "message": "Detected subprocess call with shell=True",
                    "severity": "ERROR",
                    "lines": "subprocess.call(cmd, shell=True)"
                }
            }],
            "errors": []
        }"#;

        let output = SemgrepOutput::parse(json).expect("should parse semgrep output");
        assert_eq!(output.results.len(), 1);

        let findings = output.to_raw_findings();
        assert_eq!(findings.len(), 1);
        let first = findings.first().expect("should have one finding");
        assert_eq!(first.severity.as_deref(), Some("high"));
        assert_eq!(
            first.native_id.as_deref(),
            Some("python.lang.security.audit.dangerous-subprocess-use:src/main.py:10")
        );
        assert_eq!(first.metadata["snippet"], "subprocess.call(cmd, shell=True)");
    }

    #[test]
    fn test_parse_semgrep_with_cwe() {
        let json = r#"{
            "results": [{
                "check_id": "test-rule",
                "path": "src/app.py",
                "start": {"line": 5, "col": 1},
                "end": {"line": 5, "col": 20},
                "extra": {
                    "message": "SQL injection vulnerability",
                    "severity": "WARNING",
                    "metadata": {
                        "cwe": ["CWE-89"],
                        "owasp": ["A03:2021"]
                    }
                }
            }],
            "errors": []
        }"#;

        let output = SemgrepOutput::parse(json).expect("should parse semgrep with cwe");
        let findings = output.to_raw_findings();

        let first = findings.first().expect("should have one finding");
        assert_eq!(first.severity.as_deref(), Some("medium"));
        assert_eq!(first.metadata["cwe"], "CWE-89");
        assert_eq!(first.metadata["owasp"][0], "A03:2021");
    }

    #[test]
    fn test_info_severity_is_informational() {
        assert_eq!(map_severity("INFO"), "informational");
        assert_eq!(map_severity("INFORMATIONAL"), "informational");
        assert_eq!(map_severity("ERROR"), "high");
    }

    #[test]
    fn test_missing_severity_is_preserved_as_none() {
        let json = r#"{"results": [{
            "check_id": "r", "path": "a.py",
            "start": {"line": 1, "col": 1},
            "extra": {"message": "m"}
        }]}"#;
        let findings = SemgrepOutput::parse(json).unwrap().to_raw_findings();
        assert!(findings[0].severity.is_none());
    }

    #[test]
    fn test_parse_empty_semgrep_output() {
        let output = SemgrepOutput::parse(r#"{"results": [], "errors": []}"#)
            .expect("should parse empty output");
        assert!(output.to_raw_findings().is_empty());
    }

    #[test]
    fn test_malformed_output_is_error() {
        assert!(SemgrepOutput::parse("Traceback (most recent call last)").is_err());
    }
}
