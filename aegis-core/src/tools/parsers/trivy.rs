use serde::Deserialize;

use crate::canonical::RawFinding;

use super::ToolOutput;

#[derive(Debug, Deserialize)]
pub struct TrivyOutput {
    #[serde(rename = "Results", default)]
    pub results: Vec<TrivyResult>,
}

#[derive(Debug, Deserialize)]
pub struct TrivyResult {
    #[serde(rename = "Target", default)]
    pub target: String,
    /// `null` when the target has no vulnerable packages
    #[serde(rename = "Vulnerabilities", default)]
    pub vulnerabilities: Option<Vec<TrivyVulnerability>>,
}

#[derive(Debug, Deserialize)]
pub struct TrivyVulnerability {
    #[serde(rename = "VulnerabilityID")]
    pub id: String,
    #[serde(rename = "PkgName", default)]
    pub package: String,
    #[serde(rename = "InstalledVersion", default)]
    pub installed_version: String,
    #[serde(rename = "FixedVersion")]
    pub fixed_version: Option<String>,
    #[serde(rename = "Title")]
    pub title: Option<String>,
    #[serde(rename = "Description", default)]
    pub description: String,
    #[serde(rename = "Severity")]
    pub severity: Option<String>,
    #[serde(rename = "PrimaryURL")]
    pub primary_url: Option<String>,
}

impl TrivyOutput {
    /// Parse `trivy fs --format json` output
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is malformed or doesn't match the expected schema
    pub fn parse(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

impl ToolOutput for TrivyOutput {
    fn to_raw_findings(&self) -> Vec<RawFinding> {
        self.results
            .iter()
            .flat_map(|result| {
                result
                    .vulnerabilities
                    .iter()
                    .flatten()
                    .map(move |v| (result.target.as_str(), v))
            })
            .map(|(target, v)| {
                let title = v.title.clone().unwrap_or_else(|| {
                    format!("{} in {}@{}", v.id, v.package, v.installed_version)
                });

                let remediation = match (&v.fixed_version, &v.primary_url) {
                    (Some(fixed), _) if !fixed.is_empty() => {
                        format!("Upgrade {} to {}", v.package, fixed)
                    }
                    (_, Some(url)) => format!("See {}", url),
                    _ => "See vendor guidance".to_string(),
                };

                let mut finding = RawFinding {
                    native_id: Some(format!("{}:{}:{}", v.id, v.package, target)),
                    title: Some(title),
                    severity: v.severity.clone(),
                    description: v.description.clone(),
                    remediation,
                    ..RawFinding::default()
                }
                .with_metadata("cve", v.id.clone())
                .with_metadata("package", v.package.clone())
                .with_metadata("installed_version", v.installed_version.clone())
                .with_metadata("target", target.to_string());

                if let Some(ref fixed) = v.fixed_version {
                    finding = finding.with_metadata("fixed_version", fixed.clone());
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
    fn test_parse_trivy_output() {
        let json = r#"{
            "SchemaVersion": 2,
            "Results": [{
                "Target": "package-lock.json",
                "Class": "lang-pkgs",
                "Vulnerabilities": [{
                    "VulnerabilityID": "CVE-2021-23337",
                    "PkgName": "lodash",
                    "InstalledVersion": "4.17.20",
                    "FixedVersion": "4.17.21",
                    "Title": "Command injection in lodash",
                    "Description": "Lodash versions prior to 4.17.21 are vulnerable",
                    "Severity": "HIGH",
                    "PrimaryURL": "https://avd.aquasec.com/nvd/cve-2021-23337"
                }]
            }]
        }"#;

        let findings = TrivyOutput::parse(json).unwrap().to_raw_findings();
        assert_eq!(findings.len(), 1);
        let first = &findings[0];
        assert_eq!(first.severity.as_deref(), Some("HIGH"));
        assert_eq!(
            first.native_id.as_deref(),
            Some("CVE-2021-23337:lodash:package-lock.json")
        );
        assert_eq!(first.remediation, "Upgrade lodash to 4.17.21");
        assert_eq!(first.metadata["fixed_version"], "4.17.21");
    }

    #[test]
    fn test_null_vulnerabilities_are_skipped() {
        let json = r#"{"Results": [
            {"Target": "Cargo.lock", "Vulnerabilities": null},
            {"Target": "go.sum", "Vulnerabilities": [{
                "VulnerabilityID": "GHSA-1", "PkgName": "x", "InstalledVersion": "1",
                "Severity": "LOW"
            }]}
        ]}"#;

        let findings = TrivyOutput::parse(json).unwrap().to_raw_findings();
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].title.as_deref(), Some("GHSA-1 in x@1"));
        assert_eq!(findings[0].remediation, "See vendor guidance");
    }

    #[test]
    fn test_no_results() {
        assert!(
            TrivyOutput::parse(r#"{"SchemaVersion": 2}"#)
                .unwrap()
                .to_raw_findings()
                .is_empty()
        );
    }
}
