use serde::Deserialize;

use crate::canonical::RawFinding;

use super::{ENDPOINT_KEY, ToolOutput};

/// ZAP baseline JSON report (`-J report.json`)
#[derive(Debug, Deserialize)]
pub struct ZapOutput {
    #[serde(default)]
    pub site: Vec<ZapSite>,
}

#[derive(Debug, Deserialize)]
pub struct ZapSite {
    #[serde(rename = "@name", alias = "name", default)]
    pub name: String,
    #[serde(default)]
    pub alerts: Vec<ZapAlert>,
}

#[derive(Debug, Deserialize)]
pub struct ZapAlert {
    #[serde(default)]
    pub pluginid: String,
    pub alert: Option<String>,
    pub riskcode: Option<String>,
    pub riskdesc: Option<String>,
    #[serde(default)]
    pub desc: String,
    #[serde(default)]
    pub solution: String,
    pub reference: Option<String>,
    pub cweid: Option<String>,
    #[serde(default)]
    pub instances: Vec<ZapInstance>,
}

#[derive(Debug, Deserialize)]
pub struct ZapInstance {
    pub uri: String,
    #[serde(default)]
    pub method: String,
}

impl ZapOutput {
    /// Parse a ZAP JSON report
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is malformed or doesn't match the expected schema
    pub fn parse(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

impl ZapAlert {
    /// ZAP risk codes: 3 high, 2 medium, 1 low, 0 informational
    fn severity(&self) -> Option<String> {
        let from_code = self.riskcode.as_deref().and_then(|code| match code.trim() {
            "3" => Some("high"),
            "2" => Some("medium"),
            "1" => Some("low"),
            "0" => Some("informational"),
            _ => None,
        });
        from_code.map(str::to_string).or_else(|| {
            self.riskdesc
                .as_deref()
                .and_then(|d| d.split_whitespace().next())
                .map(str::to_lowercase)
        })
    }
}

impl ToolOutput for ZapOutput {
    fn to_raw_findings(&self) -> Vec<RawFinding> {
        self.site
            .iter()
            .flat_map(|site| site.alerts.iter().map(move |alert| (site, alert)))
            .map(|(site, alert)| {
                let remediation = if alert.solution.is_empty() {
                    "See ZAP recommendation".to_string()
                } else {
                    alert.solution.clone()
                };
                let endpoints: Vec<&str> =
                    alert.instances.iter().map(|i| i.uri.as_str()).collect();

                let mut finding = RawFinding {
                    native_id: Some(format!("{}:{}", alert.pluginid, site.name)),
                    title: alert.alert.clone(),
                    severity: alert.severity(),
                    description: alert.desc.clone(),
                    remediation,
                    ..RawFinding::default()
                }
                .with_metadata("site", site.name.clone())
                .with_metadata("plugin_id", alert.pluginid.clone());

                if let Some(ref cwe) = alert.cweid {
                    finding = finding.with_metadata("cweid", cwe.clone());
                }
                if let Some(ref reference) = alert.reference {
                    finding = finding.with_metadata("reference", reference.clone());
                }
                if !endpoints.is_empty() {
                    finding = finding.with_metadata(ENDPOINT_KEY, endpoints);
                }
                finding
            })
            .collect()
    }
}
