use serde::Deserialize;

use crate::canonical::RawFinding;

use super::{ENDPOINT_KEY, ToolOutput};

#[derive(Debug, Default, Deserialize)]
pub struct FfufOutput {
    #[serde(default)]
    pub results: Vec<FfufResult>,
}

#[derive(Debug, Deserialize)]
pub struct FfufResult {
    pub url: String,
    #[serde(default)]
    pub status: u16,
    #[serde(default)]
    pub length: u64,
    #[serde(default)]
    pub words: u64,
}

impl FfufOutput {
    /// Parse ffuf output.
    ///
    /// Accepts a full report document with a `results` array, or the `-json`
    /// stream with one result object per line. Progress lines are ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if the output is non-empty but contains no JSON at
    /// all, or if a line that starts a JSON object does not parse
    pub fn parse(output: &str) -> Result<Self, serde_json::Error> {
        let trimmed = output.trim();
        if trimmed.is_empty() {
            return Ok(Self::default());
        }
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(trimmed)
            && value.get("results").is_some()
        {
            return serde_json::from_value(value);
        }

        let mut results = Vec::new();
        let mut last_err = None;
        let mut parsed_any = false;

        for line in trimmed.lines().map(str::trim).filter(|l| !l.is_empty()) {
            let value = match serde_json::from_str::<serde_json::Value>(line) {
                Ok(value) => value,
                // A truncated object is data loss, not progress noise
                Err(e) if line.starts_with('{') => return Err(e),
                Err(e) => {
                    last_err = Some(e);
                    continue;
                }
            };
            parsed_any = true;
            if value.get("results").is_some() {
                let doc: FfufOutput = serde_json::from_value(value)?;
                results.extend(doc.results);
            } else if value.get("url").is_some() {
                results.push(serde_json::from_value(value)?);
            }
        }

        match last_err {
            Some(e) if !parsed_any => Err(e),
            _ => Ok(Self { results }),
        }
    }
}

impl ToolOutput for FfufOutput {
    fn to_raw_findings(&self) -> Vec<RawFinding> {
        self.results
            .iter()
            .map(|r| {
                RawFinding::new(format!("Discovered path: {}", r.url), "medium")
                    .with_native_id(r.url.clone())
                    .with_description("ffuf discovered a reachable endpoint while fuzzing")
                    .with_remediation(
                        "Ensure sensitive paths enforce authentication and rate limiting.",
                    )
                    .with_metadata("url", r.url.clone())
                    .with_metadata("status", r.status)
                    .with_metadata("length", r.length)
                    .with_metadata(ENDPOINT_KEY, vec![r.url.clone()])
            })
            .collect()
    }
}
