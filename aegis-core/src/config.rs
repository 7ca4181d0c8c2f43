//! Configuration for the scan orchestrator

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::state::models::AgentName;
use crate::{Error, Result};

/// Local override file name
pub const LOCAL_CONFIG_FILE: &str = "aegis.toml";

/// Scheduling and retention
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Worker pool size per scan
    pub concurrency: usize,
    /// Buffered events per scan before slow subscribers lag
    pub event_capacity: usize,
    /// How long finished sessions stay in memory
    pub retention_secs: u64,
    pub janitor_interval_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            concurrency: 3,
            event_capacity: 256,
            retention_secs: 3600,
            janitor_interval_secs: 60,
        }
    }
}

impl SchedulerConfig {
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }

    pub fn janitor_interval(&self) -> Duration {
        Duration::from_secs(self.janitor_interval_secs.max(1))
    }
}

/// Scanner binaries and their inputs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub semgrep_bin: String,
    pub semgrep_config: String,
    pub trivy_bin: String,
    pub gitleaks_bin: String,
    pub zap_baseline_bin: String,
    pub ffuf_bin: String,
    pub ffuf_wordlist: PathBuf,
    pub nuclei_bin: String,
    pub git_bin: String,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            semgrep_bin: "semgrep".to_string(),
            semgrep_config: "auto".to_string(),
            trivy_bin: "trivy".to_string(),
            gitleaks_bin: "gitleaks".to_string(),
            zap_baseline_bin: "zap-baseline.py".to_string(),
            ffuf_bin: "ffuf".to_string(),
            ffuf_wordlist: PathBuf::from("/usr/share/wordlists/dirb/common.txt"),
            nuclei_bin: "nuclei".to_string(),
            git_bin: "git".to_string(),
        }
    }
}

/// Base per-agent timeouts in seconds, before mode scaling
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutsConfig {
    #[serde(rename = "static")]
    pub static_analysis: u64,
    pub dependency: u64,
    pub secret: u64,
    pub dast: u64,
    pub fuzzer: u64,
    pub template: u64,
    pub adaptive: u64,
    pub threat: u64,
    pub report: u64,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            static_analysis: 600,
            dependency: 600,
            secret: 300,
            dast: 1200,
            fuzzer: 900,
            template: 900,
            adaptive: 120,
            threat: 120,
            report: 120,
        }
    }
}

impl TimeoutsConfig {
    pub fn for_agent(&self, agent: AgentName) -> Duration {
        let secs = match agent {
            AgentName::Static => self.static_analysis,
            AgentName::Dependency => self.dependency,
            AgentName::Secret => self.secret,
            AgentName::Dast => self.dast,
            AgentName::Fuzzer => self.fuzzer,
            AgentName::Template => self.template,
            AgentName::Adaptive => self.adaptive,
            AgentName::Threat => self.threat,
            AgentName::Report => self.report,
        };
        Duration::from_secs(secs)
    }
}

/// Where scan artifacts go
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Per-scan tool reports land in `results_dir/<scan_id>`
    pub results_dir: PathBuf,
    /// Repository checkouts
    pub workspaces_dir: PathBuf,
    /// Snapshot archive; `None` keeps sessions in memory only
    pub archive: Option<PathBuf>,
}

fn aegis_home() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".aegis")
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            results_dir: PathBuf::from("aegis_output"),
            workspaces_dir: std::env::temp_dir().join("aegis-workspaces"),
            archive: Some(aegis_home().join("scans.db")),
        }
    }
}

/// Repository checkout settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceConfig {
    /// Default token for private https remotes; supports `${VAR}`
    pub token: Option<String>,
    pub clone_retries: usize,
    pub clone_timeout_secs: u64,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            token: None,
            clone_retries: 3,
            clone_timeout_secs: 300,
        }
    }
}

/// HTTP status surface
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8000".to_string(),
        }
    }
}

/// Complete orchestrator configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub timeouts: TimeoutsConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub workspace: WorkspaceConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

impl OrchestratorConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse configuration from TOML string
    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration with cascade:
    /// 1. `explicit` path, if given (must exist)
    /// 2. ./aegis.toml (local override)
    /// 3. ~/.aegis/config.toml (global defaults)
    /// 4. Built-in defaults
    ///
    /// `${VAR}` references are expanded from the environment.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let mut config = match explicit {
            Some(path) => Self::from_file(path)?,
            None => {
                let local = PathBuf::from(LOCAL_CONFIG_FILE);
                match Self::global_config_path() {
                    _ if local.is_file() => Self::from_file(&local)?,
                    Some(global) if global.is_file() => Self::from_file(&global)?,
                    _ => Self::default(),
                }
            }
        };
        config.expand_env_vars();
        Ok(config)
    }

    /// Get the path to the global config file
    pub fn global_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".aegis").join("config.toml"))
    }

    pub fn validate(&self) -> Result<()> {
        if self.scheduler.concurrency == 0 {
            return Err(Error::Config("scheduler.concurrency must be at least 1".into()));
        }
        if self.scheduler.event_capacity == 0 {
            return Err(Error::Config(
                "scheduler.event_capacity must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Expand `${VAR}` references in credentials and tool paths
    pub fn expand_env_vars(&mut self) {
        self.expand_with(|name| std::env::var(name).ok());
    }

    fn expand_with(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(ref token) = self.workspace.token {
            self.workspace.token = Some(expand(token, &lookup));
        }
        let tools = &mut self.tools;
        for field in [
            &mut tools.semgrep_bin,
            &mut tools.semgrep_config,
            &mut tools.trivy_bin,
            &mut tools.gitleaks_bin,
            &mut tools.zap_baseline_bin,
            &mut tools.ffuf_bin,
            &mut tools.nuclei_bin,
            &mut tools.git_bin,
        ] {
            *field = expand(field, &lookup);
        }
        let wordlist = tools.ffuf_wordlist.to_string_lossy().into_owned();
        tools.ffuf_wordlist = PathBuf::from(expand(&wordlist, &lookup));
    }
}

/// Replace every `${NAME}` whose variable is set; unset ones stay verbatim
fn expand(value: &str, lookup: &impl Fn(&str) -> Option<String>) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let name = &after[..end];
                match lookup(name) {
                    Some(v) => out.push_str(&v),
                    None => {
                        out.push_str("${");
                        out.push_str(name);
                        out.push('}');
                    }
                }
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = OrchestratorConfig::parse("").unwrap();
        assert_eq!(config.scheduler.concurrency, 3);
        assert_eq!(config.tools.semgrep_config, "auto");
        assert_eq!(
            config.timeouts.for_agent(AgentName::Dast),
            Duration::from_secs(1200)
        );
    }

    #[test]
    fn test_parse_partial_sections() {
        let toml = r#"
[scheduler]
concurrency = 5

[tools]
nuclei_bin = "/opt/nuclei/nuclei"

[timeouts]
static = 30
report = 10

[output]
results_dir = "/tmp/results"
"#;
        let config = OrchestratorConfig::parse(toml).unwrap();
        assert_eq!(config.scheduler.concurrency, 5);
        assert_eq!(config.scheduler.retention_secs, 3600);
        assert_eq!(config.tools.nuclei_bin, "/opt/nuclei/nuclei");
        assert_eq!(config.tools.trivy_bin, "trivy");
        assert_eq!(
            config.timeouts.for_agent(AgentName::Static),
            Duration::from_secs(30)
        );
        assert_eq!(
            config.timeouts.for_agent(AgentName::Secret),
            Duration::from_secs(300)
        );
        assert_eq!(config.output.results_dir, PathBuf::from("/tmp/results"));
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let err = OrchestratorConfig::parse("[scheduler]\nconcurrency = 0\n").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_invalid_toml_is_error() {
        assert!(matches!(
            OrchestratorConfig::parse("[scheduler\nconcurrency = 2"),
            Err(Error::Toml(_))
        ));
    }

    #[test]
    fn test_env_var_expansion() {
        let toml = r#"
[workspace]
token = "${AEGIS_GH_TOKEN}"

[tools]
ffuf_wordlist = "${WORDLISTS}/common.txt"
semgrep_bin = "${UNSET_VAR}"
"#;
        let mut config = OrchestratorConfig::parse(toml).unwrap();
        config.expand_with(|name| match name {
            "AEGIS_GH_TOKEN" => Some("ghp_expanded".to_string()),
            "WORDLISTS" => Some("/srv/lists".to_string()),
            _ => None,
        });

        assert_eq!(config.workspace.token.as_deref(), Some("ghp_expanded"));
        assert_eq!(
            config.tools.ffuf_wordlist,
            PathBuf::from("/srv/lists/common.txt")
        );
        assert_eq!(config.tools.semgrep_bin, "${UNSET_VAR}");
    }

    #[test]
    fn test_expand_handles_unterminated_reference() {
        let lookup = |_: &str| Some("x".to_string());
        assert_eq!(expand("a${B", &lookup), "a${B");
        assert_eq!(expand("${A}-${B}", &lookup), "x-x");
        assert_eq!(expand("plain", &lookup), "plain");
    }

    #[test]
    fn test_load_explicit_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(&path, "[scheduler]\nconcurrency = 7\n").unwrap();

        let config = OrchestratorConfig::load(Some(&path)).unwrap();
        assert_eq!(config.scheduler.concurrency, 7);

        assert!(OrchestratorConfig::load(Some(&dir.path().join("missing.toml"))).is_err());
    }

    #[test]
    fn test_global_config_path() {
        let path = OrchestratorConfig::global_config_path().unwrap();
        assert!(path.ends_with(".aegis/config.toml"));
    }
}
