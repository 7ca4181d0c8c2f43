//! CLI argument parsing

use std::path::PathBuf;

use aegis_core::state::{AgentName, ScanMode};
use clap::{ArgAction, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "aegis")]
#[command(author, version, about = "Multi-agent security scan orchestrator")]
pub struct Args {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose output (repeat for more)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run a scan and stream its progress
    Scan(ScanArgs),

    /// Show a stored scan (the latest one when no id is given)
    Status {
        /// Scan identifier
        scan_id: Option<String>,

        /// Print the full session as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Debug, clap::Args)]
pub struct ScanArgs {
    /// Repository URL or local directory
    #[arg(long)]
    pub repo: Option<String>,

    /// Branch to check out
    #[arg(long, requires = "repo")]
    pub branch: Option<String>,

    /// Access token for private repositories
    #[arg(long, env = "AEGIS_REPO_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Live application URL (http or https)
    #[arg(long)]
    pub target_url: Option<String>,

    /// Scan mode (adaptive, standard, fast, deep)
    #[arg(long, default_value = "adaptive")]
    pub mode: ScanMode,

    /// Maximum agents running at once
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Only run these agents (comma-separated)
    #[arg(long, value_delimiter = ',')]
    pub agents: Vec<AgentName>,

    /// Also serve the HTTP status API while the scan runs
    #[arg(long)]
    pub serve: bool,

    /// Print the final session as JSON instead of a summary
    #[arg(long)]
    pub json: bool,
}

impl Args {
    /// Default log filter for the verbosity flag
    pub fn log_filter(&self) -> &'static str {
        match self.verbose {
            0 => "aegis_core=warn,aegis=info",
            1 => "aegis_core=info,aegis=info",
            2 => "aegis_core=debug,aegis=debug",
            _ => "trace",
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_scan_flags() {
        let args = Args::parse_from([
            "aegis",
            "-vv",
            "scan",
            "--repo",
            "https://github.com/org/app.git",
            "--branch",
            "main",
            "--target-url",
            "http://localhost:3000",
            "--mode",
            "fast",
            "--agents",
            "static,secret,report",
        ]);

        assert_eq!(args.verbose, 2);
        let Command::Scan(scan) = args.command else {
            panic!("expected scan command");
        };
        assert_eq!(scan.repo.as_deref(), Some("https://github.com/org/app.git"));
        assert_eq!(scan.branch.as_deref(), Some("main"));
        assert_eq!(scan.mode, ScanMode::Fast);
        assert_eq!(
            scan.agents,
            vec![AgentName::Static, AgentName::Secret, AgentName::Report]
        );
        assert!(!scan.serve);
    }

    #[test]
    fn test_branch_requires_repo() {
        let result = Args::try_parse_from(["aegis", "scan", "--branch", "main"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_status_defaults_to_latest() {
        let args = Args::parse_from(["aegis", "status"]);
        assert!(matches!(
            args.command,
            Command::Status {
                scan_id: None,
                json: false
            }
        ));
    }

    #[test]
    fn test_unknown_mode_rejected() {
        let result = Args::try_parse_from(["aegis", "scan", "--mode", "turbo"]);
        assert!(result.is_err());
    }
}
