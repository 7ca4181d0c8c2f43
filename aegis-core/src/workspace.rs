//! Repository workspaces
//!
//! A scan with a repository source needs a local directory for the static
//! agents. Local paths are used in place; remote URLs are shallow-cloned
//! into a per-scan directory and removed when the scan ends.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::config::{ToolsConfig, WorkspaceConfig};
use crate::state::models::RepoSource;
use crate::{Error, Result};

/// A checked-out repository
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    pub path: PathBuf,
    /// Owned workspaces are deleted on release
    pub owned: bool,
    pub commit: Option<String>,
}

/// Acquires and releases repository workspaces
#[async_trait]
pub trait WorkspaceProvider: Send + Sync {
    async fn acquire(&self, repo: &RepoSource, scan_id: &str) -> Result<Workspace>;

    async fn release(&self, workspace: Workspace) -> Result<()>;
}

/// True for URLs that need cloning rather than a local path
pub fn is_remote(url: &str) -> bool {
    ["https://", "http://", "ssh://", "git://", "git@"]
        .iter()
        .any(|prefix| url.starts_with(prefix))
}

/// Uses an existing local directory as-is
#[derive(Debug, Clone, Default)]
pub struct LocalWorkspace;

#[async_trait]
impl WorkspaceProvider for LocalWorkspace {
    async fn acquire(&self, repo: &RepoSource, _scan_id: &str) -> Result<Workspace> {
        let path = PathBuf::from(&repo.url);
        let meta = tokio::fs::metadata(&path)
            .await
            .map_err(|e| Error::Workspace(format!("{}: {}", repo.url, e)))?;
        if !meta.is_dir() {
            return Err(Error::Workspace(format!("{} is not a directory", repo.url)));
        }
        Ok(Workspace {
            path,
            owned: false,
            commit: None,
        })
    }

    async fn release(&self, _workspace: Workspace) -> Result<()> {
        Ok(())
    }
}

/// Shallow `git clone` into `base_dir/<scan_id>-<repo>`
#[derive(Debug, Clone)]
pub struct GitWorkspace {
    base_dir: PathBuf,
    git_bin: String,
    default_token: Option<String>,
    max_retries: usize,
    clone_timeout: Duration,
    min_delay: Duration,
}

/// Removes a clone destination unless the clone completed.
///
/// Lives across the clone future, so a cancelled scan that drops the
/// acquire future mid-clone still leaves nothing behind.
struct PartialClone {
    dest: Option<PathBuf>,
}

impl PartialClone {
    fn new(dest: &Path) -> Self {
        Self {
            dest: Some(dest.to_path_buf()),
        }
    }

    fn keep(mut self) -> PathBuf {
        self.dest.take().unwrap_or_default()
    }
}

impl Drop for PartialClone {
    fn drop(&mut self) {
        let Some(dest) = self.dest.take() else {
            return;
        };
        match std::fs::remove_dir_all(&dest) {
            Ok(()) => debug!(path = %dest.display(), "removed partial clone"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove partial clone {}: {}", dest.display(), e),
        }
    }
}

#[derive(Debug)]
struct CloneError {
    message: String,
    transient: bool,
}

impl GitWorkspace {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            git_bin: "git".to_string(),
            default_token: None,
            max_retries: 3,
            clone_timeout: Duration::from_secs(300),
            min_delay: Duration::from_secs(1),
        }
    }

    pub fn from_config(base_dir: impl Into<PathBuf>, tools: &ToolsConfig, config: &WorkspaceConfig) -> Self {
        Self {
            git_bin: tools.git_bin.clone(),
            default_token: config.token.clone(),
            max_retries: config.clone_retries,
            clone_timeout: Duration::from_secs(config.clone_timeout_secs),
            ..Self::new(base_dir)
        }
    }

    pub fn with_git_bin(mut self, git_bin: impl Into<String>) -> Self {
        self.git_bin = git_bin.into();
        self
    }

    pub fn with_retries(mut self, max_retries: usize, min_delay: Duration) -> Self {
        self.max_retries = max_retries;
        self.min_delay = min_delay;
        self
    }

    fn workspace_dir(&self, repo_url: &str, scan_id: &str) -> PathBuf {
        self.base_dir
            .join(format!("{}-{}", scan_id, sanitize_repo_name(repo_url)))
    }

    async fn clone_once(
        &self,
        clone_url: &str,
        branch: Option<&str>,
        dest: &Path,
        token: Option<&str>,
    ) -> std::result::Result<(), CloneError> {
        if tokio::fs::try_exists(dest).await.unwrap_or(false) {
            warn!("Workspace {} already exists, removing", dest.display());
            tokio::fs::remove_dir_all(dest).await.map_err(|e| CloneError {
                message: e.to_string(),
                transient: false,
            })?;
        }

        let mut cmd = Command::new(&self.git_bin);
        cmd.arg("clone").arg("--depth").arg("1").arg("--single-branch");
        if let Some(branch) = branch {
            cmd.arg("--branch").arg(branch);
        }
        cmd.arg(clone_url)
            .arg(dest)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = match tokio::time::timeout(self.clone_timeout, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(CloneError {
                    message: format!("failed to run {}: {}", self.git_bin, e),
                    transient: false,
                });
            }
            Err(_) => {
                return Err(CloneError {
                    message: format!(
                        "clone timed out after {} seconds",
                        self.clone_timeout.as_secs()
                    ),
                    transient: true,
                });
            }
        };

        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let message = redact(stderr.trim(), token);
        Err(CloneError {
            transient: is_transient_git_error(&message),
            message: if message.is_empty() {
                format!("git clone exited with {}", output.status)
            } else {
                message
            },
        })
    }

    async fn head_commit(&self, dir: &Path) -> Option<String> {
        let output = Command::new(&self.git_bin)
            .arg("-C")
            .arg(dir)
            .args(["rev-parse", "HEAD"])
            .stdin(Stdio::null())
            .output()
            .await
            .ok()?;
        output
            .status
            .success()
            .then(|| String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

#[async_trait]
impl WorkspaceProvider for GitWorkspace {
    async fn acquire(&self, repo: &RepoSource, scan_id: &str) -> Result<Workspace> {
        tokio::fs::create_dir_all(&self.base_dir).await?;

        let dest = self.workspace_dir(&repo.url, scan_id);
        let guard = PartialClone::new(&dest);
        let token = repo.token.as_deref().or(self.default_token.as_deref());
        let clone_url = inject_token(&repo.url, token);
        let branch = repo.branch.as_deref();

        info!(
            "Cloning repository: {} (branch: {})",
            repo.url,
            branch.unwrap_or("default")
        );

        let backoff = ExponentialBuilder::default()
            .with_min_delay(self.min_delay)
            .with_max_delay(Duration::from_secs(30))
            .with_max_times(self.max_retries)
            .with_jitter();

        (|| self.clone_once(&clone_url, branch, &dest, token))
            .retry(backoff)
            .when(|e: &CloneError| e.transient)
            .notify(|e: &CloneError, delay: Duration| {
                warn!("Clone failed ({}), retrying in {:?}", e.message, delay);
            })
            .await
            .map_err(|e| Error::Workspace(format!("failed to clone {}: {}", repo.url, e.message)))?;
        let dest = guard.keep();

        let commit = self.head_commit(&dest).await;
        debug!(path = %dest.display(), ?commit, "repository cloned");

        Ok(Workspace {
            path: dest,
            owned: true,
            commit,
        })
    }

    async fn release(&self, workspace: Workspace) -> Result<()> {
        if !workspace.owned {
            return Ok(());
        }
        info!("Cleaning up workspace: {}", workspace.path.display());
        match tokio::fs::remove_dir_all(&workspace.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Local paths in place, remote URLs cloned
#[derive(Debug, Clone)]
pub struct SourceWorkspaceProvider {
    local: LocalWorkspace,
    git: GitWorkspace,
}

impl SourceWorkspaceProvider {
    pub fn new(git: GitWorkspace) -> Self {
        Self {
            local: LocalWorkspace,
            git,
        }
    }
}

#[async_trait]
impl WorkspaceProvider for SourceWorkspaceProvider {
    async fn acquire(&self, repo: &RepoSource, scan_id: &str) -> Result<Workspace> {
        if is_remote(&repo.url) {
            self.git.acquire(repo, scan_id).await
        } else {
            self.local.acquire(repo, scan_id).await
        }
    }

    async fn release(&self, workspace: Workspace) -> Result<()> {
        if workspace.owned {
            self.git.release(workspace).await
        } else {
            self.local.release(workspace).await
        }
    }
}

/// `https://github.com/Acme/App.git` → `acme-app`
pub fn sanitize_repo_name(url: &str) -> String {
    let trimmed = url.trim_end_matches('/').trim_end_matches(".git");
    let segments: Vec<&str> = trimmed
        .split(['/', ':'])
        .filter(|s| !s.is_empty())
        .collect();
    let tail = segments
        .iter()
        .skip(segments.len().saturating_sub(2))
        .copied()
        .collect::<Vec<_>>()
        .join("-");

    let name: String = tail
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect();

    if name.is_empty() {
        "repo".to_string()
    } else {
        name
    }
}

/// Put the token into an https remote; other schemes are left alone
pub fn inject_token(url: &str, token: Option<&str>) -> String {
    match (token, url.strip_prefix("https://")) {
        (Some(token), Some(rest)) if !token.is_empty() => format!("https://{}@{}", token, rest),
        _ => url.to_string(),
    }
}

fn redact(message: &str, token: Option<&str>) -> String {
    match token {
        Some(token) if !token.is_empty() => message.replace(token, "***"),
        _ => message.to_string(),
    }
}

fn is_transient_git_error(stderr: &str) -> bool {
    let lower = stderr.to_lowercase();
    [
        "could not resolve host",
        "timed out",
        "connection reset",
        "connection refused",
        "early eof",
        "rpc failed",
        "502",
        "503",
        "504",
        "temporarily unavailable",
    ]
    .iter()
    .any(|pattern| lower.contains(pattern))
}
