//! External tool execution
//!
//! Runs one scanner binary as a child process with piped output, a hard
//! wall-clock timeout and cooperative cancellation. The child is killed on
//! timeout, on cancel, and when the future is dropped.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::AdapterError;
use crate::state::models::AgentName;

/// Maximum captured bytes per stream (10MB)
pub const MAX_OUTPUT_SIZE: usize = 10_485_760;

/// How long to wait for pipes to drain after the child exited
const OUTPUT_DRAIN_GRACE: Duration = Duration::from_secs(5);

/// Marker appended to a stream that hit the size cap
const TRUNCATION_MARKER: &str = "\n[OUTPUT TRUNCATED - exceeded 10MB limit]";

/// Command line of one tool run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolInvocation {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: Vec<(String, String)>,
}

impl ToolInvocation {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            env: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.cwd = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Shell-like rendering for log lines
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Captured output of a finished process
#[derive(Debug, Clone)]
pub struct ExecResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i64,
    pub truncated: bool,
}

impl ExecResult {
    /// Check if command succeeded
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Last lines of stderr, for error messages
    pub fn stderr_tail(&self, max_lines: usize) -> String {
        let lines: Vec<&str> = self.stderr.trim_end().lines().collect();
        lines
            .iter()
            .skip(lines.len().saturating_sub(max_lines))
            .copied()
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Record of a tool execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolExecution {
    pub id: String,
    pub agent: AgentName,
    pub tool: String,
    pub args: Vec<String>,
    pub exit_code: Option<i64>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub truncated: bool,
    /// Set when the run ended without an exit code (timeout, cancel, spawn failure)
    pub error: Option<String>,
}

impl ToolExecution {
    pub fn new(agent: AgentName, invocation: &ToolInvocation) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            agent,
            tool: invocation.program.clone(),
            args: invocation.args.clone(),
            exit_code: None,
            started_at: Utc::now(),
            completed_at: None,
            truncated: false,
            error: None,
        }
    }

    /// Record completion
    pub fn complete(&mut self, result: &ExecResult) {
        self.exit_code = Some(result.exit_code);
        self.truncated = result.truncated;
        self.completed_at = Some(Utc::now());
    }

    pub fn abort(&mut self, err: &AdapterError) {
        self.error = Some(err.to_string());
        self.completed_at = Some(Utc::now());
    }

    pub fn duration(&self) -> Option<chrono::Duration> {
        self.completed_at.map(|end| end - self.started_at)
    }
}

/// Runs tool processes and keeps a record of each run
#[derive(Debug, Clone)]
pub struct ToolExecutor {
    max_output: usize,
    history: Arc<Mutex<Vec<ToolExecution>>>,
}

impl Default for ToolExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolExecutor {
    pub fn new() -> Self {
        Self::with_max_output(MAX_OUTPUT_SIZE)
    }

    pub fn with_max_output(max_output: usize) -> Self {
        Self {
            max_output,
            history: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Executions recorded so far, oldest first
    pub fn executions(&self) -> Vec<ToolExecution> {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn record(&self, execution: ToolExecution) {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(execution);
    }

    /// Run `invocation` to completion.
    ///
    /// A non-zero exit status is not an error here; adapters decide what an
    /// exit code means for their tool.
    pub async fn execute(
        &self,
        agent: AgentName,
        invocation: &ToolInvocation,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<ExecResult, AdapterError> {
        let mut execution = ToolExecution::new(agent, invocation);
        let outcome = self.run(invocation, timeout, cancel).await;
        match &outcome {
            Ok(result) => execution.complete(result),
            Err(err) => execution.abort(err),
        }
        self.record(execution);
        outcome
    }

    async fn run(
        &self,
        invocation: &ToolInvocation,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<ExecResult, AdapterError> {
        debug!("Executing: {}", invocation.display());

        let mut cmd = Command::new(&invocation.program);
        cmd.args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(ref cwd) = invocation.cwd {
            cmd.current_dir(cwd);
        }
        for (key, value) in &invocation.env {
            cmd.env(key, value);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| AdapterError::launch(&invocation.program, e))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AdapterError::launch(&invocation.program, "stdout not captured"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| AdapterError::launch(&invocation.program, "stderr not captured"))?;

        let cap = self.max_output;
        let stdout_task = tokio::spawn(read_capped(stdout, cap));
        let stderr_task = tokio::spawn(read_capped(stderr, cap));

        let waited = tokio::select! {
            r = tokio::time::timeout(timeout, child.wait()) => Some(r),
            _ = cancel.cancelled() => None,
        };

        let status = match waited {
            Some(Ok(Ok(status))) => status,
            Some(Ok(Err(e))) => {
                kill(&mut child, &invocation.program).await;
                stdout_task.abort();
                stderr_task.abort();
                return Err(AdapterError::launch(&invocation.program, e));
            }
            Some(Err(_)) => {
                warn!(
                    "{} timed out after {} seconds",
                    invocation.program,
                    timeout.as_secs()
                );
                kill(&mut child, &invocation.program).await;
                stdout_task.abort();
                stderr_task.abort();
                return Err(AdapterError::Timeout {
                    secs: timeout.as_secs(),
                });
            }
            None => {
                debug!("{} cancelled", invocation.program);
                kill(&mut child, &invocation.program).await;
                stdout_task.abort();
                stderr_task.abort();
                return Err(AdapterError::Cancelled);
            }
        };

        let (stdout, stdout_truncated) = drain(stdout_task).await;
        let (stderr, stderr_truncated) = drain(stderr_task).await;

        Ok(ExecResult {
            stdout,
            stderr,
            exit_code: status.code().map(i64::from).unwrap_or(-1),
            truncated: stdout_truncated || stderr_truncated,
        })
    }
}

async fn kill(child: &mut Child, program: &str) {
    if let Err(e) = child.kill().await {
        warn!("Failed to kill {}: {}", program, e);
    }
}

/// Read a stream to EOF, keeping at most `cap` bytes.
///
/// Reading continues past the cap so the child never blocks on a full pipe.
async fn read_capped<R>(mut reader: R, cap: usize) -> (Vec<u8>, bool)
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::new();
    let mut chunk = vec![0u8; 8192];
    let mut truncated = false;

    loop {
        let n = match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                warn!("Error reading tool output: {}", e);
                break;
            }
        };
        let room = cap.saturating_sub(buf.len());
        if n > room {
            truncated = true;
        }
        buf.extend(chunk.iter().take(n.min(room)));
    }
    (buf, truncated)
}

async fn drain(task: tokio::task::JoinHandle<(Vec<u8>, bool)>) -> (String, bool) {
    match tokio::time::timeout(OUTPUT_DRAIN_GRACE, task).await {
        Ok(Ok((bytes, truncated))) => {
            let mut text = String::from_utf8_lossy(&bytes).into_owned();
            if truncated {
                text.push_str(TRUNCATION_MARKER);
            }
            (text, truncated)
        }
        Ok(Err(e)) => {
            warn!("Output reader failed: {}", e);
            (String::new(), false)
        }
        Err(_) => {
            warn!("Output pipe still open after process exit, discarding");
            (String::new(), false)
        }
    }
}

#[cfg(all(test, unix))]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    fn sh(script: &str) -> ToolInvocation {
        ToolInvocation::new("sh").arg("-c").arg(script)
    }

    #[tokio::test]
    async fn test_captures_stdout_stderr_and_exit_code() {
        let executor = ToolExecutor::new();
        let result = executor
            .execute(
                AgentName::Static,
                &sh("echo out; echo err >&2; exit 3"),
                Duration::from_secs(10),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(result.stdout.trim(), "out");
        assert_eq!(result.stderr_tail(5), "err");
        assert_eq!(result.exit_code, 3);
        assert!(!result.success());

        let history = executor.executions();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].exit_code, Some(3));
        assert_eq!(history[0].tool, "sh");
        assert!(history[0].duration().is_some());
    }

    #[tokio::test]
    async fn test_timeout_kills_process() {
        let executor = ToolExecutor::new();
        let started = std::time::Instant::now();
        let err = executor
            .execute(
                AgentName::Dast,
                &sh("sleep 30"),
                Duration::from_millis(200),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, AdapterError::Timeout { .. }));
        assert!(started.elapsed() < Duration::from_secs(10));
        assert!(executor.executions()[0].error.is_some());
    }

    #[tokio::test]
    async fn test_cancellation_kills_process() {
        let executor = ToolExecutor::new();
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let err = executor
            .execute(
                AgentName::Fuzzer,
                &sh("sleep 30"),
                Duration::from_secs(60),
                &cancel,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AdapterError::Cancelled));
    }

    #[tokio::test]
    async fn test_missing_binary_is_execution_error() {
        let err = ToolExecutor::new()
            .execute(
                AgentName::Static,
                &ToolInvocation::new("definitely-not-a-real-scanner-binary"),
                Duration::from_secs(5),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::AdapterExecutionError);
    }

    #[tokio::test]
    async fn test_output_is_capped() {
        let executor = ToolExecutor::with_max_output(16);
        let result = executor
            .execute(
                AgentName::Template,
                &sh("i=0; while [ $i -lt 200 ]; do echo 0123456789; i=$((i+1)); done"),
                Duration::from_secs(10),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert!(result.truncated);
        assert!(result.stdout.starts_with("0123456789\n01234"));
        assert!(result.stdout.ends_with(TRUNCATION_MARKER));
        assert_eq!(result.exit_code, 0);
    }

    #[tokio::test]
    async fn test_cwd_and_env_are_applied() {
        let dir = tempfile::TempDir::new().unwrap();
        let invocation = sh("pwd; echo $AEGIS_TEST_VAR")
            .current_dir(dir.path())
            .env("AEGIS_TEST_VAR", "hello");
        let result = ToolExecutor::new()
            .execute(
                AgentName::Secret,
                &invocation,
                Duration::from_secs(10),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        let lines: Vec<&str> = result.stdout.lines().collect();
        let expected = dir.path().canonicalize().unwrap();
        assert_eq!(
            std::path::Path::new(lines[0]).canonicalize().unwrap(),
            expected
        );
        assert_eq!(lines[1], "hello");
    }

    #[test]
    fn test_invocation_display() {
        let inv = ToolInvocation::new("semgrep").args(["--json", "--quiet", "."]);
        assert_eq!(inv.display(), "semgrep --json --quiet .");
    }
}
