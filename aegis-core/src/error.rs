//! Error types for aegis-core

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::state::task::TransitionError;

/// Result type alias using aegis Error
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for aegis
#[derive(Debug, Error, Diagnostic)]
pub enum Error {
    #[error("Configuration error: {0}")]
    #[diagnostic(code(aegis::config))]
    Config(String),

    #[error("Database error: {0}")]
    #[diagnostic(code(aegis::database))]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    #[diagnostic(code(aegis::io))]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    #[diagnostic(code(aegis::serde))]
    Serde(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    #[diagnostic(code(aegis::toml))]
    Toml(#[from] toml::de::Error),

    #[error("Session not found: {0}")]
    #[diagnostic(code(aegis::session))]
    SessionNotFound(String),

    #[error("Invalid task transition: {0}")]
    #[diagnostic(code(aegis::task))]
    InvalidTransition(#[from] TransitionError),

    #[error("Workspace error: {0}")]
    #[diagnostic(code(aegis::workspace))]
    Workspace(String),
}

/// Error kinds attached to a failed agent task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    AdapterTimeout,
    AdapterExecutionError,
    AdapterOutputError,
    CancellationRequested,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::AdapterTimeout => write!(f, "adapter_timeout"),
            ErrorKind::AdapterExecutionError => write!(f, "adapter_execution_error"),
            ErrorKind::AdapterOutputError => write!(f, "adapter_output_error"),
            ErrorKind::CancellationRequested => write!(f, "cancellation_requested"),
        }
    }
}

/// Failure of a single adapter invocation.
///
/// These never escape the adapter boundary as errors of the scan; the
/// scheduler converts them into a failed agent task.
#[derive(Debug, Clone, Error)]
pub enum AdapterError {
    #[error("timed out after {secs}s")]
    Timeout { secs: u64 },

    #[error("{program} exited with code {exit_code}: {stderr}")]
    Execution {
        program: String,
        exit_code: i64,
        stderr: String,
    },

    #[error("unparsable output: {0}")]
    Output(String),

    #[error("cancelled")]
    Cancelled,
}

impl AdapterError {
    /// Build an execution error for a launch failure (binary missing, bad cwd)
    pub fn launch(program: impl Into<String>, err: impl std::fmt::Display) -> Self {
        AdapterError::Execution {
            program: program.into(),
            exit_code: -1,
            stderr: err.to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            AdapterError::Timeout { .. } => ErrorKind::AdapterTimeout,
            AdapterError::Execution { .. } => ErrorKind::AdapterExecutionError,
            AdapterError::Output(_) => ErrorKind::AdapterOutputError,
            AdapterError::Cancelled => ErrorKind::CancellationRequested,
        }
    }
}

impl From<serde_json::Error> for AdapterError {
    fn from(err: serde_json::Error) -> Self {
        AdapterError::Output(err.to_string())
    }
}
