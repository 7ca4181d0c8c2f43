//! aegis-core: multi-agent security scan orchestration
//!
//! Selects scanner agents for a repository and/or live target, runs them in
//! waves under a bounded worker pool, normalizes their output into canonical
//! findings and streams every session change to subscribers.

#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod agents;
pub mod api;
pub mod canonical;
pub mod config;
pub mod error;
pub mod events;
pub mod scheduler;
pub mod state;
pub mod tools;
pub mod workspace;

pub use agents::{ScanRequest, ToolAdapter};
pub use config::OrchestratorConfig;
pub use error::{AdapterError, Error, ErrorKind, Result};
pub use events::{SessionEvent, VoiceTrigger};
pub use scheduler::Scheduler;
pub use state::{AgentName, AgentStatus, Finding, ScanMode, ScanSession, Severity};
