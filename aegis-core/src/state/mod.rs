//! State management module

pub mod archive;
pub mod migrations;
pub mod models;
pub mod schema;
pub mod store;
pub mod task;

pub use archive::SessionArchive;
pub use migrations::run_migrations;
pub use models::{
    AgentCategory, AgentName, Finding, FindingsSummary, Metadata, ModeProfile, RepoSource,
    ScanMode, ScanSession, Severity, Wave,
};
pub use store::{SessionStore, Subscription};
pub use task::{AgentStatus, AgentTask, TransitionError};
