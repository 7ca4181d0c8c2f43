//! Tool integration module

pub mod executor;
pub mod parsers;

pub use executor::{ExecResult, ToolExecution, ToolExecutor, ToolInvocation};
pub use parsers::{RawResult, ToolOutput};
