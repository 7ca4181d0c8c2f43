//! Scanner agents: selection, adapters and the adaptive policy

pub mod adapters;
pub mod meta;
pub mod policy;
pub mod registry;
pub mod selection;
pub mod traits;

pub use adapters::{
    FfufAdapter, GitleaksAdapter, NucleiAdapter, SemgrepAdapter, TrivyAdapter, ZapAdapter,
};
pub use meta::{AdaptiveAnalysisAgent, ReportAgent, ThreatAgent};
pub use policy::{AdaptivePolicy, EndpointSignalPolicy, PolicyDecision};
pub use registry::AdapterRegistry;
pub use selection::{ScanRequest, select_agents, validate_target_url};
pub use traits::{AgentContext, ProgressReporter, ToolAdapter};
