//! Adapter registry keyed by agent name

use std::collections::HashMap;
use std::sync::Arc;

use super::adapters::{
    FfufAdapter, GitleaksAdapter, NucleiAdapter, SemgrepAdapter, TrivyAdapter, ZapAdapter,
};
use super::meta::{AdaptiveAnalysisAgent, ReportAgent, ThreatAgent};
use super::traits::ToolAdapter;
use crate::config::OrchestratorConfig;
use crate::state::models::AgentName;

/// Registry mapping each agent slot to the adapter that fills it
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: HashMap<AgentName, Arc<dyn ToolAdapter>>,
}

impl AdapterRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in adapter for every agent
    pub fn with_defaults(config: &OrchestratorConfig) -> Self {
        let tools = &config.tools;
        let timeouts = &config.timeouts;
        let mut registry = Self::new();
        registry.register(SemgrepAdapter::new(tools, timeouts));
        registry.register(TrivyAdapter::new(tools, timeouts));
        registry.register(GitleaksAdapter::new(tools, timeouts));
        registry.register(ZapAdapter::new(tools, timeouts));
        registry.register(FfufAdapter::new(tools, timeouts));
        registry.register(NucleiAdapter::new(tools, timeouts));
        registry.register(AdaptiveAnalysisAgent::new(timeouts));
        registry.register(ThreatAgent::new(timeouts));
        registry.register(ReportAgent::new(timeouts));
        registry
    }

    /// Register an adapter, replacing any previous one for the same agent
    pub fn register(&mut self, adapter: impl ToolAdapter + 'static) {
        self.insert(Arc::new(adapter));
    }

    pub fn insert(&mut self, adapter: Arc<dyn ToolAdapter>) {
        self.adapters.insert(adapter.agent(), adapter);
    }

    pub fn get(&self, agent: AgentName) -> Option<Arc<dyn ToolAdapter>> {
        self.adapters.get(&agent).cloned()
    }

    pub fn contains(&self, agent: AgentName) -> bool {
        self.adapters.contains_key(&agent)
    }

    /// Registered agents in canonical order
    pub fn agents(&self) -> Vec<AgentName> {
        AgentName::ALL
            .into_iter()
            .filter(|a| self.adapters.contains_key(a))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}

impl std::fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterRegistry")
            .field("agents", &self.agents())
            .finish()
    }
}
