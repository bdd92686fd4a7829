//! Session - the explicit per-request context handed to kernel components.

use std::sync::Arc;

use crate::capabilities::CapabilityRegistry;
use crate::config::KernelConfig;
use crate::error::Result;
use crate::kernel::{AgentLoop, Dispatcher, Scheduler};
use crate::model::ModelClient;
use crate::observability::EventSink;

/// Config, capability registry, model client and event sink for one run.
#[derive(Clone)]
pub struct Session {
    id: String,
    config: KernelConfig,
    registry: Arc<CapabilityRegistry>,
    model: Arc<dyn ModelClient>,
    sink: Arc<dyn EventSink>,
}

impl Session {
    /// Build a session over the built-in capabilities
    pub fn new(
        config: KernelConfig,
        model: Arc<dyn ModelClient>,
        sink: Arc<dyn EventSink>,
    ) -> Result<Self> {
        let registry = CapabilityRegistry::builtin(&config.capabilities);
        Self::with_registry(config, registry, model, sink)
    }

    /// Build a session over a caller-supplied registry
    pub fn with_registry(
        config: KernelConfig,
        registry: CapabilityRegistry,
        model: Arc<dyn ModelClient>,
        sink: Arc<dyn EventSink>,
    ) -> Result<Self> {
        registry.validate()?;
        let id = Self::new_id();
        tracing::debug!(session_id = %id, capabilities = registry.len(), "Session created");
        Ok(Self {
            id,
            config,
            registry: Arc::new(registry),
            model,
            sink,
        })
    }

    /// Fresh session identifier
    pub fn new_id() -> String {
        uuid::Uuid::new_v4().to_string()
    }

    /// Replace the generated id, e.g. to match an id already given to a sink
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    pub fn registry(&self) -> &CapabilityRegistry {
        &self.registry
    }

    pub fn sink(&self) -> Arc<dyn EventSink> {
        self.sink.clone()
    }

    pub fn dispatcher(&self) -> Dispatcher {
        Dispatcher::new(self.registry.clone())
    }

    pub fn agent_loop(&self) -> AgentLoop {
        AgentLoop::new(self.dispatcher(), self.model.clone(), self.sink.clone())
            .with_settings(&self.config.model)
            .with_max_iterations(self.config.max_iterations)
    }

    pub fn scheduler(&self) -> Scheduler {
        Scheduler::new(self.dispatcher(), self.model.clone(), self.sink.clone())
            .with_settings(&self.config.model)
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("model", &self.model.model_name())
            .field("registry", &self.registry)
            .finish()
    }
}
