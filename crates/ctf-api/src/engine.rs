use std::sync::Arc;

use ctf_runtime::plugins::{
    control_flow_plugin, user_io_plugin, variable_plugin, PromptSource, StdinPrompt,
};
use ctf_runtime::{
    EngineContext, Executor, MonitoringTimeManager, OsTimeManager, Plugin, PluginRegistry,
    StatusListener, SteppedTimeManager, TelemetryLink, TelemetrySource, TimeManager,
};

use crate::{CtfApiError, CtfConfig, TimeManagerKind};

/// Assembles an [`Executor`] from configuration: built-in plugins first, then
/// extra plugins in the order given, minus anything on the disable list.
pub struct EngineBuilder {
    config: CtfConfig,
    plugins: Vec<Plugin>,
    telemetry: Option<Arc<dyn TelemetrySource>>,
    links: Vec<Arc<dyn TelemetryLink>>,
    prompt: Arc<dyn PromptSource>,
    time: Option<Box<dyn TimeManager>>,
    listeners: Vec<Arc<dyn StatusListener>>,
}

impl EngineBuilder {
    pub fn new(config: CtfConfig) -> Self {
        Self {
            config,
            plugins: Vec::new(),
            telemetry: None,
            links: Vec::new(),
            prompt: Arc::new(StdinPrompt),
            time: None,
            listeners: Vec::new(),
        }
    }

    pub fn config(&self) -> &CtfConfig {
        &self.config
    }

    pub fn with_plugin(mut self, plugin: Plugin) -> Self {
        self.plugins.push(plugin);
        self
    }

    /// Uses `telemetry` for `SetUserVariableFromTlm` and drains it once per
    /// poll cycle.
    pub fn with_telemetry<T>(mut self, telemetry: Arc<T>) -> Self
    where
        T: TelemetrySource + TelemetryLink + 'static,
    {
        let link: Arc<dyn TelemetryLink> = telemetry.clone();
        let source: Arc<dyn TelemetrySource> = telemetry;
        self.links.push(link);
        self.telemetry = Some(source);
        self
    }

    pub fn with_link(mut self, link: Arc<dyn TelemetryLink>) -> Self {
        self.links.push(link);
        self
    }

    pub fn with_prompt(mut self, prompt: Arc<dyn PromptSource>) -> Self {
        self.prompt = prompt;
        self
    }

    /// Replaces the time manager selected by `core.time_manager`.
    pub fn with_time_manager(mut self, time: Box<dyn TimeManager>) -> Self {
        self.time = Some(time);
        self
    }

    /// Receives script, test and instruction status updates as they happen.
    pub fn with_status_listener(mut self, listener: Arc<dyn StatusListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    pub fn build_registry(&mut self) -> Result<PluginRegistry, CtfApiError> {
        let mut registry = PluginRegistry::with_disabled(self.config.core.disabled_plugins.clone());
        registry.register(control_flow_plugin())?;
        registry.register(variable_plugin(self.telemetry.clone()))?;
        registry.register(user_io_plugin(Arc::clone(&self.prompt)))?;
        for plugin in self.plugins.drain(..) {
            registry.register(plugin)?;
        }
        Ok(registry)
    }

    /// Builds the executor and initializes every registered plugin.
    pub fn build(mut self) -> Result<Executor, CtfApiError> {
        self.config.validate()?;
        let registry = self.build_registry()?;
        let variables = self.config.seed_variables()?;

        let poll_period = self.config.core.ctf_verification_poll_period;
        let base: Box<dyn TimeManager> = match self.time.take() {
            Some(time) => time,
            None => match self.config.core.time_manager {
                TimeManagerKind::Os => Box::new(OsTimeManager::new(poll_period)),
                TimeManagerKind::Stepped => Box::new(SteppedTimeManager::new(poll_period)),
            },
        };
        let mut time = MonitoringTimeManager::new(base).with_checks(registry.continuous_checks());
        for link in self.links {
            time = time.with_link(link);
        }

        log::info!(
            "Registered plugins: {}",
            registry
                .plugins()
                .iter()
                .map(|plugin| plugin.name.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );
        let mut executor = Executor::new(
            registry,
            Box::new(time),
            EngineContext::new(variables),
            self.config.executor_options(),
        );
        for listener in self.listeners {
            executor = executor.with_status_listener(listener);
        }
        executor.initialize_plugins()?;
        Ok(executor)
    }
}
