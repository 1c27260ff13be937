use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use ctf_core::{CtfError, CtfValue, ParamType};
use serde::{Deserialize, Serialize};

use crate::context::EngineContext;
use crate::variables::VariableStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Passed,
    Failed,
    /// No verdict yet. A verify-required instruction polls again; any other
    /// instruction treats it as a failure.
    Pending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Jump(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Outcome {
    pub status: Status,
    pub flow: Flow,
}

impl Outcome {
    pub fn pass() -> Self {
        Self {
            status: Status::Passed,
            flow: Flow::Continue,
        }
    }

    pub fn fail() -> Self {
        Self {
            status: Status::Failed,
            flow: Flow::Continue,
        }
    }

    pub fn pending() -> Self {
        Self {
            status: Status::Pending,
            flow: Flow::Continue,
        }
    }

    pub fn from_bool(passed: bool) -> Self {
        if passed {
            Self::pass()
        } else {
            Self::fail()
        }
    }

    pub fn jump_to(mut self, index: usize) -> Self {
        self.flow = Flow::Jump(index);
        self
    }

    pub fn passed(&self) -> bool {
        self.status == Status::Passed
    }
}

pub type Handler =
    Arc<dyn Fn(&mut EngineContext, &CommandArgs) -> Result<Outcome, CtfError> + Send + Sync>;

/// Plugin lifecycle hooks and continuous checks.
pub type Hook = Arc<dyn Fn(&mut EngineContext) -> Result<(), CtfError> + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamSpec {
    pub name: String,
    pub ty: ParamType,
    pub required: bool,
    pub aliases: Vec<String>,
    /// Passed to the handler without `$name$` substitution.
    pub raw: bool,
}

impl ParamSpec {
    pub fn required(name: impl Into<String>, ty: ParamType) -> Self {
        Self {
            name: name.into(),
            ty,
            required: true,
            aliases: Vec::new(),
            raw: false,
        }
    }

    pub fn optional(name: impl Into<String>, ty: ParamType) -> Self {
        Self {
            required: false,
            ..Self::required(name, ty)
        }
    }

    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.aliases.push(alias.into());
        self
    }

    /// Leaves substitution to the handler.
    pub fn unresolved(mut self) -> Self {
        self.raw = true;
        self
    }

    fn accepts(&self, key: &str) -> bool {
        self.name == key || self.aliases.iter().any(|alias| alias == key)
    }
}

#[derive(Clone)]
pub struct CommandSpec {
    pub name: String,
    pub params: Vec<ParamSpec>,
    pub handler: Handler,
}

impl fmt::Debug for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandSpec")
            .field("name", &self.name)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

impl CommandSpec {
    /// Maps instruction data onto declared parameter names. Aliases are
    /// normalized and the argument count must lie within
    /// `required..=required + optional`.
    pub fn bind(&self, data: &BTreeMap<String, CtfValue>) -> Result<CommandArgs, CtfError> {
        let mut values = BTreeMap::new();
        for (key, value) in data {
            let spec = self
                .params
                .iter()
                .find(|spec| spec.accepts(key))
                .ok_or_else(|| {
                    CtfError::parameter(
                        "ARG_UNKNOWN",
                        format!("{} does not take an argument named \"{}\".", self.name, key),
                        key.as_str(),
                    )
                })?;
            if values.insert(spec.name.clone(), value.clone()).is_some() {
                return Err(CtfError::parameter(
                    "ARG_DUPLICATE",
                    format!("{} received \"{}\" more than once.", self.name, spec.name),
                    key.as_str(),
                ));
            }
        }

        let required = self.params.iter().filter(|spec| spec.required).count();
        if values.len() < required || values.len() > self.params.len() {
            return Err(CtfError::parameter(
                "ARG_COUNT",
                format!(
                    "{} expects between {} and {} arguments, got {}.",
                    self.name,
                    required,
                    self.params.len(),
                    values.len()
                ),
                self.name.as_str(),
            ));
        }
        if let Some(missing) = self
            .params
            .iter()
            .find(|spec| spec.required && !values.contains_key(&spec.name))
        {
            return Err(CtfError::parameter(
                "ARG_MISSING",
                format!("{} requires argument \"{}\".", self.name, missing.name),
                missing.name.as_str(),
            ));
        }

        Ok(CommandArgs { values })
    }

    /// Binds `data`, then substitutes variables into every argument not
    /// marked [`ParamSpec::unresolved`].
    pub fn bind_resolved(
        &self,
        data: &BTreeMap<String, CtfValue>,
        variables: &VariableStore,
    ) -> Result<CommandArgs, CtfError> {
        let mut args = self.bind(data)?;
        for spec in self.params.iter().filter(|spec| !spec.raw) {
            if let Some(value) = args.values.get_mut(&spec.name) {
                *value = variables.resolve_deep(value)?;
            }
        }
        Ok(args)
    }

    pub fn invoke(
        &self,
        ctx: &mut EngineContext,
        data: &BTreeMap<String, CtfValue>,
    ) -> Result<Outcome, CtfError> {
        let args = self.bind(data)?;
        (self.handler)(ctx, &args)
    }
}

/// Bound arguments of one instruction, keyed by canonical parameter name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommandArgs {
    values: BTreeMap<String, CtfValue>,
}

impl CommandArgs {
    pub fn get(&self, name: &str) -> Option<&CtfValue> {
        self.values.get(name)
    }

    pub fn value(&self, name: &str) -> Result<&CtfValue, CtfError> {
        self.values.get(name).ok_or_else(|| {
            CtfError::parameter(
                "ARG_MISSING",
                format!("Argument \"{}\" is required.", name),
                name,
            )
        })
    }

    pub fn str(&self, name: &str) -> Result<&str, CtfError> {
        let value = self.value(name)?;
        value.as_str().ok_or_else(|| wrong_type(name, "string", value))
    }

    pub fn opt_str(&self, name: &str) -> Result<Option<&str>, CtfError> {
        match self.get(name) {
            None => Ok(None),
            Some(value) => value
                .as_str()
                .map(Some)
                .ok_or_else(|| wrong_type(name, "string", value)),
        }
    }

    /// Renders a scalar argument as text; identifiers such as message ids
    /// may be written either as strings or numbers.
    pub fn text(&self, name: &str) -> Result<String, CtfError> {
        let value = self.value(name)?;
        match value {
            CtfValue::List(_) | CtfValue::Dict(_) => Err(wrong_type(name, "scalar", value)),
            _ => Ok(value.to_string()),
        }
    }

    pub fn bool_or(&self, name: &str, default: bool) -> Result<bool, CtfError> {
        match self.get(name) {
            None => Ok(default),
            Some(value) => value
                .as_bool()
                .ok_or_else(|| wrong_type(name, "boolean", value)),
        }
    }

    pub fn list(&self, name: &str) -> Result<&[CtfValue], CtfError> {
        let value = self.value(name)?;
        value.as_list().ok_or_else(|| wrong_type(name, "list", value))
    }

    pub fn values(&self) -> &BTreeMap<String, CtfValue> {
        &self.values
    }
}

fn wrong_type(name: &str, expected: &str, value: &CtfValue) -> CtfError {
    CtfError::parameter(
        "ARG_TYPE",
        format!(
            "Argument \"{}\" must be a {}, got {} {}.",
            name,
            expected,
            value.type_tag(),
            value
        ),
        value.to_string(),
    )
}

#[derive(Clone)]
pub struct ContinuousCheck {
    pub plugin: String,
    pub name: String,
    pub check: Hook,
}

impl fmt::Debug for ContinuousCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContinuousCheck")
            .field("plugin", &self.plugin)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// A plugin is plain data: a command map plus the instruction sets that
/// change how the executor treats those commands.
#[derive(Clone)]
pub struct Plugin {
    pub name: String,
    pub description: String,
    commands: BTreeMap<String, CommandSpec>,
    verify_required: BTreeSet<String>,
    fatal_on_fail: BTreeSet<String>,
    continuous_checks: Vec<ContinuousCheck>,
    initialize: Option<Hook>,
    shutdown: Option<Hook>,
}

impl fmt::Debug for Plugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Plugin")
            .field("name", &self.name)
            .field("commands", &self.commands.keys().collect::<Vec<_>>())
            .field("verify_required", &self.verify_required)
            .field("fatal_on_fail", &self.fatal_on_fail)
            .finish_non_exhaustive()
    }
}

impl Plugin {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            commands: BTreeMap::new(),
            verify_required: BTreeSet::new(),
            fatal_on_fail: BTreeSet::new(),
            continuous_checks: Vec::new(),
            initialize: None,
            shutdown: None,
        }
    }

    pub fn command<F>(mut self, name: impl Into<String>, params: Vec<ParamSpec>, handler: F) -> Self
    where
        F: Fn(&mut EngineContext, &CommandArgs) -> Result<Outcome, CtfError> + Send + Sync + 'static,
    {
        let name = name.into();
        self.commands.insert(
            name.clone(),
            CommandSpec {
                name,
                params,
                handler: Arc::new(handler),
            },
        );
        self
    }

    pub fn verify_required(mut self, instruction: impl Into<String>) -> Self {
        self.verify_required.insert(instruction.into());
        self
    }

    pub fn fatal_on_fail(mut self, instruction: impl Into<String>) -> Self {
        self.fatal_on_fail.insert(instruction.into());
        self
    }

    pub fn continuous_check<F>(mut self, name: impl Into<String>, check: F) -> Self
    where
        F: Fn(&mut EngineContext) -> Result<(), CtfError> + Send + Sync + 'static,
    {
        self.continuous_checks.push(ContinuousCheck {
            plugin: self.name.clone(),
            name: name.into(),
            check: Arc::new(check),
        });
        self
    }

    pub fn on_initialize<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut EngineContext) -> Result<(), CtfError> + Send + Sync + 'static,
    {
        self.initialize = Some(Arc::new(hook));
        self
    }

    pub fn on_shutdown<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut EngineContext) -> Result<(), CtfError> + Send + Sync + 'static,
    {
        self.shutdown = Some(Arc::new(hook));
        self
    }

    pub fn commands(&self) -> impl Iterator<Item = &CommandSpec> {
        self.commands.values()
    }

    pub fn command_spec(&self, instruction: &str) -> Option<&CommandSpec> {
        self.commands.get(instruction)
    }

    pub fn is_verify_required(&self, instruction: &str) -> bool {
        self.verify_required.contains(instruction)
    }

    pub fn is_fatal_on_fail(&self, instruction: &str) -> bool {
        self.fatal_on_fail.contains(instruction)
    }

    pub fn continuous_checks(&self) -> &[ContinuousCheck] {
        &self.continuous_checks
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: ParamType,
    #[serde(rename = "isArray")]
    pub is_array: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstructionInfo {
    pub name: String,
    pub parameters: Vec<ParameterInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginInfo {
    pub group_name: String,
    pub description: String,
    pub instructions: Vec<InstructionInfo>,
}

/// Plugins in registration order. Lookup returns the first plugin that
/// declares an instruction.
#[derive(Debug, Clone, Default)]
pub struct PluginRegistry {
    plugins: Vec<Plugin>,
    disabled: BTreeSet<String>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_disabled<I, S>(disabled: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            plugins: Vec::new(),
            disabled: disabled.into_iter().map(Into::into).collect(),
        }
    }

    /// Returns `false` when the plugin is on the disable list and was skipped.
    pub fn register(&mut self, plugin: Plugin) -> Result<bool, CtfError> {
        if self.disabled.contains(&plugin.name) {
            log::info!("Plugin {} is disabled. Skipping it.", plugin.name);
            return Ok(false);
        }
        if self.plugin(&plugin.name).is_some() {
            return Err(CtfError::new(
                "REGISTRY_DUPLICATE_PLUGIN",
                format!("A plugin named \"{}\" is already registered.", plugin.name),
            ));
        }
        for command in plugin.commands.keys() {
            if let Some((owner, _)) = self.find(command) {
                log::warn!(
                    "Instruction {} of plugin {} is shadowed by plugin {}.",
                    command,
                    plugin.name,
                    owner.name
                );
            }
        }
        log::debug!("Registered plugin {}", plugin.name);
        self.plugins.push(plugin);
        Ok(true)
    }

    pub fn plugins(&self) -> &[Plugin] {
        &self.plugins
    }

    pub fn plugin(&self, name: &str) -> Option<&Plugin> {
        self.plugins.iter().find(|plugin| plugin.name == name)
    }

    pub fn find(&self, instruction: &str) -> Option<(&Plugin, &CommandSpec)> {
        self.plugins.iter().find_map(|plugin| {
            plugin
                .command_spec(instruction)
                .map(|command| (plugin, command))
        })
    }

    pub fn continuous_checks(&self) -> Vec<ContinuousCheck> {
        self.plugins
            .iter()
            .flat_map(|plugin| plugin.continuous_checks.iter().cloned())
            .collect()
    }

    /// Runs every plugin's initialize hook, in registration order.
    pub fn initialize(&self, ctx: &mut EngineContext) -> Result<(), CtfError> {
        for plugin in &self.plugins {
            if let Some(hook) = &plugin.initialize {
                hook(ctx).map_err(|error| {
                    log::error!("Failed to initialize plugin {}: {}", plugin.name, error);
                    CtfError::new(
                        "REGISTRY_INIT_FAILED",
                        format!("Plugin \"{}\" failed to initialize: {}", plugin.name, error),
                    )
                })?;
            }
            log::info!("Initialized plugin {}", plugin.name);
        }
        Ok(())
    }

    /// Runs every shutdown hook. Failures are logged and do not stop the
    /// remaining plugins from shutting down.
    pub fn shutdown(&self, ctx: &mut EngineContext) {
        for plugin in &self.plugins {
            if let Some(hook) = &plugin.shutdown {
                if let Err(error) = hook(ctx) {
                    log::error!("Plugin {} failed to shut down: {}", plugin.name, error);
                }
            }
        }
    }

    pub fn plugin_info(&self) -> Vec<PluginInfo> {
        self.plugins
            .iter()
            .map(|plugin| PluginInfo {
                group_name: plugin.name.clone(),
                description: plugin.description.clone(),
                instructions: plugin
                    .commands()
                    .map(|command| InstructionInfo {
                        name: command.name.clone(),
                        parameters: command
                            .params
                            .iter()
                            .filter(|param| param.ty != ParamType::Ignore)
                            .map(|param| ParameterInfo {
                                name: param.name.clone(),
                                ty: param.ty,
                                is_array: param.ty.is_array(),
                            })
                            .collect(),
                    })
                    .collect(),
            })
            .collect()
    }
}
