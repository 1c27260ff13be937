use std::sync::Arc;

use ctf_core::{CtfError, CtfValue, Operator, ParamType, TypeTag};

use crate::context::EngineContext;
use crate::registry::{CommandArgs, Outcome, ParamSpec, Plugin};
use crate::telemetry::TelemetrySource;
use crate::variables::{AssignOp, VariableStore};

pub const VARIABLE_PLUGIN: &str = "VariablePlugin";

/// `SetUserVariable`, `CheckUserVariable`, `SetUserVariableFromTlm` and
/// `SetLabel`. Telemetry reads are unavailable without a source.
pub fn variable_plugin(telemetry: Option<Arc<dyn TelemetrySource>>) -> Plugin {
    Plugin::new(VARIABLE_PLUGIN, "Variable Plugin")
        .command(
            "SetUserVariable",
            vec![
                ParamSpec::required("variable_name", ParamType::String).alias("name"),
                ParamSpec::required("operator", ParamType::String).alias("op"),
                ParamSpec::required("value", ParamType::Other),
                ParamSpec::optional("variable_type", ParamType::String).alias("type"),
            ],
            set_user_variable,
        )
        .command(
            "CheckUserVariable",
            vec![
                ParamSpec::required("variable_name", ParamType::String).alias("name"),
                ParamSpec::required("operator", ParamType::Comparison).alias("op"),
                ParamSpec::required("value", ParamType::Other),
            ],
            check_user_variable,
        )
        .command(
            "SetUserVariableFromTlm",
            vec![
                ParamSpec::required("variable_name", ParamType::String)
                    .alias("user_variable")
                    .alias("name"),
                ParamSpec::required("mid", ParamType::TlmMid),
                ParamSpec::required("tlm_variable", ParamType::String),
                ParamSpec::optional("is_header", ParamType::Boolean),
                ParamSpec::optional("target", ParamType::String),
                ParamSpec::optional("variable_type", ParamType::String).alias("type"),
            ],
            move |ctx, args| set_user_variable_from_tlm(ctx, args, telemetry.as_deref()),
        )
        .command(
            "SetLabel",
            vec![ParamSpec::required("label", ParamType::String)],
            |_, args| {
                log::info!("Set label '{}' for control flow instructions", args.str("label")?);
                Ok(Outcome::pass())
            },
        )
}

fn type_tag(args: &CommandArgs) -> Result<Option<TypeTag>, CtfError> {
    args.opt_str("variable_type")?
        .map(str::parse::<TypeTag>)
        .transpose()
}

fn set_user_variable(ctx: &mut EngineContext, args: &CommandArgs) -> Result<Outcome, CtfError> {
    let name = args.str("variable_name")?;
    let op = args.str("operator")?.parse::<AssignOp>()?;
    let tag = type_tag(args)?;

    let stored = ctx.variables.set(name, op, args.value("value")?, tag)?;
    log::info!("The variable {} becomes {}", name, stored);
    Ok(Outcome::pass())
}

fn check_user_variable(ctx: &mut EngineContext, args: &CommandArgs) -> Result<Outcome, CtfError> {
    let name = args.str("variable_name")?;
    let operator = args.str("operator")?;
    match check_variable(&ctx.variables, name, operator, args.value("value")?) {
        Ok(passed) => Ok(Outcome::from_bool(passed)),
        Err(error) if error.code == "VARIABLE_UNBOUND" => {
            log::warn!("Variable {} is not defined", name);
            Ok(Outcome::fail())
        }
        Err(error) => Err(error),
    }
}

/// Compares a stored variable against `value` with an operator from the
/// operator table.
fn check_variable(
    variables: &VariableStore,
    name: &str,
    operator: &str,
    value: &CtfValue,
) -> Result<bool, CtfError> {
    let current = variables.get(name).ok_or_else(|| {
        CtfError::parameter(
            "VARIABLE_UNBOUND",
            format!("Variable \"{}\" is not defined.", name),
            name,
        )
    })?;
    compare(current, operator, value)
}

/// Results that are not booleans are judged by truthiness.
pub(crate) fn compare(current: &CtfValue, operator: &str, value: &CtfValue) -> Result<bool, CtfError> {
    let operator = operator.parse::<Operator>()?;
    let status = operator.apply(current, value)?.is_truthy();
    if status {
        log::info!("Checking {} {} {} => {}", current, operator, value, status);
    } else {
        log::warn!("Checking {} {} {} => {}", current, operator, value, status);
    }
    Ok(status)
}

fn set_user_variable_from_tlm(
    ctx: &mut EngineContext,
    args: &CommandArgs,
    telemetry: Option<&dyn TelemetrySource>,
) -> Result<Outcome, CtfError> {
    let name = args.str("variable_name")?;
    let mid = args.text("mid")?;
    let path = args.str("tlm_variable")?;
    let is_header = args.bool_or("is_header", false)?;
    let target = args.opt_str("target")?;
    let tag = type_tag(args)?;

    let telemetry = telemetry.ok_or_else(|| {
        CtfError::new(
            "TELEMETRY_UNAVAILABLE",
            "No telemetry source is configured for SetUserVariableFromTlm.",
        )
    })?;
    log::info!(
        "Set user variable: '{}' from tlm mid: '{}' variable: '{}'",
        name,
        mid,
        path
    );
    let value = telemetry.tlm_value(&mid, path, is_header, target)?;
    let stored = ctx.variables.set(name, AssignOp::Assign, &value, tag)?;
    log::info!("The variable {} becomes {}", name, stored);
    Ok(Outcome::pass())
}
