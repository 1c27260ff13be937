use ctf_core::{CtfError, CtfValue, Instruction, ParamType};

use crate::context::EngineContext;
use crate::labels::{LabelMap, BEGIN_LOOP, ELSE_CONDITION, END_CONDITION, END_LOOP, IF_CONDITION};
use crate::plugins::variable::compare;
use crate::registry::{CommandArgs, Outcome, ParamSpec, Plugin};
use crate::variables::VariableStore;

pub const CONTROL_FLOW_PLUGIN: &str = "ControlFlowPlugin";

pub fn control_flow_plugin() -> Plugin {
    let label = || ParamSpec::required("label", ParamType::String).unresolved();
    let conditions = || ParamSpec::required("conditions", ParamType::Comparison).unresolved();

    Plugin::new(CONTROL_FLOW_PLUGIN, "CTF ControlFlow Plugin")
        .command(IF_CONDITION, vec![label(), conditions()], if_condition)
        .command(ELSE_CONDITION, vec![label()], else_condition)
        .command(END_CONDITION, vec![label()], |_, args| {
            log::info!("End of conditional block '{}'", args.str("label")?);
            Ok(Outcome::pass())
        })
        .command(BEGIN_LOOP, vec![label(), conditions()], begin_loop)
        .command(END_LOOP, vec![label()], end_loop)
}

/// Marks the block opened by an `IfCondition` or `BeginLoop` as not taken and
/// returns where execution continues. Used when the instruction's arguments
/// cannot be bound, so the block is never entered.
pub(crate) fn skip_block(labels: &mut LabelMap, instruction: &Instruction) -> Option<usize> {
    let label = instruction.data.get("label")?.as_str()?;
    match instruction.name.as_str() {
        IF_CONDITION => {
            let block = labels.conditionals.get_mut(label)?;
            block.condition_eval = Some(false);
            Some(block.else_index.unwrap_or(block.end_index))
        }
        BEGIN_LOOP => {
            let block = labels.loops.get_mut(label)?;
            block.condition_eval = Some(false);
            Some(block.end_index)
        }
        _ => None,
    }
}

/// Verdict of a condition list. `error` is kept when the list could not be
/// evaluated, in which case `holds` is false.
struct Evaluation {
    holds: bool,
    error: Option<CtfError>,
}

impl Evaluation {
    fn outcome(&self) -> Outcome {
        match &self.error {
            Some(error) => {
                log::error!("Condition could not be evaluated: {}", error);
                Outcome::fail()
            }
            None => Outcome::pass(),
        }
    }
}

/// Conjunction of `{variable, compare, value}` triples. An empty list holds.
/// Conditions arrive unsubstituted: `variable` names a variable, bare or as
/// `$name$`, and `$name$` references in `value` are expanded here.
fn evaluate(variables: &VariableStore, conditions: Option<&CtfValue>) -> Evaluation {
    match evaluate_all(variables, conditions) {
        Ok(holds) => Evaluation { holds, error: None },
        Err(error) => Evaluation {
            holds: false,
            error: Some(error),
        },
    }
}

fn evaluate_all(variables: &VariableStore, conditions: Option<&CtfValue>) -> Result<bool, CtfError> {
    let conditions = match conditions {
        Some(CtfValue::List(items)) => items,
        Some(other) => {
            return Err(CtfError::parameter(
                "CONDITIONS_NOT_LIST",
                format!("Conditions must be a list of comparisons, got {}.", other),
                other.to_string(),
            ))
        }
        None => {
            return Err(CtfError::parameter(
                "CONDITIONS_NOT_LIST",
                "Conditions are missing.",
                "conditions",
            ))
        }
    };

    for condition in conditions {
        let fields = condition.as_dict().ok_or_else(|| malformed(condition))?;
        let field = |key: &str| fields.get(key).ok_or_else(|| malformed(condition));

        let operator = variables.resolve_value(field("compare")?)?;
        let operator = operator.as_str().ok_or_else(|| malformed(condition))?;

        let current = match field("variable")? {
            CtfValue::String(reference) => variables.lookup(reference)?,
            literal => variables.resolve_deep(literal)?,
        };
        let expected = variables.resolve_deep(field("value")?)?;
        if !compare(&current, operator, &expected)? {
            return Ok(false);
        }
    }
    Ok(true)
}

fn malformed(condition: &CtfValue) -> CtfError {
    CtfError::parameter(
        "CONDITION_MALFORMED",
        format!(
            "Condition {} must have string \"variable\" and \"compare\" fields and a \"value\".",
            condition
        ),
        condition.to_string(),
    )
}

fn if_condition(ctx: &mut EngineContext, args: &CommandArgs) -> Result<Outcome, CtfError> {
    let label = args.str("label")?;
    let evaluation = evaluate(&ctx.variables, args.get("conditions"));
    let block = ctx.labels.conditional_mut(label)?;
    block.condition_eval = Some(evaluation.holds);

    let outcome = evaluation.outcome();
    if evaluation.holds {
        log::info!("Condition '{}' holds. Entering the if branch.", label);
        Ok(outcome)
    } else {
        let target = block.else_index.unwrap_or(block.end_index);
        log::info!("Condition '{}' does not hold. Jumping to {}.", label, target);
        Ok(outcome.jump_to(target))
    }
}

fn else_condition(ctx: &mut EngineContext, args: &CommandArgs) -> Result<Outcome, CtfError> {
    let label = args.str("label")?;
    let block = ctx.labels.conditional_mut(label)?;
    if block.condition_eval == Some(true) {
        log::info!("If branch of '{}' ran. Skipping the else branch.", label);
        Ok(Outcome::pass().jump_to(block.end_index))
    } else {
        log::info!("Entering the else branch of '{}'", label);
        Ok(Outcome::pass())
    }
}

fn begin_loop(ctx: &mut EngineContext, args: &CommandArgs) -> Result<Outcome, CtfError> {
    let label = args.str("label")?;
    let evaluation = evaluate(&ctx.variables, args.get("conditions"));
    let block = ctx.labels.loop_mut(label)?;
    block.condition_eval = Some(evaluation.holds);

    let outcome = evaluation.outcome();
    if evaluation.holds {
        log::info!("Continuing loop '{}'", label);
        Ok(outcome)
    } else {
        log::info!("Ending loop '{}'. Jumping to its end.", label);
        Ok(outcome.jump_to(block.end_index))
    }
}

fn end_loop(ctx: &mut EngineContext, args: &CommandArgs) -> Result<Outcome, CtfError> {
    let label = args.str("label")?;
    let block = ctx.labels.loop_mut(label)?;
    if block.condition_eval == Some(true) {
        log::debug!("Jumping back to the start of loop '{}'", label);
        Ok(Outcome::pass().jump_to(block.begin_index))
    } else {
        log::info!("Loop '{}' ended", label);
        Ok(Outcome::pass())
    }
}
