use crate::*;

/// Nested function calls deeper than this are treated as recursive.
pub const MAX_INLINE_DEPTH: usize = 32;

/// Flattens a test's steps, inlining every function call.
pub fn inline_steps(
    steps: &[ScriptStep],
    functions: &BTreeMap<String, FunctionDoc>,
) -> Result<Vec<Instruction>, CtfError> {
    let no_params = BTreeMap::new();
    let mut instructions = Vec::new();

    for step in steps {
        match step {
            ScriptStep::Instruction(doc) => {
                instructions.push(instruction_from_doc(doc, &no_params));
            }
            ScriptStep::Call(call) => {
                let inlined = expand_call(call, functions, &no_params, 0)?;
                if inlined.is_empty() {
                    log::error!("No instructions in function {}", call.function);
                    continue;
                }
                let delay = call.wait.unwrap_or(DEFAULT_FUNCTION_CALL_WAIT);
                append_inlined(&mut instructions, inlined, delay, call.disabled);
            }
        }
    }

    Ok(instructions)
}

fn expand_call(
    call: &FunctionCallDoc,
    functions: &BTreeMap<String, FunctionDoc>,
    outer_params: &BTreeMap<String, CtfValue>,
    depth: usize,
) -> Result<Vec<Instruction>, CtfError> {
    if depth >= MAX_INLINE_DEPTH {
        return Err(CtfError::new(
            "LOADER_INLINE_DEPTH",
            format!(
                "Function call \"{}\" exceeds nesting depth {}.",
                call.function, MAX_INLINE_DEPTH
            ),
        ));
    }

    let function = functions.get(&call.function).ok_or_else(|| {
        CtfError::new(
            "LOADER_FUNCTION_UNKNOWN",
            format!("Function \"{}\" is not defined or imported.", call.function),
        )
    })?;

    let params = call
        .params
        .iter()
        .map(|(name, value)| (name.clone(), substitute_params(value, outer_params)))
        .collect::<BTreeMap<_, _>>();

    let declared = function.varlist.iter().collect::<BTreeSet<_>>();
    let provided = params.keys().collect::<BTreeSet<_>>();
    if declared != provided {
        return Err(CtfError::new(
            "LOADER_PARAM_MISMATCH",
            format!(
                "Function \"{}\" declares [{}] but was called with [{}].",
                call.function,
                function.varlist.join(", "),
                params.keys().cloned().collect::<Vec<_>>().join(", ")
            ),
        ));
    }

    let mut instructions = Vec::new();
    for step in &function.instructions {
        match step {
            ScriptStep::Instruction(doc) => instructions.push(instruction_from_doc(doc, &params)),
            ScriptStep::Call(nested) => {
                let inlined = expand_call(nested, functions, &params, depth + 1)?;
                if inlined.is_empty() {
                    return Err(CtfError::new(
                        "LOADER_FUNCTION_EMPTY",
                        format!(
                            "Function \"{}\" called from \"{}\" has no instructions.",
                            nested.function, call.function
                        ),
                    ));
                }
                append_inlined(
                    &mut instructions,
                    inlined,
                    nested.wait.unwrap_or(0.0),
                    nested.disabled,
                );
            }
        }
    }

    Ok(instructions)
}

fn append_inlined(
    target: &mut Vec<Instruction>,
    mut inlined: Vec<Instruction>,
    delay: f64,
    disabled: bool,
) {
    if let Some(first) = inlined.first_mut() {
        first.wait += delay;
    }
    for instruction in &mut inlined {
        instruction.disabled |= disabled;
    }
    target.extend(inlined);
}

fn instruction_from_doc(doc: &InstructionDoc, params: &BTreeMap<String, CtfValue>) -> Instruction {
    Instruction {
        name: doc.instruction.clone(),
        data: doc
            .data
            .iter()
            .map(|(key, value)| (key.clone(), substitute_params(value, params)))
            .collect(),
        wait: doc.wait,
        verify_timeout: doc.verify_timeout,
        disabled: doc.disabled,
    }
}

/// Replaces every scalar string equal to a parameter name with the
/// argument bound to it, descending into lists and maps.
pub(crate) fn substitute_params(value: &CtfValue, params: &BTreeMap<String, CtfValue>) -> CtfValue {
    match value {
        CtfValue::String(text) => params.get(text).cloned().unwrap_or_else(|| value.clone()),
        CtfValue::List(items) => CtfValue::List(
            items
                .iter()
                .map(|item| substitute_params(item, params))
                .collect(),
        ),
        CtfValue::Dict(entries) => CtfValue::Dict(
            entries
                .iter()
                .map(|(key, item)| (key.clone(), substitute_params(item, params)))
                .collect(),
        ),
        other => other.clone(),
    }
}
