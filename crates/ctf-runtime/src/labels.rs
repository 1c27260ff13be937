use std::collections::BTreeMap;

use ctf_core::{CtfError, CtfValue, Instruction};

pub const IF_CONDITION: &str = "IfCondition";
pub const ELSE_CONDITION: &str = "ElseCondition";
pub const END_CONDITION: &str = "EndCondition";
pub const BEGIN_LOOP: &str = "BeginLoop";
pub const END_LOOP: &str = "EndLoop";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConditionalBlock {
    pub if_index: usize,
    pub else_index: Option<usize>,
    pub end_index: usize,
    pub condition_eval: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopBlock {
    pub begin_index: usize,
    pub end_index: usize,
    pub condition_eval: Option<bool>,
}

/// Block bindings for one test, keyed by label.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelMap {
    pub conditionals: BTreeMap<String, ConditionalBlock>,
    pub loops: BTreeMap<String, LoopBlock>,
}

impl LabelMap {
    pub fn conditional_mut(&mut self, label: &str) -> Result<&mut ConditionalBlock, CtfError> {
        self.conditionals
            .get_mut(label)
            .ok_or_else(|| unknown_label(IF_CONDITION, label))
    }

    pub fn loop_mut(&mut self, label: &str) -> Result<&mut LoopBlock, CtfError> {
        self.loops
            .get_mut(label)
            .ok_or_else(|| unknown_label(BEGIN_LOOP, label))
    }
}

#[derive(Debug)]
enum OpenBlock {
    Conditional {
        label: String,
        if_index: usize,
        else_index: Option<usize>,
    },
    Loop {
        label: String,
        begin_index: usize,
    },
}

impl OpenBlock {
    fn label(&self) -> &str {
        match self {
            Self::Conditional { label, .. } | Self::Loop { label, .. } => label,
        }
    }
}

/// Binds every conditional and loop label of a test in one scan. Blocks must
/// nest: closing anything but the innermost open block is an error.
pub fn resolve_labels(instructions: &[Instruction]) -> Result<LabelMap, CtfError> {
    let mut map = LabelMap::default();
    let mut open: Vec<OpenBlock> = Vec::new();

    for (index, instruction) in instructions.iter().enumerate() {
        let name = instruction.name.as_str();
        if !matches!(
            name,
            IF_CONDITION | ELSE_CONDITION | END_CONDITION | BEGIN_LOOP | END_LOOP
        ) {
            continue;
        }
        let label = label_of(instruction, index)?;

        match name {
            IF_CONDITION => {
                ensure_unused(&map, &open, &label, index)?;
                open.push(OpenBlock::Conditional {
                    label,
                    if_index: index,
                    else_index: None,
                });
            }
            BEGIN_LOOP => {
                ensure_unused(&map, &open, &label, index)?;
                open.push(OpenBlock::Loop {
                    label,
                    begin_index: index,
                });
            }
            ELSE_CONDITION => match open.last_mut() {
                Some(OpenBlock::Conditional {
                    label: open_label,
                    else_index,
                    ..
                }) if *open_label == label => {
                    if else_index.is_some() {
                        return Err(label_error(
                            "LABEL_DUPLICATE_ELSE",
                            format!("{} \"{}\" at {} repeats an else branch.", name, label, index),
                            &label,
                        ));
                    }
                    *else_index = Some(index);
                }
                top => return Err(mismatch(name, &label, index, top.map(|block| block.label()))),
            },
            END_CONDITION => match open.pop() {
                Some(OpenBlock::Conditional {
                    label: open_label,
                    if_index,
                    else_index,
                }) if open_label == label => {
                    map.conditionals.insert(
                        label,
                        ConditionalBlock {
                            if_index,
                            else_index,
                            end_index: index,
                            condition_eval: None,
                        },
                    );
                }
                top => return Err(mismatch(name, &label, index, top.as_ref().map(OpenBlock::label))),
            },
            END_LOOP => match open.pop() {
                Some(OpenBlock::Loop {
                    label: open_label,
                    begin_index,
                }) if open_label == label => {
                    map.loops.insert(
                        label,
                        LoopBlock {
                            begin_index,
                            end_index: index,
                            condition_eval: None,
                        },
                    );
                }
                top => return Err(mismatch(name, &label, index, top.as_ref().map(OpenBlock::label))),
            },
            _ => {}
        }
    }

    if let Some(block) = open.last() {
        return Err(label_error(
            "LABEL_UNTERMINATED",
            format!("Block \"{}\" is never closed.", block.label()),
            block.label(),
        ));
    }

    Ok(map)
}

fn label_of(instruction: &Instruction, index: usize) -> Result<String, CtfError> {
    match instruction.data.get("label") {
        Some(CtfValue::String(label)) if !label.trim().is_empty() => Ok(label.clone()),
        _ => Err(CtfError::parameter(
            "LABEL_MISSING",
            format!(
                "{} at instruction {} requires a non-empty string label.",
                instruction.name, index
            ),
            instruction.name.as_str(),
        )),
    }
}

fn ensure_unused(
    map: &LabelMap,
    open: &[OpenBlock],
    label: &str,
    index: usize,
) -> Result<(), CtfError> {
    let used = map.conditionals.contains_key(label)
        || map.loops.contains_key(label)
        || open.iter().any(|block| block.label() == label);
    if used {
        return Err(label_error(
            "LABEL_DUPLICATE",
            format!("Label \"{}\" at instruction {} is already in use.", label, index),
            label,
        ));
    }
    Ok(())
}

fn mismatch(name: &str, label: &str, index: usize, innermost: Option<&str>) -> CtfError {
    let message = match innermost {
        Some(open) => format!(
            "{} \"{}\" at instruction {} does not close the innermost block \"{}\".",
            name, label, index, open
        ),
        None => format!(
            "{} \"{}\" at instruction {} has no matching open block.",
            name, label, index
        ),
    };
    label_error("LABEL_MISMATCH", message, label)
}

fn label_error(code: &str, message: String, label: &str) -> CtfError {
    CtfError::parameter(code, message, label)
}

fn unknown_label(kind: &str, label: &str) -> CtfError {
    CtfError::parameter(
        "LABEL_UNKNOWN",
        format!("No {} block is bound to label \"{}\".", kind, label),
        label,
    )
}
