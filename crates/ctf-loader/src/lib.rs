use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use ctf_core::{
    CtfError, CtfValue, FunctionCallDoc, FunctionDoc, Instruction, InstructionDoc, RejectedTest,
    ResolvedScript, ScriptDocument, ScriptHeader, ScriptStep, TestCase,
    DEFAULT_FUNCTION_CALL_WAIT,
};
use serde::Deserialize;

mod imports;
mod inline;

pub use inline::{inline_steps, MAX_INLINE_DEPTH};

pub fn parse_script_document(source: &str) -> Result<ScriptDocument, CtfError> {
    serde_json::from_str(source).map_err(|error| {
        CtfError::new(
            "LOADER_JSON_INVALID",
            format!("Invalid script document: {}", error),
        )
    })
}

pub fn load_script_file(path: &Path) -> Result<ResolvedScript, CtfError> {
    let source = read_source(path)?;
    let mut script = load_script_str(&source, path.parent())?;
    script.header.source_path = Some(path.to_string_lossy().to_string());
    Ok(script)
}

/// Loads a script from text. Relative imports are looked up under
/// `base_dir` when they do not exist as given.
pub fn load_script_str(source: &str, base_dir: Option<&Path>) -> Result<ResolvedScript, CtfError> {
    let document = parse_script_document(source)?;
    let functions = imports::collect_functions(&document, base_dir)?;
    Ok(resolve_script(&document, &functions))
}

/// Inlines every test of `document`. Tests that fail to resolve are
/// collected in `rejected` instead of aborting the whole script.
pub fn resolve_script(
    document: &ScriptDocument,
    functions: &BTreeMap<String, FunctionDoc>,
) -> ResolvedScript {
    let mut tests = Vec::new();
    let mut rejected = Vec::new();

    for case in &document.tests {
        match inline_steps(&case.instructions, functions) {
            Ok(instructions) => tests.push(TestCase {
                test_number: case.case_number.clone(),
                description: case.description.clone(),
                instructions,
            }),
            Err(error) => {
                log::error!(
                    "Failed to process test case {}: {}. Skipping it.",
                    case.case_number,
                    error
                );
                rejected.push(RejectedTest {
                    test_number: case.case_number.clone(),
                    reason: error.to_string(),
                });
            }
        }
    }

    ResolvedScript {
        header: script_header(document),
        tests,
        rejected,
    }
}

fn script_header(document: &ScriptDocument) -> ScriptHeader {
    ScriptHeader {
        test_number: document.test_number.clone(),
        test_name: document.test_name.clone(),
        requirements: document.requirements.keys().cloned().collect(),
        description: document.description.clone(),
        owner: document.owner.clone(),
        test_setup: document.test_setup.clone(),
        verify_timeout: document.ctf_options.verify_timeout,
        source_path: None,
    }
}

pub(crate) fn read_source(path: &Path) -> Result<String, CtfError> {
    fs::read_to_string(path).map_err(|error| {
        CtfError::new(
            "LOADER_READ_FAILED",
            format!("Cannot read \"{}\": {}", path.display(), error),
        )
    })
}
