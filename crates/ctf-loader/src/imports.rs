use crate::*;

#[derive(Debug, Deserialize)]
struct FunctionLibrary {
    #[serde(default)]
    functions: BTreeMap<String, FunctionDoc>,
}

/// Builds the function table for a script: its own definitions first, then
/// each imported library in order, later definitions replacing earlier ones.
pub(crate) fn collect_functions(
    document: &ScriptDocument,
    base_dir: Option<&Path>,
) -> Result<BTreeMap<String, FunctionDoc>, CtfError> {
    let mut functions = document.functions.clone();

    for (library, wanted) in &document.import {
        let path = locate_import(library, base_dir)?;
        let source = read_source(&path)?;
        let parsed: FunctionLibrary = serde_json::from_str(&source).map_err(|error| {
            CtfError::new(
                "LOADER_JSON_INVALID",
                format!("Invalid function library \"{}\": {}", path.display(), error),
            )
        })?;

        if wanted.is_empty() {
            functions.extend(parsed.functions);
            continue;
        }

        let mut available = parsed.functions;
        for name in wanted {
            let function = available.remove(name).ok_or_else(|| {
                CtfError::new(
                    "LOADER_IMPORT_MISSING_FUNCTION",
                    format!(
                        "Function \"{}\" is not defined in \"{}\".",
                        name,
                        path.display()
                    ),
                )
            })?;
            functions.insert(name.clone(), function);
        }
    }

    Ok(functions)
}

fn locate_import(library: &str, base_dir: Option<&Path>) -> Result<PathBuf, CtfError> {
    let direct = PathBuf::from(library);
    if direct.is_file() {
        return Ok(direct);
    }
    if let Some(base_dir) = base_dir {
        let relative = base_dir.join(library);
        if relative.is_file() {
            return Ok(relative);
        }
    }
    log::error!("Error opening file {} while importing functions", library);
    Err(CtfError::new(
        "LOADER_IMPORT_NOT_FOUND",
        format!("Imported library \"{}\" not found.", library),
    ))
}
