use std::fs;
use std::path::{Path, PathBuf};

use ctf_core::{CtfError, ScriptReport};
use ctf_runtime::Executor;
use serde::Serialize;

use crate::CtfApiError;

/// A script that could not be loaded and therefore never ran.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoadFailure {
    pub path: PathBuf,
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunSummary {
    pub scripts: Vec<ScriptReport>,
    pub load_errors: Vec<LoadFailure>,
}

impl RunSummary {
    pub fn passed(&self) -> bool {
        self.load_errors.is_empty()
            && !self.scripts.is_empty()
            && self.scripts.iter().all(ScriptReport::passed)
    }

    pub fn num_passed(&self) -> usize {
        self.scripts.iter().filter(|script| script.passed()).count()
    }
}

/// Loads and runs each script in order, idling `delay_between_scripts`
/// between them. Plugins are shut down once every script ran.
pub fn run_scripts(
    executor: &mut Executor,
    paths: &[PathBuf],
    delay_between_scripts: f64,
) -> RunSummary {
    let mut summary = RunSummary::default();
    for (position, path) in paths.iter().enumerate() {
        if position > 0 && delay_between_scripts > 0.0 {
            if let Err(error) = executor.idle(delay_between_scripts) {
                log::warn!("Delay between scripts was interrupted: {}", error);
            }
        }

        let script = match ctf_loader::load_script_file(path) {
            Ok(script) => script,
            Err(error) => {
                log::error!("Failed to load {}: {}", path.display(), error);
                summary.load_errors.push(load_failure(path, error));
                continue;
            }
        };
        summary.scripts.push(executor.run_script(&script));
    }
    executor.shutdown_plugins();

    log::info!(
        "{} of {} scripts passed, {} failed to load",
        summary.num_passed(),
        paths.len(),
        summary.load_errors.len()
    );
    summary
}

fn load_failure(path: &Path, error: CtfError) -> LoadFailure {
    LoadFailure {
        path: path.to_path_buf(),
        code: error.code,
        message: error.message,
    }
}

/// Writes one `<test_number>.json` report per script plus `summary.json`.
pub fn write_results(summary: &RunSummary, dir: &Path) -> Result<Vec<PathBuf>, CtfApiError> {
    fs::create_dir_all(dir).map_err(|source| CtfApiError::WriteFile {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut written = Vec::with_capacity(summary.scripts.len() + 1);
    for script in &summary.scripts {
        let path = dir.join(format!("{}.json", file_stem(&script.test_number)));
        write_json(&path, script, &script.test_number)?;
        written.push(path);
    }
    let path = dir.join("summary.json");
    write_json(&path, summary, "run summary")?;
    written.push(path);
    Ok(written)
}

pub(crate) fn write_json<T: Serialize>(
    path: &Path,
    value: &T,
    what: &str,
) -> Result<(), CtfApiError> {
    let encoded = serde_json::to_string_pretty(value).map_err(|source| CtfApiError::Serialize {
        what: what.to_string(),
        source,
    })?;
    fs::write(path, encoded).map_err(|source| CtfApiError::WriteFile {
        path: path.to_path_buf(),
        source,
    })
}

/// Replaces characters that are awkward in file names.
pub(crate) fn file_stem(name: &str) -> String {
    let stem = name
        .trim()
        .chars()
        .map(|ch| {
            if ch.is_alphanumeric() || matches!(ch, '-' | '_' | '.') {
                ch
            } else {
                '_'
            }
        })
        .collect::<String>();
    if stem.is_empty() {
        "unnamed".to_string()
    } else {
        stem
    }
}
