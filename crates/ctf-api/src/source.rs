use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::CtfApiError;

/// Expands the command-line inputs into script paths. Files are taken as
/// given; directories contribute every `.json` file beneath them, sorted.
pub fn collect_script_paths<P: AsRef<Path>>(inputs: &[P]) -> Result<Vec<PathBuf>, CtfApiError> {
    let mut paths = Vec::new();
    for input in inputs {
        let input = input.as_ref();
        if input.is_file() {
            paths.push(input.to_path_buf());
        } else if input.is_dir() {
            paths.extend(scan_dir(input)?);
        } else {
            return Err(CtfApiError::SourceNotFound {
                path: input.to_path_buf(),
            });
        }
    }
    Ok(paths)
}

fn scan_dir(dir: &Path) -> Result<Vec<PathBuf>, CtfApiError> {
    let mut scripts = WalkDir::new(dir)
        .follow_links(false)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
        .collect::<Vec<_>>();

    if scripts.is_empty() {
        return Err(CtfApiError::SourceEmpty {
            path: dir.to_path_buf(),
        });
    }
    scripts.sort();
    log::debug!("Found {} scripts under {}", scripts.len(), dir.display());
    Ok(scripts)
}
