use std::fs;
use std::path::{Path, PathBuf};

use ctf_runtime::PluginRegistry;

use crate::run::{file_stem, write_json};
use crate::CtfApiError;

/// Writes `<group_name>.json` for every registered plugin into `dir`.
pub fn write_plugin_info(registry: &PluginRegistry, dir: &Path) -> Result<Vec<PathBuf>, CtfApiError> {
    fs::create_dir_all(dir).map_err(|source| CtfApiError::WriteFile {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut written = Vec::new();
    for info in registry.plugin_info() {
        let path = dir.join(format!("{}.json", file_stem(&info.group_name)));
        write_json(&path, &info, &info.group_name)?;
        log::info!("Wrote plugin info {}", path.display());
        written.push(path);
    }
    Ok(written)
}
