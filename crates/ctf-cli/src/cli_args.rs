use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "ctf-cli")]
#[command(about = "Runs CTF test scripts against the plugin engine")]
pub(crate) struct Cli {
    /// Log filter used when RUST_LOG is not set.
    #[arg(long = "log-level", global = true, default_value = "info")]
    pub(crate) log_level: String,
    #[command(subcommand)]
    pub(crate) command: Mode,
}

#[derive(Debug, Subcommand)]
pub(crate) enum Mode {
    /// Run script files or every .json script under the given directories.
    Run(RunArgs),
    /// Write one JSON description per registered plugin.
    PluginInfo(PluginInfoArgs),
}

#[derive(Debug, Args)]
pub(crate) struct RunArgs {
    #[arg(required = true)]
    pub(crate) scripts: Vec<PathBuf>,
    #[arg(long = "config")]
    pub(crate) config: Option<PathBuf>,
    /// Overrides `logging.results_output_dir` from the config.
    #[arg(long = "results-dir")]
    pub(crate) results_dir: Option<PathBuf>,
    /// Writes live status updates here, one JSON object per line.
    #[arg(long = "status-file")]
    pub(crate) status_file: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub(crate) struct PluginInfoArgs {
    pub(crate) output_dir: PathBuf,
    #[arg(long = "config")]
    pub(crate) config: Option<PathBuf>,
}
