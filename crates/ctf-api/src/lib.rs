mod config;
mod engine;
mod error;
mod plugin_info;
mod run;
mod source;

pub use config::{CoreConfig, CtfConfig, LoggingConfig, TimeManagerKind};
pub use engine::EngineBuilder;
pub use error::CtfApiError;
pub use plugin_info::write_plugin_info;
pub use run::{run_scripts, write_results, LoadFailure, RunSummary};
pub use source::collect_script_paths;

pub use ctf_runtime::{JsonLinesStatus, StatusListener, StatusUpdate};
