use std::ffi::OsString;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use ctf_api::{
    collect_script_paths, run_scripts, write_plugin_info, write_results, CtfApiError, CtfConfig,
    EngineBuilder, JsonLinesStatus, RunSummary,
};
use ctf_core::TestStatus;

mod cli_args;
mod error_map;

pub(crate) use cli_args::{Cli, Mode, PluginInfoArgs, RunArgs};
pub(crate) use error_map::emit_error;

pub fn run_cli_from_args<I, T>(args: I) -> i32
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cli = match Cli::try_parse_from(args) {
        Ok(cli) => cli,
        Err(error) => {
            let _ = error.print();
            return error.exit_code();
        }
    };
    init_logging(&cli.log_level);
    match run(cli) {
        Ok(code) => code,
        Err(error) => emit_error(error),
    }
}

fn init_logging(level: &str) {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .try_init();
}

fn run(cli: Cli) -> Result<i32, CtfApiError> {
    match cli.command {
        Mode::Run(args) => run_command(args),
        Mode::PluginInfo(args) => plugin_info_command(args),
    }
}

fn load_config(path: Option<&Path>) -> Result<CtfConfig, CtfApiError> {
    match path {
        Some(path) => CtfConfig::load(path),
        None => Ok(CtfConfig::default()),
    }
}

fn run_command(args: RunArgs) -> Result<i32, CtfApiError> {
    let config = load_config(args.config.as_deref())?;
    let paths = collect_script_paths(args.scripts.as_slice())?;
    let delay = config.core.delay_between_scripts;
    let results_dir = args.results_dir.or_else(|| {
        config
            .logging
            .results_output_dir
            .clone()
            .filter(|_| config.logging.json_results)
    });

    let mut builder = EngineBuilder::new(config);
    if let Some(path) = &args.status_file {
        let file = File::create(path).map_err(|source| CtfApiError::WriteFile {
            path: path.clone(),
            source,
        })?;
        builder = builder.with_status_listener(Arc::new(JsonLinesStatus::new(BufWriter::new(file))));
    }
    let mut executor = builder.build()?;
    let summary = run_scripts(&mut executor, &paths, delay);
    if let Some(dir) = results_dir {
        write_results(&summary, &dir)?;
        println!("RESULTS_DIR:{}", dir.display());
    }
    emit_summary(&summary);
    Ok(if summary.passed() { 0 } else { 1 })
}

fn plugin_info_command(args: PluginInfoArgs) -> Result<i32, CtfApiError> {
    let config = load_config(args.config.as_deref())?;
    let mut builder = EngineBuilder::new(config);
    let registry = builder.build_registry()?;
    for path in write_plugin_info(&registry, &args.output_dir)? {
        println!("PLUGIN_INFO:{}", path.display());
    }
    println!("RESULT:OK");
    Ok(0)
}

fn status_name(status: TestStatus) -> &'static str {
    match status {
        TestStatus::Passed => "PASSED",
        TestStatus::Failed => "FAILED",
        TestStatus::Aborted => "ABORTED",
        TestStatus::Error => "ERROR",
        TestStatus::Skipped => "SKIPPED",
    }
}

fn emit_summary(summary: &RunSummary) {
    for script in &summary.scripts {
        println!(
            "SCRIPT:{}|{}|{}/{}",
            script.test_number,
            status_name(script.status),
            script.num_passed,
            script.tests.len()
        );
        for test in &script.tests {
            println!("TEST:{}|{}", test.test_number, status_name(test.status));
        }
    }
    for failure in &summary.load_errors {
        println!("LOAD_ERROR:{}|{}", failure.path.display(), failure.code);
    }
    println!(
        "RESULT:{}",
        if summary.passed() { "PASSED" } else { "FAILED" }
    );
}
