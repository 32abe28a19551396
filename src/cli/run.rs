//! CLI entry point and dispatch logic
//!
//! `run()` parses arguments, installs logging, resolves configuration,
//! creates the tokio runtime, dispatches the command, and prints every
//! error itself.

use anky_config::{CliArgs, Config};
use anky_utils::logging::init_tracing;
use anky_utils::redaction::redact_error_message;
use clap::Parser;

use super::args::Cli;
use super::commands;
use crate::ExitCode;

/// Main CLI execution function.
///
/// Returns `Err(ExitCode)` after printing the error; main.rs only maps it to
/// the process exit status.
pub fn run() -> Result<(), ExitCode> {
    let cli = Cli::parse();

    if let Err(e) = init_tracing(cli.verbose, cli.log_json) {
        eprintln!("Warning: failed to initialize logging: {e}");
    }

    let cli_args = CliArgs {
        config_path: cli.config.clone(),
        store_dir: cli.store_dir.clone(),
        concurrency: cli.concurrency,
        verbose: Some(cli.verbose),
    };

    let config = match Config::discover(&cli_args) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("✗ Configuration error: {err:#}");
            return Err(ExitCode::for_error(&err));
        }
    };

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("✗ Failed to create async runtime: {e}");
            return Err(ExitCode::INTERNAL);
        }
    };

    let operation = cli.command.name();
    match rt.block_on(commands::execute(cli.command, &config)) {
        Ok(code) if code == ExitCode::SUCCESS => Ok(()),
        Ok(code) => Err(code),
        Err(err) => {
            eprintln!(
                "✗ {operation} failed: {}",
                redact_error_message(&format!("{err:#}"))
            );
            Err(ExitCode::for_error(&err))
        }
    }
}
