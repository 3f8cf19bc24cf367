//! Binary entry point for the plz controller CLI.

mod cli;

use std::io::{self, Write};
use std::process;

use clap::Parser;
use thiserror::Error;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use plz_controller::{
    CompositionError, ConfigError, ControllerConfig, IndexRange, InstanceComposition,
};

use cli::{Cli, StartupConfigCommand};

const DEFAULT_LOG_FILTER: &str = "plz_controller=info";

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Composition(#[from] CompositionError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to render startup configuration: {0}")]
    Json(#[from] serde_json::Error),
    #[error("failed to write output: {0}")]
    Io(#[from] io::Error),
}

fn main() {
    init_tracing();
    let cli = Cli::parse();
    let exit_code = match dispatch(cli) {
        Ok(()) => 0,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn dispatch(cli: Cli) -> Result<(), CliError> {
    match cli {
        Cli::StartupConfig(command) => startup_config(&command),
        Cli::CheckConfig => check_config(),
    }
}

fn startup_config(command: &StartupConfigCommand) -> Result<(), CliError> {
    let range = match (command.start, command.end) {
        (Some(start), Some(end)) => Some(IndexRange::new(start, end)?),
        _ => None,
    };
    let composition = InstanceComposition::create_for(range);
    debug!(?composition, "rendering startup configuration");

    let rendered = serde_json::to_string_pretty(&composition.get_startup_config())?;
    writeln!(io::stdout(), "{rendered}")?;
    Ok(())
}

fn check_config() -> Result<(), CliError> {
    let config = ControllerConfig::load_without_cli_args()?;
    let kind = config.validate()?;

    let mut stdout = io::stdout().lock();
    writeln!(stdout, "instance_provider = {kind}")?;
    if let Some(group) = &config.autoscaling_group {
        writeln!(stdout, "autoscaling_group = {group}")?;
    }
    writeln!(stdout, "max_acquire_trials = {}", config.max_acquire_trials)?;
    writeln!(stdout, "acquire_wait_seconds = {}", config.acquire_wait_seconds)?;
    Ok(())
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}
