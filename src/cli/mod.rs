//! Command-line interface definitions for the `plz-controller` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.

use clap::Parser;

/// Top-level CLI for the `plz-controller` binary.
#[derive(Debug, Parser)]
#[command(
    name = "plz-controller",
    about = "Inspect instance provisioning and execution composition for plz",
    arg_required_else_help = true
)]
pub(crate) enum Cli {
    /// Print the worker startup configuration for an execution.
    #[command(
        name = "startup-config",
        about = "Print the worker startup configuration for an execution"
    )]
    StartupConfig(StartupConfigCommand),
    /// Load and validate the controller configuration.
    #[command(
        name = "check-config",
        about = "Load and validate the controller configuration"
    )]
    CheckConfig,
}

/// Arguments for the `plz-controller startup-config` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct StartupConfigCommand {
    /// First index handled by the worker.
    ///
    /// Without `--start` and `--end` the execution is atomic and writes
    /// straight into the output and measures roots.
    #[arg(long, value_name = "INDEX", requires = "end")]
    pub(crate) start: Option<u32>,
    /// One past the last index handled by the worker.
    #[arg(long, value_name = "INDEX", requires = "start")]
    pub(crate) end: Option<u32>,
}
