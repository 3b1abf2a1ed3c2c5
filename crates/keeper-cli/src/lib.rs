//! Command-line runtime for the `keeper` service orchestrator.
//!
//! The runtime parses arguments (with environment fallbacks for every
//! service setting), validates the configuration, installs telemetry and
//! dispatches to the orchestrator library. It is exercised both from the
//! binary entrypoint and from tests where the output streams are buffers.

use std::ffi::OsString;
use std::io::Write;
use std::process::ExitCode;

use clap::Parser;
use clap::error::ErrorKind;
use keeper_config::ServiceConfig;
use keeperd::telemetry;

mod cli;
mod commands;
mod errors;
mod shell;

use cli::Cli;
use errors::AppError;

pub(crate) const CLI_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::cli");

/// Runs the CLI using the provided arguments and output streams.
///
/// Help and version requests go to `stdout` and succeed; every other failure
/// is written to `stderr` and exits with status 1.
#[must_use]
pub fn run<I, W, E>(args: I, stdout: &mut W, stderr: &mut E) -> ExitCode
where
    I: IntoIterator<Item = OsString>,
    W: Write,
    E: Write,
{
    let cli = match Cli::try_parse_from(args) {
        Ok(cli) => cli,
        Err(error) if is_informational(&error) => {
            return match write!(stdout, "{}", error.render()) {
                Ok(()) => ExitCode::SUCCESS,
                Err(_) => ExitCode::FAILURE,
            };
        }
        Err(error) => return report(stderr, &AppError::CliUsage(error)),
    };
    match dispatch(cli, stdout) {
        Ok(exit_code) => exit_code,
        Err(error) => report(stderr, &error),
    }
}

fn dispatch<W: Write>(cli: Cli, stdout: &mut W) -> Result<ExitCode, AppError> {
    let Cli { settings, command } = cli;
    let config = ServiceConfig::from_settings(settings)?;
    telemetry::initialise(config.logging())?;
    commands::execute(command, config, stdout)
}

fn is_informational(error: &clap::Error) -> bool {
    matches!(
        error.kind(),
        ErrorKind::DisplayHelp | ErrorKind::DisplayVersion
    )
}

fn report<E: Write>(stderr: &mut E, error: &AppError) -> ExitCode {
    // Nothing more can be done when stderr itself is gone.
    writeln!(stderr, "{error}").ok();
    ExitCode::FAILURE
}
