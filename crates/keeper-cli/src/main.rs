//! Entrypoint for the `keeper` service orchestrator.
//!
//! The binary delegates to [`keeper_cli::run`], which parses arguments,
//! validates configuration and runs the requested lifecycle or
//! administrative command.

use std::io;
use std::process::ExitCode;

fn main() -> ExitCode {
    // Unlocked handles: engine output is logged to stderr from drain threads
    // while `start` runs.
    let mut stdout = io::stdout();
    let mut stderr = io::stderr();
    keeper_cli::run(std::env::args_os(), &mut stdout, &mut stderr)
}
