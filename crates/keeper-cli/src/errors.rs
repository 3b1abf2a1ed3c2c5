//! Error type for the CLI runtime.

use std::io;

use keeper_config::ConfigError;
use keeperd::{AdminError, BackupError, DaemonError, SupervisorError, TelemetryError};
use thiserror::Error;

#[derive(Debug, Error)]
pub(crate) enum AppError {
    #[error("{0}")]
    CliUsage(clap::Error),
    #[error("invalid configuration: {0}")]
    Configuration(#[from] ConfigError),
    #[error("failed to initialise telemetry: {0}")]
    Telemetry(#[from] TelemetryError),
    #[error(transparent)]
    Admin(#[from] AdminError),
    #[error(transparent)]
    Backup(#[from] BackupError),
    #[error(transparent)]
    Service(#[from] SupervisorError),
    #[error(transparent)]
    Daemon(#[from] DaemonError),
    #[error("failed to look up OS user '{user}': {source}")]
    LookupUser { user: String, source: nix::Error },
    #[error("OS user '{user}' does not exist")]
    UnknownUser { user: String },
    #[error("failed to start a shell as '{user}': {source}")]
    Shell { user: String, source: io::Error },
    #[error("failed to write output: {0}")]
    Output(#[source] io::Error),
}
