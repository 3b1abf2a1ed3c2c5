//! Defines the error surface for spawning and supervising child processes.

use std::io;
use std::sync::Arc;

use nix::errno::Errno;
use thiserror::Error;

/// Errors surfaced while running or supervising a child process.
///
/// I/O errors are wrapped in `Arc` so the enum stays cheap to clone into
/// reports.
#[derive(Debug, Clone, Error)]
pub enum ProcessError {
    /// An invocation was built without a program.
    #[error("cannot run an empty command line")]
    EmptyCommand,
    /// The program could not be started.
    #[error("failed to start '{program}': {source}")]
    Spawn {
        /// Program that failed to start.
        program: String,
        /// Underlying IO error.
        #[source]
        source: Arc<io::Error>,
    },
    /// Reading the child's diagnostic stream failed.
    #[error("failed to read output of '{program}': {source}")]
    Read {
        /// Program whose output could not be read.
        program: String,
        /// Underlying IO error.
        #[source]
        source: Arc<io::Error>,
    },
    /// Waiting for the child to exit failed.
    #[error("failed to wait for '{program}' (pid {pid}): {source}")]
    Wait {
        /// Program being awaited.
        program: String,
        /// Process id of the child.
        pid: u32,
        /// Underlying IO error.
        #[source]
        source: Arc<io::Error>,
    },
    /// Delivering a signal to the child failed.
    #[error("failed to signal pid {pid}: {source}")]
    Signal {
        /// Process id that could not be signalled.
        pid: u32,
        /// Underlying OS error.
        #[source]
        source: Errno,
    },
}
