//! Child-process plumbing: spawning, privilege dropping, signal relay and the
//! readiness snapshot file.

mod errors;
pub(crate) mod files;
mod handle;
mod readiness_file;
mod runner;
mod signals;

pub use errors::ProcessError;
pub use handle::ProcessHandle;
pub use readiness_file::{PublishedState, ReadinessFile, ReadinessFileError};
pub use runner::{CommandRunner, Invocation, SystemRunner};
#[cfg(test)]
pub(crate) use signals::forward_signal;
pub use signals::{SignalError, SignalForwarder, SystemSignals, TerminationSignals};

pub(crate) const PROCESS_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::process");
/// Target for lines copied from the engine's own output.
pub(crate) const ENGINE_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::engine");
