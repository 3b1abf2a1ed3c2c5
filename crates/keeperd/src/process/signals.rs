use std::io;
use std::thread::{self, JoinHandle};

use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGQUIT, SIGTERM};
use signal_hook::iterator::Signals;
use thiserror::Error;
use tracing::{info, warn};

use crate::stopper::Stopper;

use super::PROCESS_TARGET;

/// Signals that cancel bootstrap.
const CANCEL_SIGNALS: [i32; 3] = [SIGTERM, SIGINT, SIGQUIT];
/// Signals relayed to the running engine.
const FORWARDED_SIGNALS: [i32; 4] = [SIGTERM, SIGINT, SIGQUIT, SIGHUP];

/// Errors reported while installing signal handlers.
#[derive(Debug, Error)]
pub enum SignalError {
    /// Installing signal handlers failed.
    #[error("failed to install signal handlers: {source}")]
    Install {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
}

/// Abstraction over termination-signal delivery.
pub trait TerminationSignals: Send + Sync {
    /// Routes termination signals to `stopper` for the rest of the process.
    fn arm(&self, stopper: &Stopper) -> Result<(), SignalError>;

    /// Starts relaying termination signals to `pid`.
    fn forward_to(&self, pid: u32) -> Result<SignalForwarder, SignalError>;
}

/// Background relay of termination signals to a child process.
///
/// Stopping (or dropping) the forwarder closes the relay and joins its thread.
pub struct SignalForwarder {
    close: Option<Box<dyn FnOnce() + Send>>,
    thread: Option<JoinHandle<()>>,
}

impl SignalForwarder {
    /// Wraps a relay thread and the action that makes it return.
    pub fn new(close: Box<dyn FnOnce() + Send>, thread: JoinHandle<()>) -> Self {
        Self {
            close: Some(close),
            thread: Some(thread),
        }
    }

    /// Closes the relay and waits for its thread to finish.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Some(close) = self.close.take() {
            close();
        }
        if let Some(thread) = self.thread.take()
            && thread.join().is_err()
        {
            warn!(target: PROCESS_TARGET, "signal relay thread panicked");
        }
    }
}

impl Drop for SignalForwarder {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Signal source backed by `signal-hook`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemSignals;

impl SystemSignals {
    /// Builds the system signal source.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl TerminationSignals for SystemSignals {
    fn arm(&self, stopper: &Stopper) -> Result<(), SignalError> {
        for signal in CANCEL_SIGNALS {
            signal_hook::flag::register(signal, stopper.flag())
                .map_err(|source| SignalError::Install { source })?;
        }
        Ok(())
    }

    fn forward_to(&self, pid: u32) -> Result<SignalForwarder, SignalError> {
        let mut signals =
            Signals::new(FORWARDED_SIGNALS).map_err(|source| SignalError::Install { source })?;
        let handle = signals.handle();
        let thread = thread::spawn(move || {
            for signal in signals.forever() {
                forward_signal(pid, signal);
            }
        });
        Ok(SignalForwarder::new(Box::new(move || handle.close()), thread))
    }
}

/// Relays a raw signal number to `pid`, logging instead of failing.
pub(crate) fn forward_signal(pid: u32, signal: i32) {
    let Ok(raw_pid) = i32::try_from(pid) else {
        warn!(target: PROCESS_TARGET, pid, "pid out of range; signal dropped");
        return;
    };
    let Ok(kind) = Signal::try_from(signal) else {
        warn!(target: PROCESS_TARGET, signal, "unknown signal; not forwarded");
        return;
    };
    info!(
        target: PROCESS_TARGET,
        pid,
        signal = %kind,
        "forwarding signal to service"
    );
    if let Err(error) = kill(Pid::from_raw(raw_pid), kind) {
        warn!(
            target: PROCESS_TARGET,
            pid,
            signal = %kind,
            error = %error,
            "failed to forward signal"
        );
    }
}
