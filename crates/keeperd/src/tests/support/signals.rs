//! Signal source double for the service runtime.
//!
//! Arming can request an immediate stop, and the relay waits for the
//! readiness snapshot to appear, captures it, and then terminates the engine
//! the way an operator's SIGTERM would.

use std::fs;
use std::path::PathBuf;
use std::sync::mpsc::{self, TryRecvError};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use signal_hook::consts::signal::SIGTERM;

use crate::process::{SignalError, SignalForwarder, TerminationSignals, forward_signal};
use crate::stopper::Stopper;

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Scripted replacement for [`crate::SystemSignals`].
///
/// Clones share their observations, so a test can keep one while the
/// runtime owns another.
#[derive(Debug, Clone)]
pub struct TestSignals {
    stop_on_arm: bool,
    snapshot_path: PathBuf,
    forwarded_to: Arc<Mutex<Option<u32>>>,
    observed_snapshot: Arc<Mutex<Option<String>>>,
}

impl TestSignals {
    /// Relay that stops the engine once `snapshot_path` is published.
    pub fn stopping_when_ready(snapshot_path: PathBuf) -> Self {
        Self {
            stop_on_arm: false,
            snapshot_path,
            forwarded_to: Arc::default(),
            observed_snapshot: Arc::default(),
        }
    }

    /// Source whose arming behaves as if SIGTERM had already arrived.
    pub fn stopped_on_arm(snapshot_path: PathBuf) -> Self {
        Self {
            stop_on_arm: true,
            ..Self::stopping_when_ready(snapshot_path)
        }
    }

    /// Pid the relay was attached to.
    pub fn forwarded_to(&self) -> Option<u32> {
        *self.forwarded_to.lock().expect("signal mutex poisoned")
    }

    /// Snapshot contents seen before the engine was stopped.
    pub fn observed_snapshot(&self) -> Option<String> {
        self.observed_snapshot
            .lock()
            .expect("signal mutex poisoned")
            .clone()
    }
}

impl TerminationSignals for TestSignals {
    fn arm(&self, stopper: &Stopper) -> Result<(), SignalError> {
        if self.stop_on_arm {
            stopper.stop();
        }
        Ok(())
    }

    fn forward_to(&self, pid: u32) -> Result<SignalForwarder, SignalError> {
        *self.forwarded_to.lock().expect("signal mutex poisoned") = Some(pid);
        let (close, closed) = mpsc::channel::<()>();
        let path = self.snapshot_path.clone();
        let observed = Arc::clone(&self.observed_snapshot);
        let thread = thread::spawn(move || {
            loop {
                if !matches!(closed.try_recv(), Err(TryRecvError::Empty)) {
                    return;
                }
                if let Ok(contents) = fs::read_to_string(&path) {
                    *observed.lock().expect("signal mutex poisoned") = Some(contents);
                    forward_signal(pid, SIGTERM);
                    return;
                }
                thread::sleep(POLL_INTERVAL);
            }
        });
        Ok(SignalForwarder::new(
            Box::new(move || {
                close.send(()).ok();
            }),
            thread,
        ))
    }
}
