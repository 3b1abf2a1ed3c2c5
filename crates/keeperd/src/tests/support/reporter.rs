//! Test double for [`HealthReporter`] that records structured events for assertions.

use std::path::Path;
use std::sync::Mutex;

use crate::bootstrap::{BootstrapError, BootstrapStep, ProvisionReport};
use crate::health::HealthReporter;

/// Structured health events tracked during scenarios.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthEvent {
    BootstrapStarting,
    BootstrapStep(BootstrapStep),
    BootstrapCancelled(BootstrapStep),
    BootstrapCompleted,
    BootstrapFailed(String),
    ServiceStarting,
    ServiceReady(u32),
    ServiceReused,
    ServiceStopped(Option<i32>),
}

/// Records health events for assertions.
#[derive(Debug, Default)]
pub struct RecordingHealthReporter {
    events: Mutex<Vec<HealthEvent>>,
}

impl RecordingHealthReporter {
    /// Captures a copy of the recorded events.
    #[must_use]
    pub fn events(&self) -> Vec<HealthEvent> {
        self.events
            .lock()
            .expect("health reporter mutex poisoned")
            .clone()
    }

    fn record(&self, event: HealthEvent) {
        self.events
            .lock()
            .expect("health reporter mutex poisoned")
            .push(event);
    }
}

impl HealthReporter for RecordingHealthReporter {
    fn bootstrap_starting(&self) {
        self.record(HealthEvent::BootstrapStarting);
    }

    fn bootstrap_step(&self, step: BootstrapStep) {
        self.record(HealthEvent::BootstrapStep(step));
    }

    fn bootstrap_cancelled(&self, before: BootstrapStep) {
        self.record(HealthEvent::BootstrapCancelled(before));
    }

    fn bootstrap_completed(&self, _report: &ProvisionReport) {
        self.record(HealthEvent::BootstrapCompleted);
    }

    fn bootstrap_failed(&self, error: &BootstrapError) {
        self.record(HealthEvent::BootstrapFailed(error.to_string()));
    }

    fn service_starting(&self, _data_dir: &Path) {
        self.record(HealthEvent::ServiceStarting);
    }

    fn service_ready(&self, pid: u32) {
        self.record(HealthEvent::ServiceReady(pid));
    }

    fn service_reused(&self, _data_dir: &Path) {
        self.record(HealthEvent::ServiceReused);
    }

    fn service_stopped(&self, code: Option<i32>) {
        self.record(HealthEvent::ServiceStopped(code));
    }
}
