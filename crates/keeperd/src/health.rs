//! Structured health reporting for orchestrator lifecycle events.

use std::path::Path;
use std::sync::Arc;

use crate::bootstrap::{BootstrapError, BootstrapStep, ProvisionReport};

const HEALTH_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::health");

/// Observer trait used to surface lifecycle events to telemetry sinks.
pub trait HealthReporter: Send + Sync {
    /// Invoked before the bootstrap sequence begins.
    fn bootstrap_starting(&self);

    /// Invoked as each bootstrap step starts.
    fn bootstrap_step(&self, step: BootstrapStep);

    /// Invoked when a stop request ends bootstrap before `before`.
    fn bootstrap_cancelled(&self, before: BootstrapStep);

    /// Invoked after every step has run.
    fn bootstrap_completed(&self, report: &ProvisionReport);

    /// Invoked when a fatal step fails.
    fn bootstrap_failed(&self, error: &BootstrapError);

    /// Invoked before the engine is spawned for `data_dir`.
    fn service_starting(&self, data_dir: &Path);

    /// Invoked once the engine accepts connections.
    fn service_ready(&self, pid: u32);

    /// Invoked when an engine started elsewhere is used as-is.
    fn service_reused(&self, data_dir: &Path);

    /// Invoked after an engine started by the orchestrator has exited.
    fn service_stopped(&self, code: Option<i32>);
}

impl<T> HealthReporter for Arc<T>
where
    T: HealthReporter + ?Sized,
{
    fn bootstrap_starting(&self) {
        (**self).bootstrap_starting();
    }

    fn bootstrap_step(&self, step: BootstrapStep) {
        (**self).bootstrap_step(step);
    }

    fn bootstrap_cancelled(&self, before: BootstrapStep) {
        (**self).bootstrap_cancelled(before);
    }

    fn bootstrap_completed(&self, report: &ProvisionReport) {
        (**self).bootstrap_completed(report);
    }

    fn bootstrap_failed(&self, error: &BootstrapError) {
        (**self).bootstrap_failed(error);
    }

    fn service_starting(&self, data_dir: &Path) {
        (**self).service_starting(data_dir);
    }

    fn service_ready(&self, pid: u32) {
        (**self).service_ready(pid);
    }

    fn service_reused(&self, data_dir: &Path) {
        (**self).service_reused(data_dir);
    }

    fn service_stopped(&self, code: Option<i32>) {
        (**self).service_stopped(code);
    }
}

/// Default reporter that records lifecycle events using `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct StructuredHealthReporter;

impl StructuredHealthReporter {
    /// Builds a new reporter.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl HealthReporter for StructuredHealthReporter {
    fn bootstrap_starting(&self) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "bootstrap_starting",
            "starting bootstrap"
        );
    }

    fn bootstrap_step(&self, step: BootstrapStep) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "bootstrap_step",
            step = %step,
            "bootstrap step starting"
        );
    }

    fn bootstrap_cancelled(&self, before: BootstrapStep) {
        tracing::warn!(
            target: HEALTH_TARGET,
            event = "bootstrap_cancelled",
            before = %before,
            "bootstrap cancelled by stop request"
        );
    }

    fn bootstrap_completed(&self, report: &ProvisionReport) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "bootstrap_completed",
            created_users = report.created_users.len(),
            updated_users = report.updated_users.len(),
            created_databases = report.created_databases.len(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            "bootstrap completed"
        );
    }

    fn bootstrap_failed(&self, error: &BootstrapError) {
        tracing::error!(
            target: HEALTH_TARGET,
            event = "bootstrap_failed",
            error = %error,
            "bootstrap failed"
        );
    }

    fn service_starting(&self, data_dir: &Path) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "service_starting",
            data_dir = %data_dir.display(),
            "starting database service"
        );
    }

    fn service_ready(&self, pid: u32) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "service_ready",
            pid,
            "database service accepting connections"
        );
    }

    fn service_reused(&self, data_dir: &Path) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "service_reused",
            data_dir = %data_dir.display(),
            "using already running database service"
        );
    }

    fn service_stopped(&self, code: Option<i32>) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "service_stopped",
            code = ?code,
            "database service stopped"
        );
    }
}
