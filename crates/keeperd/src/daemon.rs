//! Foreground service runtime used as the container's main process.
//!
//! The runner provisions the service, then keeps the engine as its child so
//! it can publish readiness and relay termination signals. Its exit mirrors
//! the engine's.

use std::env;
use std::sync::Arc;

use keeper_config::ServiceConfig;
use nix::sys::signal::Signal;
use thiserror::Error;
use tracing::{info, warn};

use crate::bootstrap::{BootstrapError, BootstrapOutcome, BootstrapSequencer};
use crate::declarations::Declarations;
use crate::health::{HealthReporter, StructuredHealthReporter};
use crate::host::{Host, SystemHost};
use crate::process::{
    CommandRunner, ProcessError, PublishedState, ReadinessFile, ReadinessFileError, SignalError,
    SystemRunner, SystemSignals, TerminationSignals,
};
use crate::readiness::{self, ReadinessState};
use crate::stopper::Stopper;
use crate::supervisor::ServiceSupervisor;

const DAEMON_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::daemon");

/// Errors that end the runtime abnormally.
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Signal handlers could not be installed.
    #[error(transparent)]
    Signals(#[from] SignalError),
    /// Bootstrap failed.
    #[error(transparent)]
    Bootstrap(#[from] BootstrapError),
    /// The engine process could not be run.
    #[error(transparent)]
    Process(#[from] ProcessError),
    /// The engine exited or failed before becoming ready.
    #[error(
        "service failed to start (exit code {code:?}): {}",
        .detail.as_deref().unwrap_or("no diagnostic output")
    )]
    StartupFailed {
        /// Exit code of the engine, if it exited normally.
        code: Option<i32>,
        /// Last diagnostic line emitted by the engine.
        detail: Option<String>,
    },
    /// The readiness snapshot could not be published.
    #[error(transparent)]
    Readiness(#[from] ReadinessFileError),
}

/// How the runtime ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaemonExit {
    /// A stop request arrived before the engine was started.
    Cancelled,
    /// The engine ran and exited.
    Exited {
        /// Exit code of the engine, if it exited normally.
        code: Option<i32>,
    },
}

/// Service dependencies required by the runtime.
pub struct ServiceDeps {
    /// Executes engine and client tools.
    pub runner: Arc<dyn CommandRunner>,
    /// Host collaborators used by bootstrap.
    pub host: Arc<dyn Host>,
    /// Lifecycle observer.
    pub reporter: Arc<dyn HealthReporter>,
    /// Roles and databases to provision.
    pub declarations: Declarations,
}

/// Collaborators required to run the service.
pub struct DaemonPlan<S> {
    /// Validated configuration.
    pub config: Arc<ServiceConfig>,
    /// Service dependencies.
    pub services: ServiceDeps,
    /// Termination signal source.
    pub signals: S,
    /// Flag set by termination signals.
    pub stopper: Stopper,
}

impl DaemonPlan<SystemSignals> {
    /// Plan wired to the real system, reading declarations from the process
    /// environment.
    #[must_use]
    pub fn system(config: Arc<ServiceConfig>) -> Self {
        let runner: Arc<dyn CommandRunner> = Arc::new(SystemRunner::new());
        Self {
            config,
            services: ServiceDeps {
                host: Arc::new(SystemHost::new(Arc::clone(&runner))),
                runner,
                reporter: Arc::new(StructuredHealthReporter::new()),
                declarations: Declarations::from_os_env(env::vars_os()),
            },
            signals: SystemSignals::new(),
            stopper: Stopper::new(),
        }
    }
}

/// Drives bootstrap and the supervised engine.
pub struct DaemonRunner<S> {
    plan: DaemonPlan<S>,
}

impl<S> DaemonRunner<S>
where
    S: TerminationSignals,
{
    /// Wraps a plan.
    #[must_use]
    pub const fn new(plan: DaemonPlan<S>) -> Self {
        Self { plan }
    }

    /// Runs bootstrap with termination signals routed to the stopper, without
    /// starting the long-running engine.
    pub fn bootstrap_only(self) -> Result<BootstrapOutcome, DaemonError> {
        let DaemonPlan {
            config,
            services,
            signals,
            stopper,
        } = self.plan;
        signals.arm(&stopper)?;
        let supervisor = supervisor_for(config, &services);
        let outcome = BootstrapSequencer::new(
            &supervisor,
            services.host.as_ref(),
            &services.declarations,
        )
        .initialize(&stopper)?;
        Ok(outcome)
    }

    /// Provisions the service, then runs the engine until it exits.
    pub fn run(self) -> Result<DaemonExit, DaemonError> {
        let DaemonPlan {
            config,
            services,
            signals,
            stopper,
        } = self.plan;
        info!(target: DAEMON_TARGET, "starting service runtime");
        signals.arm(&stopper)?;
        let supervisor = supervisor_for(config, &services);
        let outcome = BootstrapSequencer::new(
            &supervisor,
            services.host.as_ref(),
            &services.declarations,
        )
        .initialize(&stopper)?;
        if let BootstrapOutcome::Cancelled { before } = outcome {
            info!(target: DAEMON_TARGET, before = %before, "bootstrap cancelled; not starting service");
            return Ok(DaemonExit::Cancelled);
        }
        if stopper.is_stopped() {
            info!(target: DAEMON_TARGET, "stop requested after bootstrap; not starting service");
            return Ok(DaemonExit::Cancelled);
        }
        serve(&supervisor, &signals, &stopper)
    }
}

fn supervisor_for(config: Arc<ServiceConfig>, services: &ServiceDeps) -> ServiceSupervisor {
    ServiceSupervisor::new(
        config,
        Arc::clone(&services.runner),
        Arc::clone(&services.reporter),
    )
}

fn serve<S>(
    supervisor: &ServiceSupervisor,
    signals: &S,
    stopper: &Stopper,
) -> Result<DaemonExit, DaemonError>
where
    S: TerminationSignals,
{
    let config = supervisor.config();
    let reporter = supervisor.reporter();
    reporter.service_starting(config.paths().data_dir());

    let mut engine = supervisor.runner().spawn(supervisor.engine_invocation())?;
    let pid = engine.pid();
    let forwarder = signals.forward_to(pid)?;
    // A stop request that landed between bootstrap and the relay starting.
    if stopper.is_stopped() {
        engine.signal(Signal::SIGTERM)?;
    }

    let observation = readiness::watch(&mut engine, supervisor.detector(), None)?;
    if observation.state != ReadinessState::Ready {
        let status = engine.wait()?;
        forwarder.stop();
        reporter.service_stopped(status.code());
        if stopper.is_stopped() {
            return Ok(DaemonExit::Exited {
                code: status.code(),
            });
        }
        return Err(DaemonError::StartupFailed {
            code: status.code(),
            detail: observation.last_line,
        });
    }

    engine.drain_output();
    let marker = ReadinessFile::new(config.readiness_file());
    marker.publish(PublishedState::Ready, pid)?;
    reporter.service_ready(pid);

    let status = engine.wait()?;
    if let Err(error) = marker.publish(PublishedState::Stopping, pid) {
        warn!(target: DAEMON_TARGET, error = %error, "failed to mark service as stopping");
    }
    marker.remove();
    forwarder.stop();
    reporter.service_stopped(status.code());
    info!(target: DAEMON_TARGET, code = ?status.code(), "service runtime finished");
    Ok(DaemonExit::Exited {
        code: status.code(),
    })
}
