//! Scoped access to a running database engine.
//!
//! [`ServiceSupervisor::with_service`] guarantees the engine is reachable for
//! the duration of a closure and afterwards restores whatever state it found:
//! an engine it started is stopped again, an engine that was already running
//! is left alone. Readiness is inferred solely from the engine's diagnostic
//! stream through a [`ReadinessDetector`].

use std::cell::Cell;
use std::path::PathBuf;
use std::sync::Arc;

use keeper_config::ServiceConfig;
use thiserror::Error;
use tracing::{info, warn};

use crate::client::{self, MAINTENANCE_DATABASE};
use crate::health::HealthReporter;
use crate::process::{CommandRunner, Invocation, ProcessError, ProcessHandle};
use crate::readiness::{self, PostgresReadiness, ReadinessDetector, ReadinessState};

const SUPERVISOR_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::supervisor");

/// Upper bound on diagnostic lines examined by [`ServiceSupervisor::repair`].
pub const REPAIR_LINE_LIMIT: usize = 10;

/// Errors raised while bringing the engine up or down.
#[derive(Debug, Clone, Error)]
pub enum SupervisorError {
    /// A lock file exists but the engine does not answer.
    #[error(
        "lock file '{lock_path}' exists but the service is not reachable; run 'repair' to clear it"
    )]
    ServiceUnreachable {
        /// Lock file that was found.
        lock_path: PathBuf,
    },
    /// The engine refused to start because of a lock held elsewhere.
    #[error("service refused to start: lock file '{lock_path}' is held by an unreachable instance")]
    LockConflict {
        /// Lock file named by the engine.
        lock_path: PathBuf,
    },
    /// The engine exited or reported a fatal error before becoming ready.
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
    /// A child process could not be run.
    #[error(transparent)]
    Process(#[from] ProcessError),
}

/// Outcome of [`ServiceSupervisor::repair`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepairOutcome {
    /// `Ready`, `LockConflict` or `Failed`.
    pub state: ReadinessState,
    /// Diagnostic lines examined.
    pub lines_read: usize,
    /// Exit code of the engine after it was stopped.
    pub exit_code: Option<i32>,
}

impl RepairOutcome {
    /// Whether the engine reached readiness before being stopped.
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.state == ReadinessState::Ready
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScopeKind {
    /// The scope started the engine and stops it on close.
    Owned,
    /// The engine was already running and is left running.
    Borrowed,
    /// An enclosing scope of the same supervisor is active.
    Nested,
}

/// Supervises the engine for one command invocation.
///
/// A supervisor is single-threaded: it tracks scope nesting so administrative
/// operations can compose without starting the engine twice.
pub struct ServiceSupervisor {
    config: Arc<ServiceConfig>,
    runner: Arc<dyn CommandRunner>,
    detector: Arc<dyn ReadinessDetector>,
    reporter: Arc<dyn HealthReporter>,
    depth: Cell<usize>,
}

impl ServiceSupervisor {
    /// Builds a supervisor using the PostgreSQL readiness markers.
    pub fn new(
        config: Arc<ServiceConfig>,
        runner: Arc<dyn CommandRunner>,
        reporter: Arc<dyn HealthReporter>,
    ) -> Self {
        Self {
            config,
            runner,
            detector: Arc::new(PostgresReadiness),
            reporter,
            depth: Cell::new(0),
        }
    }

    /// Replaces the readiness detector.
    #[must_use]
    pub fn with_detector(mut self, detector: Arc<dyn ReadinessDetector>) -> Self {
        self.detector = detector;
        self
    }

    /// Configuration the supervisor was built with.
    #[must_use]
    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Runner used for every subprocess.
    #[must_use]
    pub fn runner(&self) -> &dyn CommandRunner {
        self.runner.as_ref()
    }

    pub(crate) fn detector(&self) -> &dyn ReadinessDetector {
        self.detector.as_ref()
    }

    pub(crate) fn reporter(&self) -> &dyn HealthReporter {
        self.reporter.as_ref()
    }

    /// Runs `body` with the engine reachable, then restores the prior state.
    ///
    /// An error from `body` takes precedence over a teardown error; a teardown
    /// error is reported only when `body` succeeded. The engine is stopped on
    /// every exit path of an owned scope, including panics.
    pub fn with_service<T, E, F>(&self, body: F) -> Result<T, E>
    where
        F: FnOnce() -> Result<T, E>,
        E: From<SupervisorError>,
    {
        let scope = self.open().map_err(E::from)?;
        let result = body();
        let teardown = scope.close();
        match (result, teardown) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(error)) => Err(E::from(error)),
            (Err(error), Ok(())) => Err(error),
            (Err(error), Err(teardown)) => {
                warn!(
                    target: SUPERVISOR_TARGET,
                    error = %teardown,
                    "service teardown failed after operation error"
                );
                Err(error)
            }
        }
    }

    /// Checks whether the engine answers a trivial query.
    pub fn probe(&self) -> Result<bool, SupervisorError> {
        let invocation = client::statement(
            self.config.paths().socket_dir(),
            MAINTENANCE_DATABASE,
            "SELECT 1",
        )
        .as_account(self.config.account());
        let status = self.runner.status(invocation)?;
        Ok(status.success())
    }

    /// Starts the engine regardless of the lock file, observes at most
    /// [`REPAIR_LINE_LIMIT`] lines of output and stops it again.
    ///
    /// Starting the engine is what clears a stale lock; the engine is never
    /// left running, even when it became ready. An engine that fails on its
    /// own is waited for rather than signalled, so its exit code is kept.
    pub fn repair(&self) -> Result<RepairOutcome, SupervisorError> {
        info!(
            target: SUPERVISOR_TARGET,
            lock = %self.config.paths().lock_path().display(),
            "starting service to clear stale lock"
        );
        let mut engine = self.runner.spawn(self.engine_invocation())?;
        let observation = readiness::watch(&mut engine, self.detector(), Some(REPAIR_LINE_LIMIT))?;
        // An engine that reported a failure or closed its stream exits on its
        // own; only a ready or still-starting engine is signalled.
        let status = match observation.state {
            ReadinessState::Ready | ReadinessState::Starting if !observation.stream_closed => {
                engine.stop()?
            }
            _ => engine.wait()?,
        };
        let state = match observation.state {
            ReadinessState::Ready => ReadinessState::Ready,
            ReadinessState::LockConflict => ReadinessState::LockConflict,
            _ => ReadinessState::Failed,
        };
        info!(
            target: SUPERVISOR_TARGET,
            state = ?state,
            lines = observation.lines_read,
            code = ?status.code(),
            "repair run finished"
        );
        Ok(RepairOutcome {
            state,
            lines_read: observation.lines_read,
            exit_code: status.code(),
        })
    }

    /// Command line that runs the engine in the foreground against the
    /// configured data directory.
    pub(crate) fn engine_invocation(&self) -> Invocation {
        let paths = self.config.paths();
        Invocation::new([
            "postgres".to_owned(),
            "-D".to_owned(),
            paths.data_dir().display().to_string(),
            "-c".to_owned(),
            format!("config_file={}", paths.config_file().display()),
        ])
        .as_account(self.config.account())
    }

    fn open(&self) -> Result<ServiceScope<'_>, SupervisorError> {
        if self.depth.get() > 0 {
            return Ok(self.scope(ScopeKind::Nested, None));
        }
        let paths = self.config.paths();
        if paths.lock_path().exists() {
            if self.probe()? {
                self.reporter.service_reused(paths.data_dir());
                return Ok(self.scope(ScopeKind::Borrowed, None));
            }
            return Err(SupervisorError::ServiceUnreachable {
                lock_path: paths.lock_path().to_path_buf(),
            });
        }
        self.start_engine()
    }

    fn start_engine(&self) -> Result<ServiceScope<'_>, SupervisorError> {
        let paths = self.config.paths();
        self.reporter.service_starting(paths.data_dir());
        let mut engine = self.runner.spawn(self.engine_invocation())?;
        let observation = readiness::watch(&mut engine, self.detector(), None)?;
        match observation.state {
            ReadinessState::Ready => {
                engine.drain_output();
                self.reporter.service_ready(engine.pid());
                Ok(self.scope(ScopeKind::Owned, Some(engine)))
            }
            ReadinessState::LockConflict => {
                engine.wait()?;
                if self.probe()? {
                    self.reporter.service_reused(paths.data_dir());
                    Ok(self.scope(ScopeKind::Borrowed, None))
                } else {
                    Err(SupervisorError::LockConflict {
                        lock_path: paths.lock_path().to_path_buf(),
                    })
                }
            }
            _ => {
                let status = engine.wait()?;
                Err(SupervisorError::StartupFailed {
                    code: status.code(),
                    detail: observation.last_line,
                })
            }
        }
    }

    fn scope(&self, kind: ScopeKind, engine: Option<ProcessHandle>) -> ServiceScope<'_> {
        self.depth.set(self.depth.get() + 1);
        ServiceScope {
            supervisor: self,
            kind,
            engine,
        }
    }
}

/// RAII guard for one `with_service` scope.
struct ServiceScope<'a> {
    supervisor: &'a ServiceSupervisor,
    kind: ScopeKind,
    engine: Option<ProcessHandle>,
}

impl ServiceScope<'_> {
    fn close(mut self) -> Result<(), SupervisorError> {
        let Some(mut engine) = self.engine.take() else {
            return Ok(());
        };
        debug_assert_eq!(self.kind, ScopeKind::Owned);
        let status = engine.stop()?;
        self.supervisor.reporter.service_stopped(status.code());
        Ok(())
    }
}

impl Drop for ServiceScope<'_> {
    fn drop(&mut self) {
        let depth = self.supervisor.depth.get();
        self.supervisor.depth.set(depth.saturating_sub(1));
        // Reached with an engine only when the body panicked.
        if let Some(mut engine) = self.engine.take() {
            match engine.stop() {
                Ok(status) => self.supervisor.reporter.service_stopped(status.code()),
                Err(error) => warn!(
                    target: SUPERVISOR_TARGET,
                    error = %error,
                    "failed to stop service during unwind"
                ),
            }
        }
    }
}
