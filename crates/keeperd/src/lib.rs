//! Lifecycle orchestration for a containerised PostgreSQL service.
//!
//! The crate brings the engine from an empty data directory to a provisioned,
//! serving state and performs administrative work against it without leaving
//! it half-started:
//!
//! - [`ServiceSupervisor`] starts the engine on demand, detects readiness from
//!   its diagnostic output through a [`ReadinessDetector`], and stops it again
//!   when the work is done. An engine that was already running is reused and
//!   left alone.
//! - [`BootstrapSequencer`] prepares the host, initialises the data directory
//!   once, and provisions the administrative password plus the roles and
//!   databases declared in the environment. It honours a [`Stopper`] between
//!   steps so termination signals cancel it cleanly.
//! - [`AdminOperations`] and [`BackupRestore`] wrap single administrative
//!   statements and logical dumps in a service scope.
//! - [`DaemonRunner`] is the container's main process: bootstrap, then the
//!   engine as a supervised child with signal relay and a readiness snapshot.
//!
//! Every subprocess goes through a [`CommandRunner`] and every host mutation
//! through a [`Host`], so the whole sequence can be exercised without an
//! engine installation or root privileges.

mod admin;
mod backup;
mod bootstrap;
mod client;
mod daemon;
mod declarations;
mod health;
mod host;
mod process;
mod readiness;
mod stopper;
mod supervisor;
pub mod telemetry;

pub use admin::{AdminError, AdminOperations, ObjectKind, password_hash, validate_identifier};
pub use backup::{BackupError, BackupRestore, RestoreReport, SafetyBackup, validate_name};
pub use bootstrap::{
    BootstrapError, BootstrapOutcome, BootstrapSequencer, BootstrapStep, DuplicatePolicy,
    ProvisionPolicy, ProvisionReport,
};
pub use daemon::{DaemonError, DaemonExit, DaemonPlan, DaemonRunner, ServiceDeps};
pub use declarations::{DatabaseDeclaration, Declarations, UserDeclaration};
pub use health::{HealthReporter, StructuredHealthReporter};
pub use host::{Host, HostError, SystemHost};
pub use process::{
    CommandRunner, Invocation, ProcessError, ProcessHandle, PublishedState, ReadinessFile,
    ReadinessFileError, SignalError, SignalForwarder, SystemRunner, SystemSignals,
    TerminationSignals,
};
pub use readiness::{
    Observation, PostgresReadiness, ReadinessDetector, ReadinessState, watch as watch_readiness,
};
pub use stopper::Stopper;
pub use supervisor::{REPAIR_LINE_LIMIT, RepairOutcome, ServiceSupervisor, SupervisorError};
pub use telemetry::{TelemetryError, TelemetryHandle};

#[cfg(test)]
mod tests;
