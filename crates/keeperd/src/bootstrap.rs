//! Idempotent provisioning sequence run before the engine serves traffic.
//!
//! The sequence prepares the host, initialises the data directory once, and
//! then, inside a single service scope, applies the administrative password
//! and every declared role and database. A [`Stopper`] is consulted before
//! each step and before each declaration; a stop request ends the sequence
//! with [`BootstrapOutcome::Cancelled`] rather than an error.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use thiserror::Error;
use tracing::{info, warn};

use crate::admin::{AdminError, AdminOperations};
use crate::declarations::{DatabaseDeclaration, Declarations, UserDeclaration};
use crate::host::{Host, HostError};
use crate::process::{Invocation, ProcessError};
use crate::stopper::Stopper;
use crate::supervisor::{ServiceSupervisor, SupervisorError};

const BOOTSTRAP_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::bootstrap");

const SHARED_DIR_MODE: u32 = 0o777;
const BACKUP_DIR_MODE: u32 = 0o750;
const CONFIG_FILE_MODE: u32 = 0o400;

/// Stages of the bootstrap sequence, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapStep {
    /// Account, directories and configuration files.
    PrepareHost,
    /// `initdb` on first run.
    InitialiseDataDirectory,
    /// Engine start for the provisioning steps.
    StartService,
    /// Administrative role password.
    AdminPassword,
    /// Declared roles.
    Users,
    /// Declared databases.
    Databases,
}

impl BootstrapStep {
    /// Stable lowercase name used in logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PrepareHost => "prepare_host",
            Self::InitialiseDataDirectory => "initialise_data_directory",
            Self::StartService => "start_service",
            Self::AdminPassword => "admin_password",
            Self::Users => "users",
            Self::Databases => "databases",
        }
    }
}

impl fmt::Display for BootstrapStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reaction to a declaration whose object already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuplicatePolicy {
    /// Leave the existing object untouched.
    Ignore,
    /// Reconcile the existing object: reset a role's password or reassign a
    /// database's owner.
    Retry,
    /// Record the declaration as failed.
    Fail,
}

/// Duplicate handling for each declaration kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProvisionPolicy {
    /// Policy for `DB_PASSWORD_` declarations.
    pub users: DuplicatePolicy,
    /// Policy for `DB_OWNER_` declarations.
    pub databases: DuplicatePolicy,
}

impl Default for ProvisionPolicy {
    fn default() -> Self {
        Self {
            users: DuplicatePolicy::Retry,
            databases: DuplicatePolicy::Ignore,
        }
    }
}

/// Names touched by the provisioning steps.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProvisionReport {
    /// Roles created.
    pub created_users: Vec<String>,
    /// Existing roles whose password was reset.
    pub updated_users: Vec<String>,
    /// Databases created.
    pub created_databases: Vec<String>,
    /// Existing databases whose owner was reassigned.
    pub updated_databases: Vec<String>,
    /// Existing objects left alone.
    pub skipped: Vec<String>,
    /// Declarations that could not be applied.
    pub failed: Vec<String>,
}

/// How a bootstrap run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootstrapOutcome {
    /// Every step ran.
    Completed(ProvisionReport),
    /// A stop request was observed before `before` ran to completion.
    Cancelled {
        /// Step that was not performed.
        before: BootstrapStep,
    },
}

/// Errors that abort bootstrap.
#[derive(Debug, Error)]
pub enum BootstrapError {
    /// Preparing the host failed.
    #[error("failed to prepare host: {0}")]
    Host(#[from] HostError),
    /// `initdb` exited unsuccessfully.
    #[error("data directory initialisation failed with status {code:?}")]
    Initialise {
        /// Exit code, when `initdb` exited normally.
        code: Option<i32>,
    },
    /// A tool could not be run.
    #[error(transparent)]
    Process(#[from] ProcessError),
    /// The engine could not be made available.
    #[error(transparent)]
    Service(#[from] SupervisorError),
    /// The administrative password could not be applied.
    #[error("failed to set administrative password: {source}")]
    AdminPassword {
        /// Underlying administrative error.
        #[source]
        source: AdminError,
    },
}

/// Runs the provisioning sequence against one supervisor.
pub struct BootstrapSequencer<'a> {
    supervisor: &'a ServiceSupervisor,
    host: &'a dyn Host,
    declarations: &'a Declarations,
    policy: ProvisionPolicy,
}

impl<'a> BootstrapSequencer<'a> {
    /// Builds a sequencer with the default [`ProvisionPolicy`].
    #[must_use]
    pub fn new(
        supervisor: &'a ServiceSupervisor,
        host: &'a dyn Host,
        declarations: &'a Declarations,
    ) -> Self {
        Self {
            supervisor,
            host,
            declarations,
            policy: ProvisionPolicy::default(),
        }
    }

    /// Replaces the duplicate-handling policy.
    #[must_use]
    pub const fn with_policy(mut self, policy: ProvisionPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Runs every step, honouring `stopper` between steps.
    ///
    /// Safe to run repeatedly: each step is a no-op or a reconciliation when
    /// its effect is already present.
    pub fn initialize(&self, stopper: &Stopper) -> Result<BootstrapOutcome, BootstrapError> {
        let reporter = self.supervisor.reporter();
        reporter.bootstrap_starting();
        let result = self.run_steps(stopper);
        match &result {
            Ok(BootstrapOutcome::Completed(report)) => reporter.bootstrap_completed(report),
            Ok(BootstrapOutcome::Cancelled { before }) => reporter.bootstrap_cancelled(*before),
            Err(error) => reporter.bootstrap_failed(error),
        }
        result
    }

    fn run_steps(&self, stopper: &Stopper) -> Result<BootstrapOutcome, BootstrapError> {
        if let Some(cancelled) = self.checkpoint(stopper, BootstrapStep::PrepareHost) {
            return Ok(cancelled);
        }
        self.prepare_host()?;

        if let Some(cancelled) = self.checkpoint(stopper, BootstrapStep::InitialiseDataDirectory) {
            return Ok(cancelled);
        }
        self.initialise_data_directory()?;

        if let Some(cancelled) = self.checkpoint(stopper, BootstrapStep::StartService) {
            return Ok(cancelled);
        }
        self.supervisor.with_service(|| self.provision(stopper))
    }

    fn checkpoint(&self, stopper: &Stopper, step: BootstrapStep) -> Option<BootstrapOutcome> {
        if stopper.is_stopped() {
            info!(target: BOOTSTRAP_TARGET, step = %step, "stop requested; ending bootstrap");
            return Some(BootstrapOutcome::Cancelled { before: step });
        }
        self.supervisor.reporter().bootstrap_step(step);
        None
    }

    fn prepare_host(&self) -> Result<(), BootstrapError> {
        let config = self.supervisor.config();
        let account = config.account();
        let paths = config.paths();

        self.host.ensure_os_user(account)?;
        // Never loosen permissions on the filesystem root.
        if paths.data_parent() != Path::new("/") {
            self.host
                .ensure_directory(paths.data_parent(), None, Some(SHARED_DIR_MODE))?;
        }
        self.host
            .ensure_directory(paths.socket_dir(), None, Some(SHARED_DIR_MODE))?;
        if let Some(parent) = config.readiness_file().and_then(Path::parent) {
            self.host
                .ensure_directory(parent, None, Some(SHARED_DIR_MODE))?;
        }
        self.host
            .ensure_directory(config.backup_dir(), Some(account), Some(BACKUP_DIR_MODE))?;

        for (template, destination) in [
            (config.conf_template(), paths.config_file()),
            (config.hba_template(), paths.hba_file()),
        ] {
            if let Some(parent) = destination.parent() {
                self.host.ensure_directory(parent, None, None)?;
            }
            self.host
                .copy_file(template, destination, Some(account), Some(CONFIG_FILE_MODE))?;
        }

        let tokens = BTreeMap::from([
            (
                "SOCKET_DIR".to_owned(),
                paths.socket_dir().display().to_string(),
            ),
            ("HBA_FILE".to_owned(), paths.hba_file().display().to_string()),
        ]);
        self.host.substitute_tokens(paths.config_file(), &tokens)?;
        Ok(())
    }

    fn initialise_data_directory(&self) -> Result<(), BootstrapError> {
        let config = self.supervisor.config();
        let paths = config.paths();
        if paths.version_path().exists() {
            info!(
                target: BOOTSTRAP_TARGET,
                data_dir = %paths.data_dir().display(),
                "data directory already initialised"
            );
            return Ok(());
        }
        let invocation = Invocation::new([
            "initdb".to_owned(),
            "-D".to_owned(),
            paths.data_dir().display().to_string(),
        ])
        .as_account(config.account());
        let status = self.supervisor.runner().status(invocation)?;
        if status.success() {
            info!(
                target: BOOTSTRAP_TARGET,
                data_dir = %paths.data_dir().display(),
                "data directory initialised"
            );
            Ok(())
        } else {
            Err(BootstrapError::Initialise {
                code: status.code(),
            })
        }
    }

    fn provision(&self, stopper: &Stopper) -> Result<BootstrapOutcome, BootstrapError> {
        let admin = AdminOperations::new(self.supervisor);
        let config = self.supervisor.config();

        if let Some(cancelled) = self.checkpoint(stopper, BootstrapStep::AdminPassword) {
            return Ok(cancelled);
        }
        admin
            .set_password(config.admin_user(), config.admin_password())
            .map_err(|source| BootstrapError::AdminPassword { source })?;

        let mut report = ProvisionReport::default();
        if let Some(cancelled) = self.checkpoint(stopper, BootstrapStep::Users) {
            return Ok(cancelled);
        }
        for user in self.declarations.users() {
            if stopper.is_stopped() {
                return Ok(BootstrapOutcome::Cancelled {
                    before: BootstrapStep::Users,
                });
            }
            self.provision_user(admin, user, &mut report);
        }

        if let Some(cancelled) = self.checkpoint(stopper, BootstrapStep::Databases) {
            return Ok(cancelled);
        }
        for database in self.declarations.databases() {
            if stopper.is_stopped() {
                return Ok(BootstrapOutcome::Cancelled {
                    before: BootstrapStep::Databases,
                });
            }
            self.provision_database(admin, database, &mut report);
        }
        Ok(BootstrapOutcome::Completed(report))
    }

    fn provision_user(
        &self,
        admin: AdminOperations<'_>,
        user: &UserDeclaration,
        report: &mut ProvisionReport,
    ) {
        let name = user.username.clone();
        match admin.create_user(&user.username, &user.password) {
            Ok(()) => report.created_users.push(name),
            Err(duplicate @ AdminError::AlreadyExists { .. }) => match self.policy.users {
                DuplicatePolicy::Ignore => report.skipped.push(name),
                DuplicatePolicy::Retry => {
                    match admin.set_password(&user.username, &user.password) {
                        Ok(()) => report.updated_users.push(name),
                        Err(error) => record_failure(report, name, &error),
                    }
                }
                DuplicatePolicy::Fail => record_failure(report, name, &duplicate),
            },
            Err(error) => record_failure(report, name, &error),
        }
    }

    fn provision_database(
        &self,
        admin: AdminOperations<'_>,
        database: &DatabaseDeclaration,
        report: &mut ProvisionReport,
    ) {
        let name = database.database.clone();
        match admin.create_database(&database.database, &database.owner) {
            Ok(()) => report.created_databases.push(name),
            Err(duplicate @ AdminError::AlreadyExists { .. }) => match self.policy.databases {
                DuplicatePolicy::Ignore => report.skipped.push(name),
                DuplicatePolicy::Retry => {
                    match admin.alter_database_owner(&database.database, &database.owner) {
                        Ok(()) => report.updated_databases.push(name),
                        Err(error) => record_failure(report, name, &error),
                    }
                }
                DuplicatePolicy::Fail => record_failure(report, name, &duplicate),
            },
            Err(error) => record_failure(report, name, &error),
        }
    }
}

fn record_failure(report: &mut ProvisionReport, name: String, error: &AdminError) {
    warn!(
        target: BOOTSTRAP_TARGET,
        name = %name,
        error = %error,
        "declaration not applied"
    );
    report.failed.push(name);
}
