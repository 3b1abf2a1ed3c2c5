//! Execution of parsed `keeper` commands.

use std::io::Write;
use std::process::ExitCode;
use std::sync::Arc;

use keeper_config::ServiceConfig;
use keeperd::{
    AdminOperations, BackupRestore, BootstrapOutcome, CommandRunner, DaemonExit, DaemonPlan,
    DaemonRunner, HealthReporter, Host, ProvisionReport, RepairOutcome, SafetyBackup,
    ServiceSupervisor, StructuredHealthReporter, SupervisorError, SystemHost, SystemRunner,
};

use crate::cli::{ArtifactTarget, CliCommand};
use crate::errors::AppError;
use crate::shell;

/// System collaborators shared by the one-shot administrative commands.
struct Services {
    supervisor: ServiceSupervisor,
    host: SystemHost,
}

impl Services {
    fn system(config: Arc<ServiceConfig>) -> Self {
        let runner: Arc<dyn CommandRunner> = Arc::new(SystemRunner::new());
        let reporter: Arc<dyn HealthReporter> = Arc::new(StructuredHealthReporter::new());
        Self {
            host: SystemHost::new(Arc::clone(&runner)),
            supervisor: ServiceSupervisor::new(config, runner, reporter),
        }
    }

    fn admin(&self) -> AdminOperations<'_> {
        AdminOperations::new(&self.supervisor)
    }

    fn backups(&self) -> BackupRestore<'_> {
        let host: &dyn Host = &self.host;
        BackupRestore::new(&self.supervisor, host)
    }
}

/// Runs `command` against `config`, writing user-facing messages to `stdout`.
pub(crate) fn execute<W>(
    command: CliCommand,
    config: ServiceConfig,
    stdout: &mut W,
) -> Result<ExitCode, AppError>
where
    W: Write,
{
    let config = Arc::new(config);
    match command {
        CliCommand::Bash { user } => {
            let user = user.unwrap_or_else(|| config.account().user().to_owned());
            Err(shell::exec_shell(&user))
        }
        CliCommand::Start => {
            let exit = DaemonRunner::new(DaemonPlan::system(config)).run()?;
            Ok(daemon_exit_code(exit))
        }
        CliCommand::Init => {
            let outcome = DaemonRunner::new(DaemonPlan::system(config)).bootstrap_only()?;
            report_bootstrap(stdout, &outcome)?;
            Ok(ExitCode::SUCCESS)
        }
        CliCommand::Repair => {
            let result = Services::system(config).supervisor.repair();
            report_repair_result(stdout, result)?;
            Ok(ExitCode::SUCCESS)
        }
        CliCommand::CreateUser(credentials) => {
            Services::system(config)
                .admin()
                .create_user(&credentials.username, &credentials.password)?;
            say(stdout, &format!("created user '{}'", credentials.username))
        }
        CliCommand::SetPassword(credentials) => {
            Services::system(config)
                .admin()
                .set_password(&credentials.username, &credentials.password)?;
            say(
                stdout,
                &format!("updated password for user '{}'", credentials.username),
            )
        }
        CliCommand::CreateDatabase { database, owner } => {
            Services::system(config)
                .admin()
                .create_database(&database, &owner)?;
            say(stdout, &format!("created database '{database}' owned by '{owner}'"))
        }
        CliCommand::CreateSchema {
            database,
            schema,
            owner,
        } => {
            Services::system(config)
                .admin()
                .create_schema(&database, &schema, &owner)?;
            say(
                stdout,
                &format!("created schema '{schema}' in database '{database}'"),
            )
        }
        CliCommand::Backup(ArtifactTarget {
            name,
            user,
            database,
        }) => {
            let artifact = Services::system(config)
                .backups()
                .backup(&name, &user, &database)?;
            say(stdout, &format!("backup written to '{}'", artifact.display()))
        }
        CliCommand::Restore {
            target:
                ArtifactTarget {
                    name,
                    user,
                    database,
                },
            skip_safety_backup,
        } => {
            let safety = if skip_safety_backup {
                SafetyBackup::Skip
            } else {
                SafetyBackup::Capture
            };
            let report = Services::system(config)
                .backups()
                .restore(&name, &user, &database, safety)?;
            if let Some(safety_artifact) = &report.safety_artifact {
                writeln!(
                    stdout,
                    "previous contents of '{database}' saved to '{}'",
                    safety_artifact.display()
                )
                .map_err(AppError::Output)?;
            }
            say(
                stdout,
                &format!(
                    "restored '{database}' from '{}'",
                    report.artifact.display()
                ),
            )
        }
    }
}

/// Maps the engine's exit onto the process exit status.
pub(crate) fn daemon_exit_code(exit: DaemonExit) -> ExitCode {
    match exit {
        DaemonExit::Cancelled => ExitCode::SUCCESS,
        DaemonExit::Exited { code: Some(code) } => {
            u8::try_from(code).map_or(ExitCode::FAILURE, ExitCode::from)
        }
        DaemonExit::Exited { code: None } => ExitCode::FAILURE,
    }
}

fn say<W: Write>(stdout: &mut W, message: &str) -> Result<ExitCode, AppError> {
    writeln!(stdout, "{message}").map_err(AppError::Output)?;
    Ok(ExitCode::SUCCESS)
}

pub(crate) fn report_bootstrap<W: Write>(
    stdout: &mut W,
    outcome: &BootstrapOutcome,
) -> Result<(), AppError> {
    let written = match outcome {
        BootstrapOutcome::Cancelled { before } => {
            writeln!(stdout, "bootstrap cancelled before step '{before}'")
        }
        BootstrapOutcome::Completed(report) => write_report(stdout, report),
    };
    written.map_err(AppError::Output)
}

fn write_report<W: Write>(stdout: &mut W, report: &ProvisionReport) -> std::io::Result<()> {
    writeln!(stdout, "bootstrap complete")?;
    for (label, names) in [
        ("created users", &report.created_users),
        ("updated users", &report.updated_users),
        ("created databases", &report.created_databases),
        ("updated databases", &report.updated_databases),
        ("skipped", &report.skipped),
        ("failed", &report.failed),
    ] {
        if !names.is_empty() {
            writeln!(stdout, "  {label}: {}", names.join(", "))?;
        }
    }
    Ok(())
}

/// Reports a repair run; an engine that could not be started at all is a
/// notice like any other repair failure.
pub(crate) fn report_repair_result<W: Write>(
    stdout: &mut W,
    result: Result<RepairOutcome, SupervisorError>,
) -> Result<(), AppError> {
    match result {
        Ok(outcome) => report_repair(stdout, &outcome),
        Err(SupervisorError::Process(error)) => writeln!(
            stdout,
            "repair notice: service could not be started ({error}); inspect the engine logs"
        )
        .map_err(AppError::Output),
        Err(error) => Err(AppError::Service(error)),
    }
}

pub(crate) fn report_repair<W: Write>(
    stdout: &mut W,
    outcome: &RepairOutcome,
) -> Result<(), AppError> {
    let written = if outcome.succeeded() {
        writeln!(
            stdout,
            "repair complete: service reached readiness and was stopped"
        )
    } else {
        writeln!(
            stdout,
            "repair notice: service did not become ready (state {:?} after {} lines, exit code {:?}); inspect the engine logs",
            outcome.state, outcome.lines_read, outcome.exit_code
        )
    };
    written.map_err(AppError::Output)
}
