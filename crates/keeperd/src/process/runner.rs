//! Seam over subprocess execution.
//!
//! Every engine tool the orchestrator calls (`postgres`, `initdb`, `psql`,
//! `pg_dump`) goes through a [`CommandRunner`]. The production
//! [`SystemRunner`] drops to the service account before exec; tests inject
//! doubles that interpret the invocations instead.

use std::fs::File;
use std::os::unix::process::CommandExt;
use std::process::{Command, ExitStatus, Stdio};
use std::sync::Arc;

use keeper_config::ServiceAccount;
use nix::unistd::{getegid, geteuid};
use tracing::debug;

use super::PROCESS_TARGET;
use super::errors::ProcessError;
use super::handle::ProcessHandle;

/// A single command line plus the identity and file bindings it runs with.
#[derive(Debug)]
pub struct Invocation {
    argv: Vec<String>,
    account: Option<ServiceAccount>,
    stdin: Option<File>,
    stdout: Option<File>,
}

impl Invocation {
    /// Builds an invocation from a program followed by its arguments.
    pub fn new<I, S>(argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            argv: argv.into_iter().map(Into::into).collect(),
            account: None,
            stdin: None,
            stdout: None,
        }
    }

    /// Runs the command as `account` instead of the orchestrator's identity.
    #[must_use]
    pub fn as_account(mut self, account: &ServiceAccount) -> Self {
        self.account = Some(account.clone());
        self
    }

    /// Binds the command's standard input to `file`.
    #[must_use]
    pub fn with_stdin(mut self, file: File) -> Self {
        self.stdin = Some(file);
        self
    }

    /// Binds the command's standard output to `file`.
    #[must_use]
    pub fn with_stdout(mut self, file: File) -> Self {
        self.stdout = Some(file);
        self
    }

    /// Full command line, program first.
    #[must_use]
    pub fn argv(&self) -> &[String] {
        &self.argv
    }

    /// Program name, if any.
    #[must_use]
    pub fn program(&self) -> Option<&str> {
        self.argv.first().map(String::as_str)
    }

    /// Account the command runs as.
    #[must_use]
    pub const fn account(&self) -> Option<&ServiceAccount> {
        self.account.as_ref()
    }

    /// Takes ownership of the bound standard input, if any.
    pub fn take_stdin(&mut self) -> Option<File> {
        self.stdin.take()
    }

    /// Takes ownership of the bound standard output, if any.
    pub fn take_stdout(&mut self) -> Option<File> {
        self.stdout.take()
    }
}

/// Executes invocations on behalf of the orchestrator.
pub trait CommandRunner: Send + Sync {
    /// Runs the invocation to completion and reports its exit status.
    fn status(&self, invocation: Invocation) -> Result<ExitStatus, ProcessError>;

    /// Starts the invocation with piped output and returns its handle.
    fn spawn(&self, invocation: Invocation) -> Result<ProcessHandle, ProcessError>;
}

impl<T> CommandRunner for Arc<T>
where
    T: CommandRunner + ?Sized,
{
    fn status(&self, invocation: Invocation) -> Result<ExitStatus, ProcessError> {
        (**self).status(invocation)
    }

    fn spawn(&self, invocation: Invocation) -> Result<ProcessHandle, ProcessError> {
        (**self).spawn(invocation)
    }
}

/// Runner that executes real processes.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl SystemRunner {
    /// Builds a new system runner.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    fn command(invocation: &mut Invocation) -> Result<(Command, String), ProcessError> {
        let (program, arguments) = invocation
            .argv
            .split_first()
            .ok_or(ProcessError::EmptyCommand)?;
        let mut command = Command::new(program);
        command.args(arguments);
        if let Some(account) = invocation.account.as_ref() {
            switch_identity(&mut command, account);
        }
        if let Some(stdin) = invocation.stdin.take() {
            command.stdin(Stdio::from(stdin));
        }
        if let Some(stdout) = invocation.stdout.take() {
            command.stdout(Stdio::from(stdout));
        }
        Ok((command, program.clone()))
    }
}

impl CommandRunner for SystemRunner {
    fn status(&self, mut invocation: Invocation) -> Result<ExitStatus, ProcessError> {
        let (mut command, program) = Self::command(&mut invocation)?;
        debug!(
            target: PROCESS_TARGET,
            program = %program,
            account = ?invocation.account().map(ServiceAccount::user),
            "running command"
        );
        command.status().map_err(|source| ProcessError::Spawn {
            program,
            source: Arc::new(source),
        })
    }

    fn spawn(&self, mut invocation: Invocation) -> Result<ProcessHandle, ProcessError> {
        let (command, program) = Self::command(&mut invocation)?;
        ProcessHandle::spawn(command, program)
    }
}

/// Drops to `account` in the child when it differs from the current identity.
fn switch_identity(command: &mut Command, account: &ServiceAccount) {
    let switch_user = geteuid().as_raw() != account.uid();
    let switch_group = getegid().as_raw() != account.gid();
    if switch_group {
        command.gid(account.gid());
    }
    if switch_user {
        command.uid(account.uid());
        command.env("USER", account.user());
        // The orchestrator's working directory is often unreadable to the
        // service account.
        command.current_dir("/");
    }
}
