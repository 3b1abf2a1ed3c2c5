//! `keeper bash`: replace the process with an interactive shell.

use std::os::unix::process::CommandExt;
use std::process::Command;

use nix::unistd::{User, getegid, geteuid};
use tracing::info;

use crate::CLI_TARGET;
use crate::errors::AppError;

const SHELL: &str = "bash";

/// Builds the shell command for `user`, dropping privileges when the user
/// differs from the current identity.
pub(crate) fn shell_command(user: &str) -> Result<Command, AppError> {
    let account = User::from_name(user)
        .map_err(|source| AppError::LookupUser {
            user: user.to_owned(),
            source,
        })?
        .ok_or_else(|| AppError::UnknownUser {
            user: user.to_owned(),
        })?;
    let mut command = Command::new(SHELL);
    command
        .env("USER", &account.name)
        .env("HOME", &account.dir)
        .current_dir(&account.dir);
    if getegid() != account.gid {
        command.gid(account.gid.as_raw());
    }
    if geteuid() != account.uid {
        command.uid(account.uid.as_raw());
    }
    Ok(command)
}

/// Execs the shell; returns only when the exec failed.
pub(crate) fn exec_shell(user: &str) -> AppError {
    let mut command = match shell_command(user) {
        Ok(command) => command,
        Err(error) => return error,
    };
    info!(target: CLI_TARGET, user, "starting interactive shell");
    AppError::Shell {
        user: user.to_owned(),
        source: command.exec(),
    }
}
