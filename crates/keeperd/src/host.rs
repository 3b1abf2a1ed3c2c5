//! Host collaborators: OS accounts, directories and configuration files.
//!
//! Bootstrap and backup reach the filesystem and the account database only
//! through [`Host`], which keeps the provisioning sequence testable without
//! root privileges.

use std::collections::BTreeMap;
use std::fs::{self, Permissions};
use std::io;
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use keeper_config::ServiceAccount;
use nix::errno::Errno;
use nix::unistd::{Gid, Group, Uid, User, chown, getegid, geteuid};
use thiserror::Error;
use tracing::{debug, info};

use crate::process::files::atomic_write;
use crate::process::{CommandRunner, Invocation, ProcessError};

const HOST_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::host");

/// Errors raised by host collaborators.
#[derive(Debug, Error)]
pub enum HostError {
    /// Looking up an account in the system database failed.
    #[error("failed to look up {kind} '{name}': {source}")]
    Lookup {
        /// `user` or `group`.
        kind: &'static str,
        /// Name looked up.
        name: String,
        /// Underlying OS error.
        #[source]
        source: Errno,
    },
    /// An account management tool exited unsuccessfully.
    #[error("'{program}' failed for '{name}' with status {code:?}")]
    AccountTool {
        /// Tool that was run.
        program: &'static str,
        /// Account being created.
        name: String,
        /// Exit code, when the tool exited normally.
        code: Option<i32>,
    },
    /// A filesystem operation failed.
    #[error("failed to {action} '{path}': {source}")]
    Io {
        /// Operation that failed.
        action: &'static str,
        /// Path involved.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Changing ownership failed.
    #[error("failed to change owner of '{path}': {source}")]
    Chown {
        /// Path involved.
        path: PathBuf,
        /// Underlying OS error.
        #[source]
        source: Errno,
    },
    /// An account management tool could not be run.
    #[error(transparent)]
    Process(#[from] ProcessError),
}

impl HostError {
    fn io<'a>(action: &'static str, path: &'a Path) -> impl FnOnce(io::Error) -> Self + 'a {
        move |source| Self::Io {
            action,
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Side effects on the host system required by bootstrap and backup.
pub trait Host: Send + Sync {
    /// Creates the account's group and user unless they already exist.
    fn ensure_os_user(&self, account: &ServiceAccount) -> Result<(), HostError>;

    /// Creates `path` with its parents, then applies `owner` and `mode`.
    fn ensure_directory(
        &self,
        path: &Path,
        owner: Option<&ServiceAccount>,
        mode: Option<u32>,
    ) -> Result<(), HostError>;

    /// Replaces `destination` with a copy of `source`, then applies `owner`
    /// and `mode`.
    fn copy_file(
        &self,
        source: &Path,
        destination: &Path,
        owner: Option<&ServiceAccount>,
        mode: Option<u32>,
    ) -> Result<(), HostError>;

    /// Replaces every `{{KEY}}` in `path` with the mapped value, keeping the
    /// file's owner and mode.
    fn substitute_tokens(
        &self,
        path: &Path,
        tokens: &BTreeMap<String, String>,
    ) -> Result<(), HostError>;

    /// Hands `path` to `account`.
    fn set_owner(&self, path: &Path, account: &ServiceAccount) -> Result<(), HostError>;
}

/// Host implementation backed by the local system.
pub struct SystemHost {
    runner: Arc<dyn CommandRunner>,
}

impl SystemHost {
    /// Builds a host that runs account tools through `runner`.
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    fn run_account_tool(
        &self,
        program: &'static str,
        name: &str,
        args: Vec<String>,
    ) -> Result<(), HostError> {
        let argv = std::iter::once(program.to_owned()).chain(args);
        let status = self.runner.status(Invocation::new(argv))?;
        if status.success() {
            info!(target: HOST_TARGET, program, name, "account created");
            Ok(())
        } else {
            Err(HostError::AccountTool {
                program,
                name: name.to_owned(),
                code: status.code(),
            })
        }
    }
}

impl Host for SystemHost {
    fn ensure_os_user(&self, account: &ServiceAccount) -> Result<(), HostError> {
        let group = Group::from_name(account.group()).map_err(|source| HostError::Lookup {
            kind: "group",
            name: account.group().to_owned(),
            source,
        })?;
        if group.is_none() {
            self.run_account_tool(
                "groupadd",
                account.group(),
                vec![
                    "--gid".to_owned(),
                    account.gid().to_string(),
                    account.group().to_owned(),
                ],
            )?;
        }
        let user = User::from_name(account.user()).map_err(|source| HostError::Lookup {
            kind: "user",
            name: account.user().to_owned(),
            source,
        })?;
        if user.is_none() {
            self.run_account_tool(
                "useradd",
                account.user(),
                vec![
                    "--uid".to_owned(),
                    account.uid().to_string(),
                    "--gid".to_owned(),
                    account.gid().to_string(),
                    "--no-create-home".to_owned(),
                    "--shell".to_owned(),
                    "/bin/bash".to_owned(),
                    account.user().to_owned(),
                ],
            )?;
        }
        Ok(())
    }

    fn ensure_directory(
        &self,
        path: &Path,
        owner: Option<&ServiceAccount>,
        mode: Option<u32>,
    ) -> Result<(), HostError> {
        fs::create_dir_all(path).map_err(HostError::io("create directory", path))?;
        if let Some(account) = owner {
            self.set_owner(path, account)?;
        }
        if let Some(bits) = mode {
            fs::set_permissions(path, Permissions::from_mode(bits))
                .map_err(HostError::io("set permissions on", path))?;
        }
        debug!(
            target: HOST_TARGET,
            path = %path.display(),
            mode = ?mode.map(|bits| format!("{bits:o}")),
            "directory ensured"
        );
        Ok(())
    }

    fn copy_file(
        &self,
        source: &Path,
        destination: &Path,
        owner: Option<&ServiceAccount>,
        mode: Option<u32>,
    ) -> Result<(), HostError> {
        let contents = fs::read(source).map_err(HostError::io("read", source))?;
        let bits = match mode {
            Some(bits) => bits,
            None => fs::metadata(source)
                .map_err(HostError::io("inspect", source))?
                .permissions()
                .mode(),
        };
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent).map_err(HostError::io("create directory", parent))?;
        }
        atomic_write(destination, &contents, bits & 0o7777)
            .map_err(HostError::io("write", destination))?;
        if let Some(account) = owner {
            self.set_owner(destination, account)?;
        }
        info!(
            target: HOST_TARGET,
            source = %source.display(),
            destination = %destination.display(),
            "file installed"
        );
        Ok(())
    }

    fn substitute_tokens(
        &self,
        path: &Path,
        tokens: &BTreeMap<String, String>,
    ) -> Result<(), HostError> {
        let metadata = fs::metadata(path).map_err(HostError::io("inspect", path))?;
        let original = fs::read_to_string(path).map_err(HostError::io("read", path))?;
        let replaced = substitute(&original, tokens);
        atomic_write(path, replaced.as_bytes(), metadata.mode() & 0o7777)
            .map_err(HostError::io("write", path))?;
        if metadata.uid() != geteuid().as_raw() || metadata.gid() != getegid().as_raw() {
            chown(
                path,
                Some(Uid::from_raw(metadata.uid())),
                Some(Gid::from_raw(metadata.gid())),
            )
            .map_err(|source| HostError::Chown {
                path: path.to_path_buf(),
                source,
            })?;
        }
        debug!(
            target: HOST_TARGET,
            path = %path.display(),
            tokens = tokens.len(),
            "tokens substituted"
        );
        Ok(())
    }

    fn set_owner(&self, path: &Path, account: &ServiceAccount) -> Result<(), HostError> {
        chown(
            path,
            Some(Uid::from_raw(account.uid())),
            Some(Gid::from_raw(account.gid())),
        )
        .map_err(|source| HostError::Chown {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Replaces each `{{KEY}}` placeholder with its mapped value.
fn substitute(text: &str, tokens: &BTreeMap<String, String>) -> String {
    tokens.iter().fold(text.to_owned(), |acc, (key, value)| {
        acc.replace(&format!("{{{{{key}}}}}"), value)
    })
}
