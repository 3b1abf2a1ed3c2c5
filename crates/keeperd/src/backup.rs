//! Logical backups and restores of single databases.
//!
//! Artifacts are plain SQL dumps stored as `<backup dir>/<name>.sql`. An
//! artifact is never overwritten, and a restore captures a safety backup of
//! the target before dropping it unless the caller opts out.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use thiserror::Error;
use time::OffsetDateTime;
use tracing::{info, warn};

use crate::admin::{AdminError, AdminOperations, ObjectKind, validate_identifier};
use crate::client;
use crate::host::{Host, HostError};
use crate::process::ProcessError;
use crate::supervisor::{ServiceSupervisor, SupervisorError};

const BACKUP_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::backup");

const ARTIFACT_EXTENSION: &str = "sql";
const ARTIFACT_MODE: u32 = 0o600;

/// Errors raised by backup and restore.
#[derive(Debug, Error)]
pub enum BackupError {
    /// The artifact name contains characters outside `[a-z0-9_-]`.
    #[error("invalid backup name '{name}': use lowercase letters, digits, '_' and '-'")]
    InvalidName {
        /// Rejected name.
        name: String,
    },
    /// An artifact with this name already exists.
    #[error("backup '{}' already exists", .path.display())]
    ArtifactExists {
        /// Existing artifact.
        path: PathBuf,
    },
    /// No artifact with this name exists.
    #[error("backup '{}' does not exist", .path.display())]
    ArtifactMissing {
        /// Expected artifact location.
        path: PathBuf,
    },
    /// The dump tool exited unsuccessfully.
    #[error("dump of database '{database}' failed with status {code:?}")]
    BackupFailed {
        /// Database being dumped.
        database: String,
        /// Exit code, when the tool exited normally.
        code: Option<i32>,
    },
    /// The pre-restore safety backup failed; the target was not touched.
    #[error("safety backup of '{database}' failed; restore aborted: {source}")]
    SafetyBackupFailed {
        /// Database that was to be restored.
        database: String,
        /// Failure of the safety backup.
        #[source]
        source: Box<BackupError>,
    },
    /// Replaying the artifact failed after the target was recreated.
    #[error(
        "replay into '{database}' failed with status {code:?}{}",
        .safety_artifact.as_ref().map(|path| format!("; previous contents saved in '{}'", path.display())).unwrap_or_default()
    )]
    ReplayFailed {
        /// Database being restored.
        database: String,
        /// Exit code, when the replay tool exited normally.
        code: Option<i32>,
        /// Safety backup taken before the drop, if any.
        safety_artifact: Option<PathBuf>,
    },
    /// A filesystem operation on an artifact failed.
    #[error("failed to {action} '{}': {source}", .path.display())]
    Io {
        /// Operation that failed.
        action: &'static str,
        /// Artifact involved.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Handing the artifact to the service account failed.
    #[error(transparent)]
    Host(#[from] HostError),
    /// An administrative statement failed.
    #[error(transparent)]
    Admin(#[from] AdminError),
    /// The engine could not be made available.
    #[error(transparent)]
    Service(#[from] SupervisorError),
    /// A tool could not be run.
    #[error(transparent)]
    Process(#[from] ProcessError),
}

/// Whether restore captures the target before dropping it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SafetyBackup {
    /// Dump the target to a `safety-...` artifact first.
    #[default]
    Capture,
    /// Drop the target without a pre-image.
    Skip,
}

/// Result of a successful restore.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreReport {
    /// Artifact that was replayed.
    pub artifact: PathBuf,
    /// Safety backup taken before the drop, if any.
    pub safety_artifact: Option<PathBuf>,
}

/// Backup and restore of single databases.
pub struct BackupRestore<'a> {
    supervisor: &'a ServiceSupervisor,
    host: &'a dyn Host,
}

impl<'a> BackupRestore<'a> {
    /// Builds the operations on top of `supervisor`.
    #[must_use]
    pub fn new(supervisor: &'a ServiceSupervisor, host: &'a dyn Host) -> Self {
        Self { supervisor, host }
    }

    /// Location of the artifact called `name`.
    pub fn artifact_path(&self, name: &str) -> Result<PathBuf, BackupError> {
        validate_name(name)?;
        Ok(self
            .supervisor
            .config()
            .backup_dir()
            .join(format!("{name}.{ARTIFACT_EXTENSION}")))
    }

    /// Dumps `database`, connecting as `user`, into a new artifact `name`.
    pub fn backup(&self, name: &str, user: &str, database: &str) -> Result<PathBuf, BackupError> {
        let path = self.artifact_path(name)?;
        validate_identifier(ObjectKind::User, user)?;
        validate_identifier(ObjectKind::Database, database)?;
        let file = create_artifact(&path)?;
        if let Err(error) = self.dump_into(file, user, database) {
            discard_partial(&path);
            return Err(error);
        }
        if let Err(error) = self
            .host
            .set_owner(&path, self.supervisor.config().account())
        {
            discard_partial(&path);
            return Err(error.into());
        }
        info!(
            target: BACKUP_TARGET,
            database,
            artifact = %path.display(),
            "backup written"
        );
        Ok(path)
    }

    /// Replaces `database` with the contents of artifact `name`.
    ///
    /// The target is dropped and recreated owned by `user`; a replay failure
    /// after that point leaves it partially restored, with the safety backup
    /// (when captured) as the recovery path.
    pub fn restore(
        &self,
        name: &str,
        user: &str,
        database: &str,
        safety: SafetyBackup,
    ) -> Result<RestoreReport, BackupError> {
        let artifact = self.artifact_path(name)?;
        validate_identifier(ObjectKind::User, user)?;
        validate_identifier(ObjectKind::Database, database)?;
        if !artifact.is_file() {
            return Err(BackupError::ArtifactMissing { path: artifact });
        }
        let admin = AdminOperations::new(self.supervisor);
        self.supervisor.with_service(|| {
            let safety_artifact = match safety {
                SafetyBackup::Capture => Some(self.safety_backup(user, database)?),
                SafetyBackup::Skip => None,
            };
            admin.drop_database(database)?;
            admin.create_database(database, user)?;
            self.replay(&artifact, user, database, safety_artifact.as_deref())?;
            info!(
                target: BACKUP_TARGET,
                database,
                artifact = %artifact.display(),
                "restore completed"
            );
            Ok(RestoreReport {
                artifact: artifact.clone(),
                safety_artifact,
            })
        })
    }

    fn safety_backup(&self, user: &str, database: &str) -> Result<PathBuf, BackupError> {
        let name = self.safety_name(database, OffsetDateTime::now_utc());
        self.backup(&name, user, database)
            .map_err(|source| BackupError::SafetyBackupFailed {
                database: database.to_owned(),
                source: Box::new(source),
            })
    }

    /// First free `safety-<db>-<YYYYMMDD>-<HHMMSS>-<millis>` name.
    fn safety_name(&self, database: &str, now: OffsetDateTime) -> String {
        let base = format!(
            "safety-{}-{:04}{:02}{:02}-{:02}{:02}{:02}-{:03}",
            database.to_lowercase(),
            now.year(),
            u8::from(now.month()),
            now.day(),
            now.hour(),
            now.minute(),
            now.second(),
            now.millisecond(),
        );
        let backup_dir = self.supervisor.config().backup_dir();
        let taken =
            |name: &str| backup_dir.join(format!("{name}.{ARTIFACT_EXTENSION}")).exists();
        if !taken(&base) {
            return base;
        }
        (1_u32..)
            .map(|suffix| format!("{base}-{suffix}"))
            .find(|candidate| !taken(candidate))
            .unwrap_or(base)
    }

    fn dump_into(&self, file: File, user: &str, database: &str) -> Result<(), BackupError> {
        let config = self.supervisor.config();
        self.supervisor.with_service(|| {
            let invocation = client::dump(config.paths().socket_dir(), user, database)
                .as_account(config.account())
                .with_stdout(file);
            let status = self.supervisor.runner().status(invocation)?;
            if status.success() {
                Ok(())
            } else {
                Err(BackupError::BackupFailed {
                    database: database.to_owned(),
                    code: status.code(),
                })
            }
        })
    }

    fn replay(
        &self,
        artifact: &Path,
        user: &str,
        database: &str,
        safety_artifact: Option<&Path>,
    ) -> Result<(), BackupError> {
        let config = self.supervisor.config();
        let input = File::open(artifact).map_err(|source| BackupError::Io {
            action: "open",
            path: artifact.to_path_buf(),
            source,
        })?;
        let invocation = client::replay(config.paths().socket_dir(), user, database)
            .as_account(config.account())
            .with_stdin(input);
        let status = self.supervisor.runner().status(invocation)?;
        if status.success() {
            return Ok(());
        }
        warn!(
            target: BACKUP_TARGET,
            database,
            code = ?status.code(),
            safety_artifact = ?safety_artifact.map(Path::display),
            "replay failed after target was recreated"
        );
        Err(BackupError::ReplayFailed {
            database: database.to_owned(),
            code: status.code(),
            safety_artifact: safety_artifact.map(Path::to_path_buf),
        })
    }
}

/// Accepts `[a-z0-9_-]+`.
pub fn validate_name(name: &str) -> Result<(), BackupError> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(BackupError::InvalidName {
            name: name.to_owned(),
        })
    }
}

fn create_artifact(path: &Path) -> Result<File, BackupError> {
    OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(ARTIFACT_MODE)
        .open(path)
        .map_err(|source| {
            if source.kind() == io::ErrorKind::AlreadyExists {
                BackupError::ArtifactExists {
                    path: path.to_path_buf(),
                }
            } else {
                BackupError::Io {
                    action: "create",
                    path: path.to_path_buf(),
                    source,
                }
            }
        })
}

fn discard_partial(path: &Path) {
    if let Err(error) = fs::remove_file(path) {
        warn!(
            target: BACKUP_TARGET,
            artifact = %path.display(),
            error = %error,
            "failed to remove partial backup"
        );
    }
}
