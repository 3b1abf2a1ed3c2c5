//! Shared configuration for the keeper orchestrator.
//!
//! Settings arrive as command-line flags with environment fallbacks, matching
//! the variables a container image exports (`PGDATA`, `SOCKET_DIR`,
//! `PG_MAJOR`, ...). [`ServiceSettings`] is the raw clap surface;
//! [`ServiceConfig`] is the validated, immutable view every component reads.

mod account;
mod defaults;
mod logging;
mod paths;

use std::path::{Path, PathBuf};

use clap::Args;
use thiserror::Error;

pub use account::ServiceAccount;
pub use defaults::{
    DEFAULT_BACKUP_DIR, DEFAULT_CONF_TEMPLATE, DEFAULT_HBA_TEMPLATE, DEFAULT_LOG_FILTER,
    DEFAULT_USER_ID, DEFAULT_USER_NAME, LOCK_FILE_NAME, VERSION_FILE_NAME, default_log_filter,
    default_log_format,
};
pub use logging::{LogFormat, LogFormatParseError, LoggingConfig};
pub use paths::EnginePaths;

/// Raw settings accepted on the command line or through the environment.
#[derive(Args, Debug, Clone)]
pub struct ServiceSettings {
    /// OS account the engine runs as.
    #[arg(long = "user-name", env = "USER_NAME", default_value = DEFAULT_USER_NAME)]
    pub user_name: String,
    /// Numeric id of the service account.
    #[arg(long = "user-id", env = "USER_ID", default_value_t = DEFAULT_USER_ID)]
    pub user_id: u32,
    /// Primary group of the service account; defaults to the account name.
    #[arg(long = "group-name", env = "GROUP_NAME")]
    pub group_name: Option<String>,
    /// Numeric id of the primary group; defaults to the user id.
    #[arg(long = "group-id", env = "GROUP_ID")]
    pub group_id: Option<u32>,
    /// Engine data directory.
    #[arg(long = "pgdata", env = "PGDATA")]
    pub data_dir: PathBuf,
    /// Directory holding the engine's Unix socket.
    #[arg(long = "socket-dir", env = "SOCKET_DIR")]
    pub socket_dir: PathBuf,
    /// Engine major version, used to locate its share directory.
    #[arg(long = "pg-major", env = "PG_MAJOR")]
    pub pg_major: String,
    /// Password assigned to the administrative role on every bootstrap.
    #[arg(long = "main-user-pwd", env = "MAIN_USER_PWD", hide_env_values = true)]
    pub admin_password: String,
    /// Directory holding backup artefacts.
    #[arg(long = "backup-dir", env = "BACKUP_DIR", default_value = DEFAULT_BACKUP_DIR)]
    pub backup_dir: PathBuf,
    /// File touched once the engine accepts connections.
    #[arg(long = "semaphore", env = "SEMAPHORE")]
    pub readiness_file: Option<PathBuf>,
    /// Template copied to the engine configuration file.
    #[arg(long = "conf-template", env = "KEEPER_CONF_TEMPLATE", default_value = DEFAULT_CONF_TEMPLATE)]
    pub conf_template: PathBuf,
    /// Template copied to the client authentication file.
    #[arg(long = "hba-template", env = "KEEPER_HBA_TEMPLATE", default_value = DEFAULT_HBA_TEMPLATE)]
    pub hba_template: PathBuf,
    /// Override for the engine configuration file location.
    #[arg(long = "conf-file", env = "KEEPER_CONF_FILE")]
    pub conf_file: Option<PathBuf>,
    /// Override for the client authentication file location.
    #[arg(long = "hba-file", env = "KEEPER_HBA_FILE")]
    pub hba_file: Option<PathBuf>,
    /// Telemetry settings.
    #[command(flatten)]
    pub logging: LoggingConfig,
}

/// Errors raised while validating [`ServiceSettings`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// A directory setting was not absolute.
    #[error("{setting} must be an absolute path, got '{path}'")]
    RelativePath {
        /// Name of the offending setting.
        setting: &'static str,
        /// Value supplied.
        path: PathBuf,
    },
    /// The data directory was the filesystem root.
    #[error("data directory '{path}' has no parent directory")]
    MissingDataParent {
        /// Value supplied.
        path: PathBuf,
    },
    /// The engine major version was empty or contained a path separator.
    #[error("invalid engine major version '{value}'")]
    InvalidMajorVersion {
        /// Value supplied.
        value: String,
    },
    /// A required setting was empty.
    #[error("{setting} must not be empty")]
    Empty {
        /// Name of the offending setting.
        setting: &'static str,
    },
}

/// Validated, immutable orchestrator configuration.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    account: ServiceAccount,
    paths: EnginePaths,
    admin_password: String,
    backup_dir: PathBuf,
    readiness_file: Option<PathBuf>,
    conf_template: PathBuf,
    hba_template: PathBuf,
    logging: LoggingConfig,
}

impl ServiceConfig {
    /// Validates raw settings and derives the engine layout.
    pub fn from_settings(settings: ServiceSettings) -> Result<Self, ConfigError> {
        let ServiceSettings {
            user_name,
            user_id,
            group_name,
            group_id,
            data_dir,
            socket_dir,
            pg_major,
            admin_password,
            backup_dir,
            readiness_file,
            conf_template,
            hba_template,
            conf_file,
            hba_file,
            logging,
        } = settings;

        if user_name.trim().is_empty() {
            return Err(ConfigError::Empty {
                setting: "USER_NAME",
            });
        }
        if admin_password.is_empty() {
            return Err(ConfigError::Empty {
                setting: "MAIN_USER_PWD",
            });
        }
        if pg_major.trim().is_empty() || pg_major.contains('/') {
            return Err(ConfigError::InvalidMajorVersion { value: pg_major });
        }
        require_absolute("PGDATA", &data_dir)?;
        require_absolute("SOCKET_DIR", &socket_dir)?;
        require_absolute("BACKUP_DIR", &backup_dir)?;
        if let Some(path) = readiness_file.as_deref() {
            require_absolute("SEMAPHORE", path)?;
        }
        let data_parent = data_dir
            .parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| ConfigError::MissingDataParent {
                path: data_dir.clone(),
            })?;

        let group = group_name.unwrap_or_else(|| user_name.clone());
        let gid = group_id.unwrap_or(user_id);
        let paths = EnginePaths::derive(
            &data_dir,
            &data_parent,
            &socket_dir,
            pg_major.trim(),
            conf_file.as_deref(),
            hba_file.as_deref(),
        );

        Ok(Self {
            account: ServiceAccount::new(user_name, user_id, group, gid),
            paths,
            admin_password,
            backup_dir,
            readiness_file,
            conf_template,
            hba_template,
            logging,
        })
    }

    /// OS account the engine runs as; also the administrative role name.
    #[must_use]
    pub const fn account(&self) -> &ServiceAccount {
        &self.account
    }

    /// Engine file layout.
    #[must_use]
    pub const fn paths(&self) -> &EnginePaths {
        &self.paths
    }

    /// Name of the administrative database role.
    #[must_use]
    pub fn admin_user(&self) -> &str {
        self.account.user()
    }

    /// Password assigned to the administrative role.
    #[must_use]
    pub fn admin_password(&self) -> &str {
        &self.admin_password
    }

    /// Directory holding backup artefacts.
    #[must_use]
    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    /// Optional readiness-signal file consumed by an external supervisor.
    #[must_use]
    pub fn readiness_file(&self) -> Option<&Path> {
        self.readiness_file.as_deref()
    }

    /// Template copied to the engine configuration file.
    #[must_use]
    pub fn conf_template(&self) -> &Path {
        &self.conf_template
    }

    /// Template copied to the client authentication file.
    #[must_use]
    pub fn hba_template(&self) -> &Path {
        &self.hba_template
    }

    /// Telemetry settings.
    #[must_use]
    pub const fn logging(&self) -> &LoggingConfig {
        &self.logging
    }
}

fn require_absolute(setting: &'static str, path: &Path) -> Result<(), ConfigError> {
    if path.is_absolute() {
        Ok(())
    } else {
        Err(ConfigError::RelativePath {
            setting,
            path: path.to_path_buf(),
        })
    }
}
