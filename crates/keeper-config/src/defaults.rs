//! Default values for the orchestrator settings.

/// Default log filter expression used by the binaries.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// OS account the engine runs as when `USER_NAME` is unset.
pub const DEFAULT_USER_NAME: &str = "postgres";

/// Numeric id used for the service account and its group when unset.
pub const DEFAULT_USER_ID: u32 = 5432;

/// Directory holding backup artefacts.
pub const DEFAULT_BACKUP_DIR: &str = "/backups";

/// Engine configuration template shipped in the image.
pub const DEFAULT_CONF_TEMPLATE: &str = "/postgresql.conf";

/// Client authentication template shipped in the image.
pub const DEFAULT_HBA_TEMPLATE: &str = "/pg_hba.conf";

/// Root of the per-version engine share directory.
pub const ENGINE_SHARE_ROOT: &str = "/usr/share/postgresql";

/// File the engine keeps in its data directory while running.
pub const LOCK_FILE_NAME: &str = "postmaster.pid";

/// File `initdb` writes once the data directory holds engine state.
pub const VERSION_FILE_NAME: &str = "PG_VERSION";

/// Default log filter expression used by the binaries.
#[must_use]
pub fn default_log_filter() -> &'static str {
    DEFAULT_LOG_FILTER
}

/// Default logging format for the binaries.
#[must_use]
pub fn default_log_format() -> crate::logging::LogFormat {
    crate::logging::LogFormat::Json
}
