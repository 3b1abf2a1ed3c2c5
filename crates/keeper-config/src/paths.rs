//! Derives the engine file layout shared by every orchestrator command.
//!
//! The supervisor only ever looks at two files inside the data directory: the
//! lock file the engine keeps while running and the version marker written by
//! `initdb`. Configuration files live in the engine's per-version share
//! directory unless overridden.

use std::path::{Path, PathBuf};

use crate::defaults::{ENGINE_SHARE_ROOT, LOCK_FILE_NAME, VERSION_FILE_NAME};

/// Canonical paths for engine artefacts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnginePaths {
    data_dir: PathBuf,
    data_parent: PathBuf,
    socket_dir: PathBuf,
    config_file: PathBuf,
    hba_file: PathBuf,
    lock_path: PathBuf,
    version_path: PathBuf,
}

impl EnginePaths {
    /// Derives the layout for a data directory and engine major version.
    ///
    /// `config_file` and `hba_file` override the share-directory defaults when
    /// supplied.
    #[must_use]
    pub fn derive(
        data_dir: &Path,
        data_parent: &Path,
        socket_dir: &Path,
        major: &str,
        config_file: Option<&Path>,
        hba_file: Option<&Path>,
    ) -> Self {
        let share = Path::new(ENGINE_SHARE_ROOT).join(major);
        Self {
            data_dir: data_dir.to_path_buf(),
            data_parent: data_parent.to_path_buf(),
            socket_dir: socket_dir.to_path_buf(),
            config_file: config_file.map_or_else(|| share.join("postgresql.conf"), Path::to_path_buf),
            hba_file: hba_file.map_or_else(|| share.join("pg_hba.conf"), Path::to_path_buf),
            lock_path: data_dir.join(LOCK_FILE_NAME),
            version_path: data_dir.join(VERSION_FILE_NAME),
        }
    }

    /// Engine data directory (`PGDATA`).
    #[must_use]
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Directory containing the data directory.
    #[must_use]
    pub fn data_parent(&self) -> &Path {
        &self.data_parent
    }

    /// Directory holding the engine's Unix socket.
    #[must_use]
    pub fn socket_dir(&self) -> &Path {
        &self.socket_dir
    }

    /// Engine configuration file passed on the command line.
    #[must_use]
    pub fn config_file(&self) -> &Path {
        &self.config_file
    }

    /// Client authentication file referenced by the configuration.
    #[must_use]
    pub fn hba_file(&self) -> &Path {
        &self.hba_file
    }

    /// Lock file present while the engine runs.
    #[must_use]
    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }

    /// Marker proving the data directory has been initialised.
    #[must_use]
    pub fn version_path(&self) -> &Path {
        &self.version_path
    }
}
