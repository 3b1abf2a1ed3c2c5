use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use super::PROCESS_TARGET;
use super::files::atomic_write;

const SNAPSHOT_MODE: u32 = 0o644;

/// Errors raised while publishing the readiness snapshot.
#[derive(Debug, Error)]
pub enum ReadinessFileError {
    /// Serialising the snapshot failed.
    #[error("failed to serialise readiness snapshot: {0}")]
    Serialise(#[from] serde_json::Error),
    /// Writing the snapshot failed.
    #[error("failed to write readiness snapshot '{path}': {source}")]
    Write {
        /// Snapshot path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
}

/// Published service state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishedState {
    /// Engine accepts connections.
    Ready,
    /// Engine is shutting down.
    Stopping,
}

impl PublishedState {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Ready => "ready",
            Self::Stopping => "stopping",
        }
    }
}

#[derive(Debug, Serialize)]
struct Snapshot {
    status: &'static str,
    pid: u32,
    timestamp: u64,
}

/// Readiness marker consumed by the container supervisor.
///
/// With no configured path every operation is a no-op. The file is removed
/// when the value is dropped.
#[derive(Debug)]
pub struct ReadinessFile {
    path: Option<PathBuf>,
}

impl ReadinessFile {
    /// Builds a marker for `path`, or a disabled one for `None`.
    #[must_use]
    pub fn new(path: Option<&Path>) -> Self {
        Self {
            path: path.map(Path::to_path_buf),
        }
    }

    /// Configured snapshot path.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Atomically replaces the snapshot with `state` for `pid`.
    pub fn publish(&self, state: PublishedState, pid: u32) -> Result<(), ReadinessFileError> {
        let Some(path) = self.path.as_deref() else {
            return Ok(());
        };
        let snapshot = Snapshot {
            status: state.as_str(),
            pid,
            timestamp: unix_seconds(),
        };
        let mut contents = serde_json::to_vec(&snapshot)?;
        contents.push(b'\n');
        atomic_write(path, &contents, SNAPSHOT_MODE).map_err(|source| {
            ReadinessFileError::Write {
                path: path.to_path_buf(),
                source,
            }
        })?;
        info!(
            target: PROCESS_TARGET,
            status = snapshot.status,
            file = %path.display(),
            "readiness snapshot updated"
        );
        Ok(())
    }

    /// Deletes the snapshot if it exists.
    pub fn remove(&self) {
        let Some(path) = self.path.as_deref() else {
            return;
        };
        match fs::remove_file(path) {
            Err(error) if error.kind() != io::ErrorKind::NotFound => {
                warn!(
                    target: PROCESS_TARGET,
                    file = %path.display(),
                    error = %error,
                    "failed to remove readiness snapshot"
                );
            }
            _ => {}
        }
    }
}

impl Drop for ReadinessFile {
    fn drop(&mut self) {
        self.remove();
    }
}

fn unix_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or_default()
}
