//! Test double for [`Host`] that records every requested mutation.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use keeper_config::ServiceAccount;

use crate::host::{Host, HostError};
use crate::stopper::Stopper;

/// Host mutations requested by the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostCall {
    /// `ensure_os_user`.
    EnsureUser(String),
    /// `ensure_directory`.
    EnsureDirectory {
        path: PathBuf,
        owner: Option<String>,
        mode: Option<u32>,
    },
    /// `copy_file`.
    CopyFile {
        source: PathBuf,
        destination: PathBuf,
        mode: Option<u32>,
    },
    /// `substitute_tokens`.
    Substitute {
        path: PathBuf,
        tokens: BTreeMap<String, String>,
    },
    /// `set_owner`.
    SetOwner(PathBuf),
}

/// Records host calls without touching the system.
#[derive(Debug, Default)]
pub struct RecordingHost {
    calls: Mutex<Vec<HostCall>>,
    stop_after_prepare: Option<Stopper>,
}

impl RecordingHost {
    /// Host that requests a stop once the configuration has been installed,
    /// simulating a signal arriving mid-bootstrap.
    pub fn stopping_after_prepare(stopper: Stopper) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            stop_after_prepare: Some(stopper),
        }
    }

    /// Calls recorded so far.
    pub fn calls(&self) -> Vec<HostCall> {
        self.calls.lock().expect("host mutex poisoned").clone()
    }

    fn record(&self, call: HostCall) {
        self.calls.lock().expect("host mutex poisoned").push(call);
    }
}

impl Host for RecordingHost {
    fn ensure_os_user(&self, account: &ServiceAccount) -> Result<(), HostError> {
        self.record(HostCall::EnsureUser(account.user().to_owned()));
        Ok(())
    }

    fn ensure_directory(
        &self,
        path: &Path,
        owner: Option<&ServiceAccount>,
        mode: Option<u32>,
    ) -> Result<(), HostError> {
        self.record(HostCall::EnsureDirectory {
            path: path.to_path_buf(),
            owner: owner.map(|account| account.user().to_owned()),
            mode,
        });
        Ok(())
    }

    fn copy_file(
        &self,
        source: &Path,
        destination: &Path,
        _owner: Option<&ServiceAccount>,
        mode: Option<u32>,
    ) -> Result<(), HostError> {
        self.record(HostCall::CopyFile {
            source: source.to_path_buf(),
            destination: destination.to_path_buf(),
            mode,
        });
        Ok(())
    }

    fn substitute_tokens(
        &self,
        path: &Path,
        tokens: &BTreeMap<String, String>,
    ) -> Result<(), HostError> {
        self.record(HostCall::Substitute {
            path: path.to_path_buf(),
            tokens: tokens.clone(),
        });
        if let Some(stopper) = &self.stop_after_prepare {
            stopper.stop();
        }
        Ok(())
    }

    fn set_owner(&self, path: &Path, _account: &ServiceAccount) -> Result<(), HostError> {
        self.record(HostCall::SetOwner(path.to_path_buf()));
        Ok(())
    }
}
