//! Temporary filesystem layout and configuration shared by the suites.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use keeper_config::{LoggingConfig, ServiceConfig, ServiceSettings};
use nix::errno::Errno;
use nix::sys::signal::kill;
use nix::unistd::Pid;
use rstest::fixture;
use tempfile::TempDir;

use crate::health::HealthReporter;
use crate::process::CommandRunner;
use crate::supervisor::ServiceSupervisor;

use super::cluster::FakeCluster;
use super::reporter::RecordingHealthReporter;

/// Temporary root plus the configuration pointing into it.
pub struct TestEnvironment {
    root: TempDir,
    pub config: Arc<ServiceConfig>,
    pub cluster: Arc<FakeCluster>,
    pub reporter: Arc<RecordingHealthReporter>,
}

impl TestEnvironment {
    /// Builds a layout with an existing backup directory and no data.
    pub fn new() -> Self {
        let root = tempfile::tempdir().expect("tempdir");
        let base = root.path();
        let settings = ServiceSettings {
            user_name: "postgres".to_owned(),
            user_id: 5432,
            group_name: None,
            group_id: None,
            data_dir: base.join("var/lib/postgresql/data"),
            socket_dir: base.join("run/postgresql"),
            pg_major: "16".to_owned(),
            admin_password: "admin-secret".to_owned(),
            backup_dir: base.join("backups"),
            readiness_file: Some(base.join("run/semaphore/ready")),
            conf_template: base.join("templates/postgresql.conf"),
            hba_template: base.join("templates/pg_hba.conf"),
            conf_file: Some(base.join("share/postgresql.conf")),
            hba_file: Some(base.join("share/pg_hba.conf")),
            logging: LoggingConfig::default(),
        };
        let config = ServiceConfig::from_settings(settings).expect("valid settings");
        fs::create_dir_all(config.backup_dir()).expect("create backup dir");
        Self {
            root,
            config: Arc::new(config),
            cluster: Arc::new(FakeCluster::new()),
            reporter: Arc::new(RecordingHealthReporter::default()),
        }
    }

    /// Root of the temporary layout.
    pub fn root(&self) -> &Path {
        self.root.path()
    }

    /// Supervisor wired to the fake cluster and recording reporter.
    pub fn supervisor(&self) -> ServiceSupervisor {
        let runner: Arc<dyn CommandRunner> = self.cluster.clone();
        self.supervisor_with(runner)
    }

    /// Supervisor wired to `runner` and the recording reporter.
    pub fn supervisor_with(&self, runner: Arc<dyn CommandRunner>) -> ServiceSupervisor {
        let reporter: Arc<dyn HealthReporter> = self.reporter.clone();
        ServiceSupervisor::new(Arc::clone(&self.config), runner, reporter)
    }

    /// Simulates an engine started outside the orchestrator.
    pub fn create_lock_file(&self) {
        let lock = self.config.paths().lock_path();
        fs::create_dir_all(lock.parent().expect("lock parent")).expect("create data dir");
        fs::write(lock, "4242\n").expect("write lock file");
    }
}

#[fixture]
pub fn environment() -> TestEnvironment {
    TestEnvironment::new()
}

/// Asserts that `pid` no longer names a live or zombie process.
pub fn assert_reaped(pid: u32) {
    let raw = i32::try_from(pid).expect("pid fits in i32");
    assert_eq!(
        kill(Pid::from_raw(raw), None),
        Err(Errno::ESRCH),
        "engine {pid} should have been stopped and reaped"
    );
}
