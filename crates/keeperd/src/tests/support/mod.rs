//! Test harness utilities shared by the orchestrator suites.

mod cluster;
mod test_environment;
mod host;
mod reporter;
mod signals;

use std::process::ExitStatus;

use mockall::mock;

use crate::process::{CommandRunner, Invocation, ProcessError, ProcessHandle};

pub use cluster::{BROKEN_ENGINE, FakeCluster, LOCKED_ENGINE, READY_ENGINE};
pub use test_environment::{TestEnvironment, assert_reaped, environment};
pub use host::{HostCall, RecordingHost};
pub use reporter::{HealthEvent, RecordingHealthReporter};
pub use signals::TestSignals;

mock! {
    pub Runner {}
    impl CommandRunner for Runner {
        fn status(&self, invocation: Invocation) -> Result<ExitStatus, ProcessError>;
        fn spawn(&self, invocation: Invocation) -> Result<ProcessHandle, ProcessError>;
    }
}

/// Runner that fails the test if any command is run.
pub fn runner_unused() -> MockRunner {
    MockRunner::new()
}
