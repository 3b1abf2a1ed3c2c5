//! Owned child process with piped output streams.
//!
//! A [`ProcessHandle`] is the only way the orchestrator holds on to a running
//! child. Its diagnostic stream can be read line-by-line until the caller has
//! what it needs, after which the remaining output is drained into `tracing`
//! on background threads so the child never blocks on a full pipe. Dropping a
//! handle whose child has not been reaped sends SIGTERM and waits.

use std::io::{BufRead, BufReader, Read};
use std::process::{Child, ChildStderr, Command, ExitStatus, Stdio};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use tracing::{info, warn};

use super::errors::ProcessError;
use super::{ENGINE_TARGET, PROCESS_TARGET};

/// Running child process owned by the orchestrator.
#[derive(Debug)]
pub struct ProcessHandle {
    label: String,
    child: Child,
    pid: u32,
    started_at: Instant,
    stderr: Option<BufReader<ChildStderr>>,
    drains: Vec<JoinHandle<()>>,
    exit: Option<ExitStatus>,
}

impl ProcessHandle {
    /// Spawns `command` with stdout and stderr piped back to the orchestrator.
    ///
    /// `label` names the child in logs and errors.
    pub fn spawn(mut command: Command, label: impl Into<String>) -> Result<Self, ProcessError> {
        let label = label.into();
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        let mut child = command.spawn().map_err(|source| ProcessError::Spawn {
            program: label.clone(),
            source: Arc::new(source),
        })?;
        let pid = child.id();
        let stderr = child.stderr.take().map(BufReader::new);
        let mut drains = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            drains.push(spawn_drain(label.clone(), "stdout", BufReader::new(stdout)));
        }
        info!(
            target: PROCESS_TARGET,
            process = %label,
            pid,
            "child process started"
        );
        Ok(Self {
            label,
            child,
            pid,
            started_at: Instant::now(),
            stderr,
            drains,
            exit: None,
        })
    }

    /// Process id of the child.
    #[must_use]
    pub const fn pid(&self) -> u32 {
        self.pid
    }

    /// Name used for the child in logs.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Time elapsed since the child was spawned.
    #[must_use]
    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Reads the next line from the child's diagnostic stream.
    ///
    /// Returns `Ok(None)` once the stream is closed or has been handed to a
    /// drain thread.
    pub fn next_line(&mut self) -> Result<Option<String>, ProcessError> {
        let Some(reader) = self.stderr.as_mut() else {
            return Ok(None);
        };
        let mut buffer = Vec::new();
        let read = reader
            .read_until(b'\n', &mut buffer)
            .map_err(|source| ProcessError::Read {
                program: self.label.clone(),
                source: Arc::new(source),
            })?;
        if read == 0 {
            self.stderr = None;
            return Ok(None);
        }
        Ok(Some(decode_line(&buffer)))
    }

    /// Forwards all further diagnostic output to `tracing` in the background.
    pub fn drain_output(&mut self) {
        if let Some(reader) = self.stderr.take() {
            self.drains
                .push(spawn_drain(self.label.clone(), "stderr", reader));
        }
    }

    /// Delivers `signal` to the child unless it has already been reaped.
    pub fn signal(&self, signal: Signal) -> Result<(), ProcessError> {
        if self.exit.is_some() {
            return Ok(());
        }
        let raw = i32::try_from(self.pid).map_err(|_| ProcessError::Signal {
            pid: self.pid,
            source: Errno::EINVAL,
        })?;
        match kill(Pid::from_raw(raw), signal) {
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(source) => Err(ProcessError::Signal {
                pid: self.pid,
                source,
            }),
        }
    }

    /// Blocks until the child exits and its output has been drained.
    pub fn wait(&mut self) -> Result<ExitStatus, ProcessError> {
        if let Some(status) = self.exit {
            return Ok(status);
        }
        self.drain_output();
        let status = self.child.wait().map_err(|source| ProcessError::Wait {
            program: self.label.clone(),
            pid: self.pid,
            source: Arc::new(source),
        })?;
        self.exit = Some(status);
        for drain in self.drains.drain(..) {
            if drain.join().is_err() {
                warn!(
                    target: PROCESS_TARGET,
                    process = %self.label,
                    "output drain thread panicked"
                );
            }
        }
        info!(
            target: PROCESS_TARGET,
            process = %self.label,
            pid = self.pid,
            code = ?status.code(),
            uptime_ms = self.started_at.elapsed().as_millis(),
            "child process exited"
        );
        Ok(status)
    }

    /// Requests graceful termination with SIGTERM and waits for exit.
    pub fn stop(&mut self) -> Result<ExitStatus, ProcessError> {
        if let Some(status) = self.exit {
            return Ok(status);
        }
        info!(
            target: PROCESS_TARGET,
            process = %self.label,
            pid = self.pid,
            "waiting for child process to stop"
        );
        self.signal(Signal::SIGTERM)?;
        self.wait()
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        if self.exit.is_some() {
            return;
        }
        if let Err(error) = self.stop() {
            warn!(
                target: PROCESS_TARGET,
                process = %self.label,
                pid = self.pid,
                error = %error,
                "failed to reap child process"
            );
        }
    }
}

fn spawn_drain<R>(label: String, stream: &'static str, mut reader: BufReader<R>) -> JoinHandle<()>
where
    R: Read + Send + 'static,
{
    thread::spawn(move || {
        let mut buffer = Vec::new();
        loop {
            buffer.clear();
            match reader.read_until(b'\n', &mut buffer) {
                Ok(0) => break,
                Ok(_) => {
                    let line = decode_line(&buffer);
                    info!(target: ENGINE_TARGET, process = %label, stream, "{line}");
                }
                Err(error) => {
                    warn!(
                        target: PROCESS_TARGET,
                        process = %label,
                        stream,
                        error = %error,
                        "stopped draining child output"
                    );
                    break;
                }
            }
        }
    })
}

fn decode_line(buffer: &[u8]) -> String {
    let text = String::from_utf8_lossy(buffer);
    text.trim_end_matches(['\n', '\r']).to_owned()
}
