//! Classification of engine diagnostic output.
//!
//! The engine reports readiness only through its log stream, so every marker
//! string the orchestrator depends on lives behind [`ReadinessDetector`].

use tracing::debug;

use crate::process::{ProcessError, ProcessHandle};

const READINESS_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::readiness");

const READY_MARKER: &str = "ready to accept connections";
const LOCK_MARKER: &str = "lock file \"postmaster.pid\" already exists";
const FATAL_MARKERS: [&str; 2] = ["FATAL:", "PANIC:"];

/// Engine state inferred from its output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadinessState {
    /// No engine process is running.
    NotRunning,
    /// The engine is running but has not reported readiness yet.
    Starting,
    /// The engine accepts connections.
    Ready,
    /// Another engine already holds the data directory lock.
    LockConflict,
    /// The engine reported a fatal condition or exited early.
    Failed,
}

impl ReadinessState {
    /// Whether no further output can change the outcome.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Ready | Self::LockConflict | Self::Failed)
    }
}

/// Maps single diagnostic lines to readiness states.
pub trait ReadinessDetector: Send + Sync {
    /// Classifies one line; lines carrying no marker yield `Starting`.
    fn classify(&self, line: &str) -> ReadinessState;
}

/// Marker set emitted by PostgreSQL.
#[derive(Debug, Default, Clone, Copy)]
pub struct PostgresReadiness;

impl ReadinessDetector for PostgresReadiness {
    fn classify(&self, line: &str) -> ReadinessState {
        if line.contains(LOCK_MARKER) {
            ReadinessState::LockConflict
        } else if line.contains(READY_MARKER) {
            ReadinessState::Ready
        } else if FATAL_MARKERS.iter().any(|marker| line.contains(marker)) {
            ReadinessState::Failed
        } else {
            ReadinessState::Starting
        }
    }
}

/// Result of reading an engine's diagnostic stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    /// Last classified state.
    pub state: ReadinessState,
    /// Number of lines consumed.
    pub lines_read: usize,
    /// Most recent line, kept for error reports.
    pub last_line: Option<String>,
    /// Whether the stream ended before a terminal state was seen.
    pub stream_closed: bool,
}

/// Reads diagnostic lines from `handle` until a terminal state.
///
/// With a `limit`, reading stops after that many lines and the state seen so
/// far is returned. End of stream before a terminal state counts as
/// [`ReadinessState::Failed`].
pub fn watch(
    handle: &mut ProcessHandle,
    detector: &dyn ReadinessDetector,
    limit: Option<usize>,
) -> Result<Observation, ProcessError> {
    let mut observation = Observation {
        state: ReadinessState::Starting,
        lines_read: 0,
        last_line: None,
        stream_closed: false,
    };
    while limit.is_none_or(|max| observation.lines_read < max) {
        let Some(line) = handle.next_line()? else {
            observation.stream_closed = true;
            observation.state = ReadinessState::Failed;
            break;
        };
        observation.lines_read += 1;
        let state = detector.classify(&line);
        debug!(
            target: READINESS_TARGET,
            process = handle.label(),
            state = ?state,
            "{line}"
        );
        observation.last_line = Some(line);
        observation.state = state;
        if state.is_terminal() {
            break;
        }
    }
    Ok(observation)
}
