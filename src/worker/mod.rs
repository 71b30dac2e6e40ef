//! Worker module - search worker process abstraction
//!
//! This module owns everything about talking to the external search worker:
//! - `WorkerCommand`: how to launch the worker
//! - `WorkerInvocation`: per-request lifecycle state and output buffers
//! - `SearchGateway`: spawn, feed, bound, collect and classify one invocation
//!
//! The worker module does NOT:
//! - Rank or score results (the worker does that)
//! - Filter results by platform
//! - Know about HTTP or authentication

pub mod gateway;

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::Instant;
use tracing::debug;

pub use gateway::SearchGateway;

/// Command specification for launching the worker
#[derive(Debug, Clone)]
pub struct WorkerCommand {
    /// Program path or name
    pub program: String,
    /// Arguments to the program
    pub args: Vec<String>,
    /// Extra environment variables (key, value)
    pub env: Vec<(String, String)>,
    /// Working directory
    pub work_dir: Option<PathBuf>,
}

impl WorkerCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            work_dir: None,
        }
    }

    pub fn with_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args = args.into_iter().map(|a| a.into()).collect();
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn with_work_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.work_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    /// Program followed by its arguments
    pub fn to_vec(&self) -> Vec<String> {
        let mut v = vec![self.program.clone()];
        v.extend(self.args.clone());
        v
    }
}

/// One search hit as produced by the worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultItem {
    pub platform: String,
    pub problem_name: String,
    pub problem_link: String,
    /// Any additional fields the worker emits, passed through untouched
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[cfg(test)]
impl ResultItem {
    pub fn new(
        platform: impl Into<String>,
        problem_name: impl Into<String>,
        problem_link: impl Into<String>,
    ) -> Self {
        Self {
            platform: platform.into(),
            problem_name: problem_name.into(),
            problem_link: problem_link.into(),
            extra: serde_json::Map::new(),
        }
    }
}

/// Ordered worker output; ranking order is the worker's
pub type ResultSet = Vec<ResultItem>;

/// Failure of a single worker invocation
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The worker could not be started
    #[error("Script execution failed: {0}")]
    Spawn(String),

    /// The deadline elapsed before the worker exited
    #[error("Query timed out after {} ms", .0.as_millis())]
    Timeout(Duration),

    /// The worker exited unsuccessfully
    #[error("Script failed: {stderr}")]
    Process {
        exit_code: Option<i32>,
        stderr: String,
    },

    /// The worker exited 0 but its stdout was not a valid result array
    #[error("Failed to parse output: {0}")]
    Parse(String),
}

/// Lifecycle state of a worker invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvocationState {
    Spawning,
    Running,
    Succeeded,
    TimedOut,
    ProcessError,
    ParseError,
}

impl InvocationState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            InvocationState::Succeeded
                | InvocationState::TimedOut
                | InvocationState::ProcessError
                | InvocationState::ParseError
        )
    }
}

impl std::fmt::Display for InvocationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            InvocationState::Spawning => "spawning",
            InvocationState::Running => "running",
            InvocationState::Succeeded => "succeeded",
            InvocationState::TimedOut => "timed_out",
            InvocationState::ProcessError => "process_error",
            InvocationState::ParseError => "parse_error",
        };
        write!(f, "{}", s)
    }
}

/// State of one request-scoped worker run. Never shared between requests.
#[derive(Debug)]
pub struct WorkerInvocation {
    id: u64,
    state: InvocationState,
    deadline: Option<Instant>,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
}

impl WorkerInvocation {
    pub fn new(id: u64) -> Self {
        Self {
            id,
            state: InvocationState::Spawning,
            deadline: None,
            stdout: Vec::new(),
            stderr: Vec::new(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> InvocationState {
        self.state
    }

    #[cfg(test)]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Move from Spawning to Running and arm the deadline
    pub fn start(&mut self, timeout: Duration) -> Instant {
        let deadline = Instant::now() + timeout;
        if self.state == InvocationState::Spawning {
            self.state = InvocationState::Running;
            self.deadline = Some(deadline);
        }
        deadline
    }

    /// Append output to the stream buffers. Ignored once terminal.
    pub fn append_output(&mut self, stdout: &[u8], stderr: &[u8]) -> bool {
        if self.state.is_terminal() {
            debug!(
                "Invocation {}: dropping {} bytes of late output",
                self.id,
                stdout.len() + stderr.len()
            );
            return false;
        }
        self.stdout.extend_from_slice(stdout);
        self.stderr.extend_from_slice(stderr);
        true
    }

    /// Record the terminal state. Only the first call wins; later calls are
    /// no-ops and return false.
    pub fn settle(&mut self, state: InvocationState) -> bool {
        debug_assert!(state.is_terminal());
        if self.state.is_terminal() {
            debug!(
                "Invocation {}: ignoring {} after {}",
                self.id, state, self.state
            );
            return false;
        }
        self.state = state;
        self.deadline = None;
        true
    }

    pub fn stdout(&self) -> &[u8] {
        &self.stdout
    }

    /// Captured stderr, lossily decoded, whitespace kept as emitted
    pub fn stderr_text(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}
