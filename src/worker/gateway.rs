//! Search gateway implementation
//!
//! Runs the search worker once per query: JSON in on stdin, JSON array out on
//! stdout, diagnostics on stderr, bounded by the configured deadline.

use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use nix::errno::Errno;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use super::{GatewayError, InvocationState, ResultSet, WorkerInvocation};
use crate::config::GatewayConfig;

/// Message written to the worker's stdin
#[derive(Debug, Serialize)]
struct WorkerInput<'a> {
    query: &'a str,
}

/// Mediates between search requests and worker processes
pub struct SearchGateway {
    config: GatewayConfig,
    /// Admission bound, only present when configured
    permits: Option<Arc<Semaphore>>,
    next_id: AtomicU64,
}

impl SearchGateway {
    pub fn new(config: GatewayConfig) -> Self {
        let permits = config.max_concurrency.map(|n| Arc::new(Semaphore::new(n)));
        Self {
            config,
            permits,
            next_id: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Run the worker for one query and return its parsed results
    pub async fn invoke(&self, query: &str) -> Result<ResultSet, GatewayError> {
        let _permit = match &self.permits {
            Some(permits) => Some(
                permits
                    .clone()
                    .acquire_owned()
                    .await
                    .map_err(|_| GatewayError::Spawn("Worker admission closed".into()))?,
            ),
            None => None,
        };

        let mut invocation = WorkerInvocation::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        let result = self.run(&mut invocation, query).await;

        match &result {
            Ok(results) => info!(
                "Invocation {} {}: {} results",
                invocation.id(),
                invocation.state(),
                results.len()
            ),
            Err(e) => warn!("Invocation {} {}: {}", invocation.id(), invocation.state(), e),
        }

        result
    }

    async fn run(
        &self,
        invocation: &mut WorkerInvocation,
        query: &str,
    ) -> Result<ResultSet, GatewayError> {
        let input = serde_json::to_vec(&WorkerInput { query })
            .map_err(|e| GatewayError::Spawn(format!("Failed to encode worker input: {}", e)))?;

        let mut child = match self.command().spawn() {
            Ok(child) => child,
            Err(e) => {
                invocation.settle(InvocationState::ProcessError);
                return Err(GatewayError::Spawn(e.to_string()));
            }
        };

        // Leader pid doubles as the process group id. Recorded now because
        // `child.id()` is gone once the leader has been reaped.
        let pgid = child.id();
        let deadline = invocation.start(self.config.timeout);
        debug!(
            "Invocation {}: spawned worker pid={:?}",
            invocation.id(),
            pgid
        );

        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let id = invocation.id();

        let outcome = tokio::time::timeout_at(deadline, async {
            let write = async move {
                if let Some(mut stdin) = stdin {
                    // The worker may exit without reading its input; the exit
                    // status decides the outcome in that case.
                    if let Err(e) = stdin.write_all(&input).await {
                        debug!("Invocation {}: stdin write failed: {}", id, e);
                    } else if let Err(e) = stdin.shutdown().await {
                        debug!("Invocation {}: stdin close failed: {}", id, e);
                    }
                }
            };

            let ((), stdout, stderr, status) =
                tokio::join!(write, drain(stdout), drain(stderr), child.wait());
            Ok::<_, std::io::Error>((status?, stdout?, stderr?))
        })
        .await;

        match outcome {
            Ok(Ok((status, stdout, stderr))) => {
                invocation.append_output(&stdout, &stderr);
                classify(invocation, status)
            }
            Ok(Err(e)) => {
                invocation.settle(InvocationState::ProcessError);
                terminate(&mut child, pgid, id).await;
                Err(GatewayError::Process {
                    exit_code: None,
                    stderr: format!("Worker I/O failed: {}", e),
                })
            }
            Err(_) => {
                invocation.settle(InvocationState::TimedOut);
                terminate(&mut child, pgid, id).await;
                Err(GatewayError::Timeout(self.config.timeout))
            }
        }
    }

    fn command(&self) -> Command {
        let spec = &self.config.command;
        let mut cmd = std::process::Command::new(&spec.program);
        cmd.args(&spec.args)
            .envs(spec.env.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // Own process group, so a timeout can kill the worker's children too
            .process_group(0);
        if let Some(dir) = &spec.work_dir {
            cmd.current_dir(dir);
        }

        let mut cmd = Command::from(cmd);
        cmd.kill_on_drop(true);
        cmd
    }
}

/// Map a finished worker to its terminal state
fn classify(
    invocation: &mut WorkerInvocation,
    status: ExitStatus,
) -> Result<ResultSet, GatewayError> {
    if status.success() {
        return match serde_json::from_slice::<ResultSet>(invocation.stdout()) {
            Ok(results) => {
                invocation.settle(InvocationState::Succeeded);
                Ok(results)
            }
            Err(e) => {
                invocation.settle(InvocationState::ParseError);
                Err(GatewayError::Parse(e.to_string()))
            }
        };
    }

    invocation.settle(InvocationState::ProcessError);
    let mut stderr = invocation.stderr_text();
    if stderr.trim().is_empty() {
        stderr = match status.signal() {
            Some(sig) => format!("Worker terminated by signal {}", sig),
            None => "Unknown error".to_string(),
        };
    }

    Err(GatewayError::Process {
        exit_code: status.code(),
        stderr,
    })
}

async fn drain<R: AsyncRead + Unpin>(stream: Option<R>) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    if let Some(mut stream) = stream {
        stream.read_to_end(&mut buf).await?;
    }
    Ok(buf)
}

/// Kill the worker's whole process group and reap the leader.
///
/// The leader may already have exited while the rest of its group still
/// holds the pipes open, so the group is signalled regardless.
async fn terminate(child: &mut Child, pgid: Option<u32>, id: u64) {
    if let Some(pgid) = pgid {
        match killpg(Pid::from_raw(pgid as i32), Signal::SIGKILL) {
            Ok(()) => {}
            Err(Errno::ESRCH) => debug!("Invocation {}: group {} already gone", id, pgid),
            Err(e) => {
                debug!("Invocation {}: killpg({}) failed: {}", id, pgid, e);
                if child.id().is_some() {
                    if let Err(e) = child.start_kill() {
                        warn!("Invocation {}: failed to kill worker: {}", id, e);
                    }
                }
            }
        }
    }

    match child.wait().await {
        Ok(status) => debug!("Invocation {}: worker reaped ({})", id, status),
        Err(e) => warn!("Invocation {}: failed to reap worker: {}", id, e),
    }
}
