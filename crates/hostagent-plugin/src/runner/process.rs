//! Runs commands as OS processes via `tokio::process`.

use std::collections::VecDeque;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::isolation::{ProcessIsolation, platform_isolation};
use super::{CommandRunner, RunError, RunOutcome, SubagentDescriptor};

/// Lines of output kept per run. Subagents are long-lived, so only the tail
/// is retained for error reports.
const OUTPUT_TAIL_LINES: usize = 200;

/// How long to wait for the output readers after the process is gone.
/// Grandchildren that inherited the pipes can keep them open indefinitely.
const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

/// Longer output lines are truncated to this many bytes.
const MAX_LINE_BYTES: usize = 16 * 1024;

/// [`CommandRunner`] backed by real child processes.
pub struct ProcessRunner {
    isolation: Arc<dyn ProcessIsolation>,
    terminate_timeout: Duration,
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessRunner {
    /// Runner using this platform's isolation strategy.
    pub fn new() -> Self {
        Self {
            isolation: platform_isolation(),
            terminate_timeout: Duration::from_secs(5),
        }
    }

    /// Grace period between SIGTERM and SIGKILL when a run is canceled.
    #[must_use]
    pub const fn with_terminate_timeout(mut self, timeout: Duration) -> Self {
        self.terminate_timeout = timeout;
        self
    }

    pub const fn terminate_timeout(&self) -> Duration {
        self.terminate_timeout
    }

    fn command(&self, descriptor: &SubagentDescriptor) -> Command {
        let mut cmd = Command::new(&descriptor.executable);
        cmd.args(&descriptor.args)
            .envs(descriptor.env.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &descriptor.working_dir {
            cmd.current_dir(dir);
        }
        self.isolation.isolate(&mut cmd);
        cmd
    }

    async fn terminate(&self, name: &str, child: &mut Child) {
        #[cfg(unix)]
        {
            if let Some(pid) = child.id() {
                // SAFETY: pid comes from our own Child handle which has not
                // been reaped yet; kill(2) with SIGTERM has no memory effects.
                #[allow(unsafe_code)]
                #[allow(clippy::cast_possible_wrap)]
                let ret = unsafe { libc::kill(pid as i32, libc::SIGTERM) };
                if ret != 0 {
                    let err = std::io::Error::last_os_error();
                    warn!(subagent = name, pid, error = %err, "Failed to send SIGTERM");
                }
            }
        }

        match tokio::time::timeout(self.terminate_timeout, child.wait()).await {
            Ok(Ok(status)) => debug!(subagent = name, ?status, "Process exited after cancel"),
            Ok(Err(e)) => {
                warn!(subagent = name, error = %e, "Error waiting for process, killing");
                kill(name, child).await;
            }
            Err(_) => {
                warn!(subagent = name, "Timeout waiting for graceful shutdown, killing");
                kill(name, child).await;
            }
        }
    }
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, descriptor: &SubagentDescriptor, scope: CancellationToken) -> RunOutcome {
        let name = descriptor.name.as_str();
        if scope.is_cancelled() {
            return RunOutcome::canceled("");
        }

        info!(subagent = name, command = %descriptor.command_line(), "Running command");
        let mut child = match self.command(descriptor).spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!(subagent = name, error = %e, "Failed to spawn command");
                return RunOutcome::failed("", RunError::Spawn(e.to_string()));
            }
        };

        let tail = Arc::new(Mutex::new(OutputTail::default()));
        let readers = [
            child
                .stdout
                .take()
                .map(|out| spawn_reader(name, out, Arc::clone(&tail))),
            child
                .stderr
                .take()
                .map(|err| spawn_reader(name, err, Arc::clone(&tail))),
        ];

        let waited = tokio::select! {
            status = child.wait() => Some(status),
            () = scope.cancelled() => None,
        };

        let output_of = |tail: &Arc<Mutex<OutputTail>>| {
            tail.lock()
                .unwrap_or_else(PoisonError::into_inner)
                .render()
        };

        match waited {
            None => {
                info!(subagent = name, "Execution scope canceled, stopping process");
                self.terminate(name, &mut child).await;
                drain(readers).await;
                RunOutcome::canceled(output_of(&tail))
            }
            Some(Err(e)) => {
                warn!(subagent = name, error = %e, "Failed to wait for process");
                kill(name, &mut child).await;
                drain(readers).await;
                RunOutcome::failed(output_of(&tail), RunError::Wait(e.to_string()))
            }
            Some(Ok(status)) => {
                drain(readers).await;
                let output = output_of(&tail);
                let outcome = classify(status, output);
                info!(subagent = name, kind = %outcome.kind, ?status, "Command finished");
                outcome
            }
        }
    }
}

async fn kill(name: &str, child: &mut Child) {
    if let Err(e) = child.kill().await {
        warn!(subagent = name, error = %e, "Failed to kill process");
    }
}

fn classify(status: ExitStatus, output: String) -> RunOutcome {
    if status.success() {
        return RunOutcome::ok(output);
    }
    match status.code() {
        Some(code) => RunOutcome::failed(output, RunError::ExitCode(code)),
        None => RunOutcome::signaled(output, exit_signal(status)),
    }
}

#[cfg(unix)]
fn exit_signal(status: ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
const fn exit_signal(_status: ExitStatus) -> Option<i32> {
    None
}

fn spawn_reader<R>(name: &str, pipe: R, tail: Arc<Mutex<OutputTail>>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let name = name.to_string();
    tokio::spawn(async move {
        let mut reader = BufReader::new(pipe);
        let mut buf = Vec::new();
        // Keep reading until EOF: a closed read end would SIGPIPE the child.
        loop {
            buf.clear();
            match read_line_capped(&mut reader, &mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(trim_newline(&buf)).into_owned();
                    debug!(subagent = %name, "output: {}", line);
                    tail.lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .push(line);
                }
                Err(e) => {
                    warn!(subagent = %name, error = %e, "Failed to read process output");
                    break;
                }
            }
        }
    })
}

/// Read one line into `line`, keeping at most [`MAX_LINE_BYTES`] of it.
///
/// Returns the number of bytes consumed from the pipe, 0 at EOF.
async fn read_line_capped<R>(reader: &mut R, line: &mut Vec<u8>) -> std::io::Result<usize>
where
    R: AsyncBufRead + Unpin,
{
    let mut consumed = 0;
    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            return Ok(consumed);
        }
        let (used, done) = match available.iter().position(|b| *b == b'\n') {
            Some(i) => (i + 1, true),
            None => (available.len(), false),
        };
        let room = MAX_LINE_BYTES.saturating_sub(line.len());
        line.extend_from_slice(&available[..used.min(room)]);
        reader.consume(used);
        consumed += used;
        if done {
            return Ok(consumed);
        }
    }
}

fn trim_newline(bytes: &[u8]) -> &[u8] {
    let bytes = bytes.strip_suffix(b"\n").unwrap_or(bytes);
    bytes.strip_suffix(b"\r").unwrap_or(bytes)
}

async fn drain(readers: [Option<JoinHandle<()>>; 2]) {
    for mut reader in readers.into_iter().flatten() {
        if tokio::time::timeout(OUTPUT_DRAIN_TIMEOUT, &mut reader)
            .await
            .is_err()
        {
            reader.abort();
        }
    }
}

/// Bounded, arrival-ordered tail of a process's combined output.
#[derive(Debug, Default)]
struct OutputTail {
    lines: VecDeque<String>,
    dropped: usize,
}

impl OutputTail {
    fn push(&mut self, line: String) {
        if self.lines.len() == OUTPUT_TAIL_LINES {
            self.lines.pop_front();
            self.dropped += 1;
        }
        self.lines.push_back(line);
    }

    fn render(&self) -> String {
        let mut out = String::new();
        if self.dropped > 0 {
            out.push_str(&format!("... {} earlier lines omitted\n", self.dropped));
        }
        for line in &self.lines {
            out.push_str(line);
            out.push('\n');
        }
        out
    }
}
