//! Command execution for subagents and collaborator tools.
//!
//! A [`CommandRunner`] executes one [`SubagentDescriptor`] to completion (or
//! until its scope is canceled) and classifies the result as a [`RunOutcome`].
//! Runners never retry; that is the restart policy's job.

#[cfg(any(test, feature = "test-utils"))]
pub mod fake;
pub mod isolation;
pub mod process;

use std::ffi::OsString;
use std::fmt;
use std::path::PathBuf;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

pub use isolation::{ProcessIsolation, platform_isolation};
pub use process::ProcessRunner;

/// Executes external commands.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `descriptor` until it exits or `scope` is canceled.
    async fn run(&self, descriptor: &SubagentDescriptor, scope: CancellationToken) -> RunOutcome;
}

/// Immutable description of one external command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubagentDescriptor {
    /// Short label used in logs and error messages.
    pub name: String,
    pub executable: PathBuf,
    pub args: Vec<OsString>,
    pub working_dir: Option<PathBuf>,
    pub env: Vec<(OsString, OsString)>,
}

impl SubagentDescriptor {
    pub fn new(name: impl Into<String>, executable: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            executable: executable.into(),
            args: Vec::new(),
            working_dir: None,
            env: Vec::new(),
        }
    }

    #[must_use]
    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    #[must_use]
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// File name of the executable, for matching in logs and tests.
    pub fn program_name(&self) -> &str {
        self.executable
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
    }

    /// Space-separated command line for logging.
    pub fn command_line(&self) -> String {
        std::iter::once(self.executable.as_os_str())
            .chain(self.args.iter().map(OsString::as_os_str))
            .map(|s| s.to_string_lossy())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// How a process execution attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationKind {
    /// Exit status 0.
    ExitedOk,
    /// Non-zero exit code, or the process could not be spawned or waited on.
    ExitedError,
    /// No exit code: the process was killed by a signal.
    TerminatedBySignal,
    /// The execution scope was canceled before or while the process ran.
    CanceledByContext,
}

impl fmt::Display for TerminationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::ExitedOk => "exited-ok",
            Self::ExitedError => "exited-error",
            Self::TerminatedBySignal => "terminated-by-signal",
            Self::CanceledByContext => "canceled-by-context",
        };
        f.write_str(s)
    }
}

/// Why a run did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RunError {
    #[error("failed to spawn: {0}")]
    Spawn(String),

    #[error("failed to wait for process: {0}")]
    Wait(String),

    #[error("exit status {0}")]
    ExitCode(i32),

    #[error("terminated by signal {}", .0.map_or_else(|| "unknown".to_string(), |s| s.to_string()))]
    Signal(Option<i32>),

    #[error("execution scope canceled")]
    Canceled,
}

/// Result of one execution attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    /// Captured combined stdout and stderr (bounded tail).
    pub output: String,
    pub kind: TerminationKind,
    pub error: Option<RunError>,
}

impl RunOutcome {
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            kind: TerminationKind::ExitedOk,
            error: None,
        }
    }

    pub fn failed(output: impl Into<String>, error: RunError) -> Self {
        Self {
            output: output.into(),
            kind: TerminationKind::ExitedError,
            error: Some(error),
        }
    }

    pub fn signaled(output: impl Into<String>, signal: Option<i32>) -> Self {
        Self {
            output: output.into(),
            kind: TerminationKind::TerminatedBySignal,
            error: Some(RunError::Signal(signal)),
        }
    }

    pub fn canceled(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            kind: TerminationKind::CanceledByContext,
            error: Some(RunError::Canceled),
        }
    }

    pub const fn is_success(&self) -> bool {
        matches!(self.kind, TerminationKind::ExitedOk)
    }

    /// Error text, empty on success.
    pub fn error_text(&self) -> String {
        self.error.as_ref().map(ToString::to_string).unwrap_or_default()
    }
}
