//! Lifecycle state of the plugin.
//!
//! [`LifecycleHandle`] is the single record of whether a run is active and
//! whether the last run ended in error. It lives behind one async mutex shared
//! by the facade and the subagent group. Holders must never await subagents or
//! collaborators while holding the lock.
//!
//! States: `Stopped` (no run, no error), `Running` (active run), `Failed`
//! (no run, recorded error).

use std::sync::Arc;

use hostagent_core::PluginLayout;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Result text reported for a healthy run.
pub const RUNNING_MESSAGE: &str = "The hostagent plugin is running ok.";
/// Result text reported when nothing runs and nothing failed.
pub const NOT_RUNNING_MESSAGE: &str = "The hostagent plugin is not running.";

/// A terminal failure of the plugin.
///
/// `should_restart` tells the plugin manager whether relaunching the plugin
/// could help. Non-restartable errors are surfaced as status results instead.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct PluginError {
    pub message: String,
    pub should_restart: bool,
}

impl PluginError {
    pub fn restartable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            should_restart: true,
        }
    }

    pub fn non_restartable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            should_restart: false,
        }
    }
}

/// Coarse lifecycle state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleState {
    Stopped,
    Running,
    Failed(PluginError),
}

/// What `GetStatus` reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusReport {
    /// A run is active. Code 0.
    Healthy,
    /// No run is active; carries the explanation. Code 1.
    NotRunning(String),
    /// The last run failed in a way the manager should act on by restarting.
    Fatal(PluginError),
}

impl StatusReport {
    /// Status code for the wire, `None` for [`StatusReport::Fatal`].
    pub const fn code(&self) -> Option<i32> {
        match self {
            Self::Healthy => Some(0),
            Self::NotRunning(_) => Some(1),
            Self::Fatal(_) => None,
        }
    }
}

/// Proof of ownership of one run, handed out by [`LifecycleHandle::begin`].
#[derive(Debug, Clone)]
pub struct RunTicket {
    pub generation: u64,
    pub scope: CancellationToken,
}

#[derive(Debug)]
struct ActiveRun {
    generation: u64,
    scope: CancellationToken,
}

/// Mutable lifecycle record.
#[derive(Debug, Default)]
pub struct LifecycleHandle {
    active: Option<ActiveRun>,
    plugin_error: Option<PluginError>,
    layout: Option<PluginLayout>,
    next_generation: u64,
}

impl LifecycleHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared handle ready to be passed to the facade.
    pub fn shared() -> Arc<Mutex<Self>> {
        Arc::new(Mutex::new(Self::new()))
    }

    fn is_current(&self, generation: u64) -> bool {
        self.active
            .as_ref()
            .is_some_and(|run| run.generation == generation)
    }

    pub const fn is_running(&self) -> bool {
        self.active.is_some()
    }

    pub fn state(&self) -> LifecycleState {
        if self.active.is_some() {
            return LifecycleState::Running;
        }
        self.plugin_error
            .clone()
            .map_or(LifecycleState::Stopped, LifecycleState::Failed)
    }

    pub const fn plugin_error(&self) -> Option<&PluginError> {
        self.plugin_error.as_ref()
    }

    /// Claim the handle for a new run. Returns `None` when a run is active.
    ///
    /// Any error from a previous run is cleared.
    pub fn begin(&mut self, layout: PluginLayout) -> Option<RunTicket> {
        if self.active.is_some() {
            return None;
        }
        self.next_generation += 1;
        let ticket = RunTicket {
            generation: self.next_generation,
            scope: CancellationToken::new(),
        };
        self.active = Some(ActiveRun {
            generation: ticket.generation,
            scope: ticket.scope.clone(),
        });
        self.plugin_error = None;
        self.layout = Some(layout);
        debug!(generation = ticket.generation, "Lifecycle handle claimed");
        Some(ticket)
    }

    /// Record an error for a start attempt that never claimed the handle.
    ///
    /// Ignored while a run is active.
    pub fn record_startup_error(&mut self, error: PluginError) {
        if self.active.is_none() {
            self.plugin_error = Some(error);
        }
    }

    /// Terminal verdict for run `generation`: cancel it and keep the error.
    ///
    /// Returns `false` when the run is no longer the active one, in which case
    /// nothing changes.
    pub fn fail(&mut self, generation: u64, error: PluginError) -> bool {
        if !self.is_current(generation) {
            debug!(generation, error = %error.message, "Ignoring error from an inactive run");
            return false;
        }
        warn!(
            generation,
            should_restart = error.should_restart,
            error = %error.message,
            "Plugin run failed"
        );
        if let Some(run) = self.active.take() {
            run.scope.cancel();
        }
        self.plugin_error = Some(error);
        true
    }

    /// Fail whatever run is active. Returns `false` if nothing was running.
    pub fn abort(&mut self, error: PluginError) -> bool {
        match self.active.as_ref().map(|run| run.generation) {
            Some(generation) => self.fail(generation, error),
            None => false,
        }
    }

    /// All subagents of run `generation` have exited.
    ///
    /// Releases the handle if that run is still marked active.
    pub fn finished(&mut self, generation: u64) {
        if self.is_current(generation) {
            info!(generation, "Subagent group exited, releasing lifecycle handle");
            if let Some(run) = self.active.take() {
                run.scope.cancel();
            }
        }
    }

    /// Stop the active run and clear any recorded error.
    ///
    /// Returns the layout of the run that was stopped or had failed, or `None`
    /// when the plugin was already stopped.
    pub fn stop(&mut self) -> Option<PluginLayout> {
        let had_run = match self.active.take() {
            Some(run) => {
                run.scope.cancel();
                true
            }
            None => false,
        };
        let had_error = self.plugin_error.take().is_some();
        if had_run || had_error {
            self.layout.take()
        } else {
            None
        }
    }

    pub fn status(&self) -> StatusReport {
        if self.active.is_some() {
            return StatusReport::Healthy;
        }
        match &self.plugin_error {
            Some(err) if err.should_restart => StatusReport::Fatal(err.clone()),
            Some(err) => StatusReport::NotRunning(format!(
                "The hostagent plugin is not running: {}",
                err.message
            )),
            None => StatusReport::NotRunning(NOT_RUNNING_MESSAGE.to_string()),
        }
    }
}

/// Lets a subagent group report back to the handle for its own run only.
#[derive(Debug, Clone)]
pub struct RunReporter {
    handle: Arc<Mutex<LifecycleHandle>>,
    generation: u64,
}

impl RunReporter {
    pub const fn new(handle: Arc<Mutex<LifecycleHandle>>, generation: u64) -> Self {
        Self { handle, generation }
    }

    pub const fn generation(&self) -> u64 {
        self.generation
    }

    /// Record a terminal verdict. Returns whether it was accepted.
    pub async fn fail(&self, error: PluginError) -> bool {
        self.handle.lock().await.fail(self.generation, error)
    }

    pub async fn finished(&self) {
        self.handle.lock().await.finished(self.generation);
    }
}
