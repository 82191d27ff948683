//! Lifecycle service: Start, Stop, status and Apply over one shared handle.
//!
//! The handle lock is only held to read or update lifecycle state, and across
//! the directory removal of a cleanup Stop. Preflight commands and subagents
//! always run with the lock released.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use hostagent_core::PluginLayout;
use hostagent_core::config::{Config, PathsConfig};
use tokio::sync::Mutex;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::lifecycle::{LifecycleHandle, LifecycleState, PluginError, RunReporter, StatusReport};
use crate::policy::RestartPolicy;
use crate::preflight::{CustomConfig, Preflight, PreflightError};
use crate::runner::CommandRunner;
use crate::supervisor::{self, SubagentGroup};

/// Parameters of a Start call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StartOptions {
    /// Plugin state directory; the configured default when `None`.
    pub state_dir: Option<PathBuf>,
    pub custom_config: Option<CustomConfig>,
}

/// Errors returned to Start and Stop callers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LifecycleError {
    #[error("cannot determine the plugin install location: {0}")]
    InstallLocation(String),

    #[error(transparent)]
    Preflight(#[from] PreflightError),

    #[error("failed to remove {path}: {reason}")]
    Cleanup { path: PathBuf, reason: String },
}

impl LifecycleError {
    /// Host or configuration problem rather than a plugin fault.
    pub const fn is_precondition(&self) -> bool {
        match self {
            Self::Preflight(e) => e.is_precondition(),
            Self::InstallLocation(_) | Self::Cleanup { .. } => false,
        }
    }
}

impl From<LifecycleError> for tonic::Status {
    fn from(err: LifecycleError) -> Self {
        if matches!(err, LifecycleError::Preflight(PreflightError::Canceled(_))) {
            Self::cancelled(err.to_string())
        } else if err.is_precondition() {
            Self::failed_precondition(err.to_string())
        } else {
            Self::internal(err.to_string())
        }
    }
}

struct Inner {
    handle: Arc<Mutex<LifecycleHandle>>,
    runner: Arc<dyn CommandRunner>,
    preflight: Preflight,
    policy: RestartPolicy,
    paths: PathsConfig,
    groups: TaskTracker,
}

/// The plugin's lifecycle operations. Cheap to clone.
#[derive(Clone)]
pub struct LifecycleService {
    inner: Arc<Inner>,
}

impl LifecycleService {
    /// Service with command-backed preflight collaborators.
    pub fn new(config: &Config, runner: Arc<dyn CommandRunner>) -> Self {
        let preflight = Preflight::command_backed(Arc::clone(&runner));
        Self::with_preflight(config, runner, preflight)
    }

    pub fn with_preflight(
        config: &Config,
        runner: Arc<dyn CommandRunner>,
        preflight: Preflight,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                handle: LifecycleHandle::shared(),
                runner,
                preflight,
                policy: RestartPolicy::from_config(&config.supervisor),
                paths: config.paths.clone(),
                groups: TaskTracker::new(),
            }),
        }
    }

    /// Start the subagents. Returns once preflight has passed and the group
    /// has been spawned; subagent failures surface through [`Self::status`].
    pub async fn start(&self, options: StartOptions) -> Result<(), LifecycleError> {
        let layout = match self.resolve_layout(options.state_dir.as_deref()) {
            Ok(layout) => layout,
            Err(err) => {
                let mut handle = self.inner.handle.lock().await;
                if handle.is_running() {
                    info!("The plugin is started already, skipping the current request");
                    return Ok(());
                }
                handle.record_startup_error(PluginError::non_restartable(format!(
                    "Start() failed: {err}"
                )));
                drop(handle);
                warn!(error = %err, "Start failed");
                return Err(err);
            }
        };

        let Some(ticket) = self.inner.handle.lock().await.begin(layout.clone()) else {
            info!("The plugin is started already, skipping the current request");
            return Ok(());
        };
        info!(
            generation = ticket.generation,
            install_dir = %layout.install_dir().display(),
            state_dir = %layout.state_dir().display(),
            "Starting subagents"
        );

        let subagents = supervisor::descriptors(&layout);
        if let Err(err) = self
            .inner
            .preflight
            .run(
                &layout,
                options.custom_config.as_ref(),
                &subagents,
                &ticket.scope,
            )
            .await
        {
            let err = LifecycleError::from(err);
            warn!(generation = ticket.generation, error = %err, "Start failed");
            self.inner.handle.lock().await.fail(
                ticket.generation,
                PluginError::non_restartable(format!("Start() failed: {err}")),
            );
            return Err(err);
        }

        let group = SubagentGroup::new(Arc::clone(&self.inner.runner), self.inner.policy, subagents);
        let reporter = RunReporter::new(Arc::clone(&self.inner.handle), ticket.generation);
        group.launch(&self.inner.groups, ticket.scope, reporter);
        Ok(())
    }

    /// Stop the subagents and clear any recorded error.
    ///
    /// With `cleanup`, generated configs and runtime state of the stopped run
    /// are removed before the handle is released, so a following Start never
    /// loses freshly generated files. Processes are torn down asynchronously.
    pub async fn stop(&self, cleanup: bool) -> Result<(), LifecycleError> {
        let mut handle = self.inner.handle.lock().await;
        let Some(layout) = handle.stop() else {
            info!("The plugin is stopped already, skipping the current request");
            return Ok(());
        };
        info!(cleanup, "Stopped subagents");
        if cleanup {
            remove_generated_dirs(&layout).await?;
        }
        drop(handle);
        Ok(())
    }

    pub async fn status(&self) -> StatusReport {
        self.inner.handle.lock().await.status()
    }

    pub async fn state(&self) -> LifecycleState {
        self.inner.handle.lock().await.state()
    }

    /// Apply is accepted and ignored.
    pub fn apply(&self, payload_type: Option<&str>) {
        info!(payload_type = payload_type.unwrap_or_default(), "Received an Apply request");
    }

    /// End the active run because the plugin itself is going away.
    pub async fn abort(&self, reason: &str) {
        let aborted = self
            .inner
            .handle
            .lock()
            .await
            .abort(PluginError::restartable(format!(
                "The hostagent plugin was terminated: {reason}"
            )));
        if aborted {
            info!(reason, "Aborted the active run");
        }
    }

    /// Abort the active run and wait up to `grace` for every subagent
    /// group to finish tearing down its processes.
    ///
    /// Returns `false` if some group was still running when `grace` ran out.
    pub async fn shutdown(&self, reason: &str, grace: Duration) -> bool {
        self.abort(reason).await;
        self.inner.groups.close();
        let drained = tokio::time::timeout(grace, self.inner.groups.wait())
            .await
            .is_ok();
        if drained {
            info!("All subagent groups exited");
        } else {
            warn!(?grace, "Subagent groups still running after the shutdown grace period");
        }
        if let Some(err) = self.inner.handle.lock().await.plugin_error() {
            info!(should_restart = err.should_restart, error = %err.message, "Final plugin state");
        }
        drained
    }

    fn resolve_layout(&self, state_dir: Option<&Path>) -> Result<PluginLayout, LifecycleError> {
        let install_dir = match &self.inner.paths.install_dir {
            Some(dir) => dir.clone(),
            None => executable_dir()?,
        };
        let state_dir = state_dir
            .filter(|p| !p.as_os_str().is_empty())
            .map_or_else(|| self.inner.paths.default_state_dir.clone(), Path::to_path_buf);
        Ok(PluginLayout::new(
            install_dir,
            state_dir,
            self.inner.paths.user_config_path.clone(),
        ))
    }
}

/// Directory holding the running executable, symlinks resolved.
fn executable_dir() -> Result<PathBuf, LifecycleError> {
    let exe = std::env::current_exe()
        .and_then(std::fs::canonicalize)
        .map_err(|e| LifecycleError::InstallLocation(e.to_string()))?;
    exe.parent()
        .map(Path::to_path_buf)
        .ok_or_else(|| LifecycleError::InstallLocation(format!("{} has no parent", exe.display())))
}

async fn remove_generated_dirs(layout: &PluginLayout) -> Result<(), LifecycleError> {
    for dir in layout.generated_dirs() {
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => debug!(dir = %dir.display(), "Removed generated directory"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(LifecycleError::Cleanup {
                    path: dir,
                    reason: e.to_string(),
                });
            }
        }
    }
    info!(state_dir = %layout.state_dir().display(), "Removed generated configs and state");
    Ok(())
}
