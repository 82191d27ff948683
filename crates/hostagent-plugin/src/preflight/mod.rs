//! Checks and preparation run by Start before any subagent is launched.
//!
//! In order: conflict detection, custom config write, config validation,
//! config generation, subagent executable checks. The first failure aborts
//! the start.

pub mod conflicts;
pub mod custom_config;
pub mod engine;

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use hostagent_core::PluginLayout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::runner::{CommandRunner, SubagentDescriptor};

pub use conflicts::{DEFAULT_CONFLICTING_SERVICES, SystemdConflictDetector};
pub use custom_config::{CustomConfig, write_custom_config};
pub use engine::ConfigEngine;

/// Errors from preflight steps.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PreflightError {
    #[error("detected installations unmanaged by the plugin manager: {}", .0.join(", "))]
    Conflict(Vec<String>),

    #[error("unable to verify existing installations: {0}")]
    ConflictCheck(String),

    #[error("failed to convert the custom config to YAML: {0}")]
    ConfigRender(String),

    #[error("failed to write the custom config to {path}: {reason}")]
    ConfigWrite { path: PathBuf, reason: String },

    #[error("failed to validate the config: {0}")]
    InvalidConfig(String),

    #[error("failed to generate the {service} config: {reason}")]
    Generation { service: String, reason: String },

    #[error("subagent executable not found: {}", .0.display())]
    MissingExecutable(PathBuf),

    #[error("{0} canceled before completing")]
    Canceled(String),
}

impl PreflightError {
    /// Whether the failure lies in the host or config rather than in the
    /// plugin's own I/O.
    pub const fn is_precondition(&self) -> bool {
        matches!(
            self,
            Self::Conflict(_) | Self::ConfigRender(_) | Self::InvalidConfig(_) | Self::Generation { .. }
        )
    }
}

/// Finds services that would conflict with the plugin's subagents.
#[async_trait]
pub trait ConflictDetector: Send + Sync {
    /// Names from `services` that are installed on the host.
    async fn find_preexisting(
        &self,
        services: &[String],
        scope: &CancellationToken,
    ) -> Result<Vec<String>, PreflightError>;
}

/// Validates the unified user configuration.
#[async_trait]
pub trait ConfigValidator: Send + Sync {
    async fn validate(
        &self,
        layout: &PluginLayout,
        scope: &CancellationToken,
    ) -> Result<(), PreflightError>;
}

/// Generates subagent configuration from the unified user configuration.
#[async_trait]
pub trait ConfigGenerator: Send + Sync {
    async fn generate(
        &self,
        layout: &PluginLayout,
        scope: &CancellationToken,
    ) -> Result<(), PreflightError>;
}

/// The preflight pipeline with its collaborators.
#[derive(Clone)]
pub struct Preflight {
    conflicts: Arc<dyn ConflictDetector>,
    validator: Arc<dyn ConfigValidator>,
    generator: Arc<dyn ConfigGenerator>,
    conflicting_services: Vec<String>,
}

impl Preflight {
    pub fn new(
        conflicts: Arc<dyn ConflictDetector>,
        validator: Arc<dyn ConfigValidator>,
        generator: Arc<dyn ConfigGenerator>,
    ) -> Self {
        Self {
            conflicts,
            validator,
            generator,
            conflicting_services: DEFAULT_CONFLICTING_SERVICES
                .iter()
                .map(ToString::to_string)
                .collect(),
        }
    }

    /// Collaborators that shell out to `systemctl` and the config engine.
    pub fn command_backed(runner: Arc<dyn CommandRunner>) -> Self {
        let engine = Arc::new(ConfigEngine::new(Arc::clone(&runner)));
        Self::new(
            Arc::new(SystemdConflictDetector::new(runner)),
            Arc::clone(&engine) as Arc<dyn ConfigValidator>,
            engine,
        )
    }

    #[must_use]
    pub fn with_conflict_detector(mut self, detector: Arc<dyn ConflictDetector>) -> Self {
        self.conflicts = detector;
        self
    }

    pub async fn run(
        &self,
        layout: &PluginLayout,
        custom_config: Option<&CustomConfig>,
        subagents: &[SubagentDescriptor],
        scope: &CancellationToken,
    ) -> Result<(), PreflightError> {
        let found = self
            .conflicts
            .find_preexisting(&self.conflicting_services, scope)
            .await?;
        if !found.is_empty() {
            return Err(PreflightError::Conflict(found));
        }
        debug!("No conflicting installations found");

        write_custom_config(custom_config, layout.user_config()).await?;
        self.validator.validate(layout, scope).await?;
        self.generator.generate(layout, scope).await?;
        check_executables(subagents).await?;

        info!(state_dir = %layout.state_dir().display(), "Preflight checks passed");
        Ok(())
    }
}

async fn check_executables(subagents: &[SubagentDescriptor]) -> Result<(), PreflightError> {
    for d in subagents {
        match tokio::fs::metadata(&d.executable).await {
            Ok(meta) if meta.is_file() => {}
            _ => return Err(PreflightError::MissingExecutable(d.executable.clone())),
        }
    }
    Ok(())
}
