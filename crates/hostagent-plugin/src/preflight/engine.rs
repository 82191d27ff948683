//! Config validation and generation through the external config engine.

use std::sync::Arc;

use async_trait::async_trait;
use hostagent_core::PluginLayout;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::{ConfigGenerator, ConfigValidator, PreflightError};
use crate::runner::{CommandRunner, RunOutcome, SubagentDescriptor, TerminationKind};

/// Subagent whose config the engine generates, with its output and state
/// directories.
struct GeneratedService {
    service: &'static str,
    out_dir: fn(&PluginLayout) -> std::path::PathBuf,
    state_dir: fn(&PluginLayout) -> std::path::PathBuf,
}

const GENERATED_SERVICES: [GeneratedService; 2] = [
    GeneratedService {
        service: "otel",
        out_dir: PluginLayout::otel_runtime_dir,
        state_dir: PluginLayout::otel_state_dir,
    },
    GeneratedService {
        service: "fluentbit",
        out_dir: PluginLayout::fluent_bit_runtime_dir,
        state_dir: PluginLayout::fluent_bit_state_dir,
    },
];

/// Runs the config engine binary from the install directory.
pub struct ConfigEngine {
    runner: Arc<dyn CommandRunner>,
}

impl ConfigEngine {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    /// `-in <config> -logs <dir>`
    pub fn validate_command(layout: &PluginLayout) -> SubagentDescriptor {
        SubagentDescriptor::new("config-validate", layout.engine_binary())
            .arg("-in")
            .arg(layout.user_config())
            .arg("-logs")
            .arg(layout.logs_dir())
    }

    /// `-service <name> -in <config> -out <dir> -logs <dir> -state <dir>`
    fn generate_command(layout: &PluginLayout, service: &GeneratedService) -> SubagentDescriptor {
        SubagentDescriptor::new(
            format!("config-generate-{}", service.service),
            layout.engine_binary(),
        )
        .arg("-service")
        .arg(service.service)
        .arg("-in")
        .arg(layout.user_config())
        .arg("-out")
        .arg((service.out_dir)(layout))
        .arg("-logs")
        .arg(layout.logs_dir())
        .arg("-state")
        .arg((service.state_dir)(layout))
    }

    pub fn generate_commands(layout: &PluginLayout) -> Vec<SubagentDescriptor> {
        GENERATED_SERVICES
            .iter()
            .map(|s| Self::generate_command(layout, s))
            .collect()
    }
}

fn failure_details(outcome: &RunOutcome) -> String {
    format!(
        "command output: {}, command error: {}",
        outcome.output.trim_end(),
        outcome.error_text()
    )
}

#[async_trait]
impl ConfigValidator for ConfigEngine {
    async fn validate(
        &self,
        layout: &PluginLayout,
        scope: &CancellationToken,
    ) -> Result<(), PreflightError> {
        let cmd = Self::validate_command(layout);
        let outcome = self.runner.run(&cmd, scope.child_token()).await;
        if outcome.kind == TerminationKind::CanceledByContext {
            return Err(PreflightError::Canceled("config validation".into()));
        }
        if !outcome.is_success() {
            return Err(PreflightError::InvalidConfig(failure_details(&outcome)));
        }
        info!(config = %layout.user_config().display(), "Config validated");
        Ok(())
    }
}

#[async_trait]
impl ConfigGenerator for ConfigEngine {
    async fn generate(
        &self,
        layout: &PluginLayout,
        scope: &CancellationToken,
    ) -> Result<(), PreflightError> {
        for service in &GENERATED_SERVICES {
            let cmd = Self::generate_command(layout, service);
            let outcome = self.runner.run(&cmd, scope.child_token()).await;
            if outcome.kind == TerminationKind::CanceledByContext {
                return Err(PreflightError::Canceled(format!(
                    "{} config generation",
                    service.service
                )));
            }
            if !outcome.is_success() {
                return Err(PreflightError::Generation {
                    service: service.service.to_string(),
                    reason: failure_details(&outcome),
                });
            }
            info!(service = service.service, "Generated subagent config");
        }
        Ok(())
    }
}
