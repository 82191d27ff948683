//! Detection of agent installations the plugin manager does not own.

use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::Regex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::{ConflictDetector, PreflightError};
use crate::runner::{CommandRunner, SubagentDescriptor, TerminationKind};

/// Services whose presence means another agent install manages the host.
pub const DEFAULT_CONFLICTING_SERVICES: [&str; 3] = [
    "hostagent.service",
    "hostagent-legacy-metrics.service",
    "hostagent-legacy-logging.service",
];

/// Printed by `systemctl list-unit-files` when none of the units exist.
const NO_UNITS_LISTED: &str = "0 unit files listed.";

static UNIT_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\w-]+\.service").expect("static regex is valid"));

/// Queries systemd for installed unit files.
pub struct SystemdConflictDetector {
    runner: Arc<dyn CommandRunner>,
    systemctl: String,
}

impl SystemdConflictDetector {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            systemctl: "systemctl".to_string(),
        }
    }

    fn command(&self, services: &[String]) -> SubagentDescriptor {
        SubagentDescriptor::new("systemctl", &self.systemctl)
            .arg("list-unit-files")
            .args(services)
    }
}

/// Unit names found in `systemctl list-unit-files` output.
pub fn parse_unit_files(output: &str) -> Vec<String> {
    if output.contains(NO_UNITS_LISTED) {
        return Vec::new();
    }
    UNIT_NAME
        .find_iter(output)
        .map(|m| m.as_str().to_string())
        .collect()
}

#[async_trait]
impl ConflictDetector for SystemdConflictDetector {
    async fn find_preexisting(
        &self,
        services: &[String],
        scope: &CancellationToken,
    ) -> Result<Vec<String>, PreflightError> {
        let outcome = self
            .runner
            .run(&self.command(services), scope.child_token())
            .await;
        if outcome.kind == TerminationKind::CanceledByContext {
            return Err(PreflightError::Canceled("conflict detection".into()));
        }
        // systemctl exits non-zero when nothing matched, so the output is
        // checked first.
        if outcome.output.contains(NO_UNITS_LISTED) {
            return Ok(Vec::new());
        }
        if !outcome.is_success() {
            return Err(PreflightError::ConflictCheck(format!(
                "{}, command output: {}",
                outcome.error_text(),
                outcome.output.trim_end()
            )));
        }
        let found = parse_unit_files(&outcome.output);
        if found.is_empty() {
            info!("No conflicting systemd units installed");
        } else {
            warn!(units = ?found, "Conflicting systemd units installed");
        }
        Ok(found)
    }
}
