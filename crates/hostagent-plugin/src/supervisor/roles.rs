//! Fixed subagent roles and their command templates.

use std::fmt;

use hostagent_core::PluginLayout;

use crate::runner::SubagentDescriptor;

/// A subagent the plugin supervises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubagentRole {
    /// OpenTelemetry collector.
    Metrics,
    /// Fluent Bit, run under the logging wrapper.
    Logging,
    /// Diagnostics reporter.
    Diagnostics,
}

impl SubagentRole {
    pub const ALL: [Self; 3] = [Self::Metrics, Self::Logging, Self::Diagnostics];

    pub const fn name(self) -> &'static str {
        match self {
            Self::Metrics => "metrics",
            Self::Logging => "logging",
            Self::Diagnostics => "diagnostics",
        }
    }

    /// Command line for this role under `layout`.
    pub fn descriptor(self, layout: &PluginLayout) -> SubagentDescriptor {
        match self {
            Self::Metrics => metrics(layout),
            Self::Logging => logging(layout),
            Self::Diagnostics => SubagentDescriptor::new(self.name(), layout.diagnostics_binary())
                .arg("-config")
                .arg(layout.user_config()),
        }
    }
}

impl fmt::Display for SubagentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Collector feature gates enabled on Linux.
#[cfg(not(windows))]
const OTEL_FEATURE_GATES: &str = "receiver.prometheusreceiver.RemoveStartTimeAdjustment";

#[cfg(not(windows))]
fn metrics(layout: &PluginLayout) -> SubagentDescriptor {
    SubagentDescriptor::new(SubagentRole::Metrics.name(), layout.otel_binary())
        .arg("--config")
        .arg(layout.otel_config())
        .arg(format!("--feature-gates={OTEL_FEATURE_GATES}"))
}

#[cfg(windows)]
fn metrics(layout: &PluginLayout) -> SubagentDescriptor {
    SubagentDescriptor::new(SubagentRole::Metrics.name(), layout.wrapper_binary())
        .arg("-config_path")
        .arg(layout.user_config())
        .arg("-log_path")
        .arg(layout.metrics_module_log())
        .arg(layout.otel_binary())
        .arg("--config")
        .arg(layout.otel_config())
}

fn logging(layout: &PluginLayout) -> SubagentDescriptor {
    SubagentDescriptor::new(SubagentRole::Logging.name(), layout.wrapper_binary())
        .arg("-config_path")
        .arg(layout.user_config())
        .arg("-log_path")
        .arg(layout.logging_module_log())
        .arg(layout.fluent_bit_binary())
        .arg("--config")
        .arg(layout.fluent_bit_main_config())
        .arg("--parser")
        .arg(layout.fluent_bit_parser_config())
        .arg("--storage_path")
        .arg(layout.fluent_bit_buffers_dir())
}

/// One descriptor per role, in [`SubagentRole::ALL`] order.
pub fn descriptors(layout: &PluginLayout) -> Vec<SubagentDescriptor> {
    SubagentRole::ALL
        .iter()
        .map(|role| role.descriptor(layout))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout() -> PluginLayout {
        PluginLayout::new("/opt/hostagent", "/var/lib/state", "/etc/hostagent/config.yaml")
    }

    #[test]
    fn one_descriptor_per_role() {
        let ds = descriptors(&layout());
        assert_eq!(ds.len(), 3);
        let names: Vec<_> = ds.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, ["metrics", "logging", "diagnostics"]);
    }

    #[test]
    fn all_executables_under_install_dir() {
        for d in descriptors(&layout()) {
            assert!(d.executable.starts_with("/opt/hostagent"), "{d:?}");
        }
    }

    #[cfg(not(windows))]
    #[test]
    fn linux_templates() {
        let l = layout();
        assert_eq!(
            SubagentRole::Metrics.descriptor(&l).command_line(),
            "/opt/hostagent/subagents/opentelemetry-collector/otelopscol --config \
             /var/lib/state/run/hostagent-opentelemetry-collector/otel.yaml \
             --feature-gates=receiver.prometheusreceiver.RemoveStartTimeAdjustment"
        );
        assert_eq!(
            SubagentRole::Logging.descriptor(&l).command_line(),
            "/opt/hostagent/libexec/hostagent-wrapper \
             -config_path /etc/hostagent/config.yaml \
             -log_path /var/lib/state/log/hostagent/subagents/logging-module.log \
             /opt/hostagent/subagents/fluent-bit/bin/fluent-bit \
             --config /var/lib/state/run/hostagent-fluent-bit/fluent_bit_main.conf \
             --parser /var/lib/state/run/hostagent-fluent-bit/fluent_bit_parser.conf \
             --storage_path /var/lib/state/state/fluent-bit/buffers"
        );
        assert_eq!(
            SubagentRole::Diagnostics.descriptor(&l).command_line(),
            "/opt/hostagent/libexec/hostagent-diagnostics -config /etc/hostagent/config.yaml"
        );
    }
}
