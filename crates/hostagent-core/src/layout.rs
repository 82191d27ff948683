//! Well-known install and state directory layout.
//!
//! Every path the plugin hands to the config engine or to a subagent is
//! derived here from two roots: the install directory (where the plugin and
//! its subagent binaries live) and the state directory (handed over by the
//! plugin manager, holding generated configs, logs and buffers).

use std::path::{Path, PathBuf};

#[cfg(not(windows))]
mod consts {
    pub const ENGINE_BINARY: &str = "libexec/hostagent-engine";
    pub const WRAPPER_BINARY: &str = "libexec/hostagent-wrapper";
    pub const DIAGNOSTICS_BINARY: &str = "libexec/hostagent-diagnostics";
    pub const FLUENT_BIT_BINARY: &str = "subagents/fluent-bit/bin/fluent-bit";
    pub const OTEL_BINARY: &str = "subagents/opentelemetry-collector/otelopscol";

    pub const LOGS_DIR: &str = "log/hostagent";
    pub const FLUENT_BIT_STATE_DIR: &str = "state/fluent-bit";
    pub const FLUENT_BIT_RUNTIME_DIR: &str = "run/hostagent-fluent-bit";
    pub const OTEL_STATE_DIR: &str = "state/opentelemetry-collector";
    pub const OTEL_RUNTIME_DIR: &str = "run/hostagent-opentelemetry-collector";
}

#[cfg(windows)]
mod consts {
    pub const ENGINE_BINARY: &str = "hostagent-engine.exe";
    pub const WRAPPER_BINARY: &str = "hostagent-wrapper.exe";
    pub const DIAGNOSTICS_BINARY: &str = "hostagent-diagnostics.exe";
    pub const FLUENT_BIT_BINARY: &str = "fluent-bit.exe";
    pub const OTEL_BINARY: &str = "hostagent-metrics-agent.exe";

    pub const LOGS_DIR: &str = "log";
    pub const FLUENT_BIT_STATE_DIR: &str = "run";
    pub const FLUENT_BIT_RUNTIME_DIR: &str = "generated_configs/fluentbit";
    pub const OTEL_STATE_DIR: &str = "run";
    pub const OTEL_RUNTIME_DIR: &str = "generated_configs/otel";
}

pub use consts::*;

/// Default unified user configuration path.
pub fn default_user_config_path() -> PathBuf {
    #[cfg(windows)]
    {
        program_data().join("hostagent/config/config.yaml")
    }
    #[cfg(not(windows))]
    {
        PathBuf::from("/etc/hostagent/config.yaml")
    }
}

/// Default plugin state directory when the plugin manager supplies none.
pub fn default_state_dir() -> PathBuf {
    #[cfg(windows)]
    {
        program_data().join("hostagent/plugin-state")
    }
    #[cfg(not(windows))]
    {
        PathBuf::from("/var/lib/hostagent/plugin-state")
    }
}

#[cfg(windows)]
fn program_data() -> PathBuf {
    std::env::var("PROGRAMDATA").map_or_else(|_| PathBuf::from(r"C:\ProgramData"), PathBuf::from)
}

/// Resolved directory roots for one plugin run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginLayout {
    install_dir: PathBuf,
    state_dir: PathBuf,
    user_config: PathBuf,
}

impl PluginLayout {
    pub fn new(
        install_dir: impl Into<PathBuf>,
        state_dir: impl Into<PathBuf>,
        user_config: impl Into<PathBuf>,
    ) -> Self {
        Self {
            install_dir: install_dir.into(),
            state_dir: state_dir.into(),
            user_config: user_config.into(),
        }
    }

    pub fn install_dir(&self) -> &Path {
        &self.install_dir
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    pub fn user_config(&self) -> &Path {
        &self.user_config
    }

    pub fn engine_binary(&self) -> PathBuf {
        self.install_dir.join(ENGINE_BINARY)
    }

    pub fn wrapper_binary(&self) -> PathBuf {
        self.install_dir.join(WRAPPER_BINARY)
    }

    pub fn diagnostics_binary(&self) -> PathBuf {
        self.install_dir.join(DIAGNOSTICS_BINARY)
    }

    pub fn fluent_bit_binary(&self) -> PathBuf {
        self.install_dir.join(FLUENT_BIT_BINARY)
    }

    pub fn otel_binary(&self) -> PathBuf {
        self.install_dir.join(OTEL_BINARY)
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.state_dir.join(LOGS_DIR)
    }

    pub fn fluent_bit_state_dir(&self) -> PathBuf {
        self.state_dir.join(FLUENT_BIT_STATE_DIR)
    }

    pub fn fluent_bit_runtime_dir(&self) -> PathBuf {
        self.state_dir.join(FLUENT_BIT_RUNTIME_DIR)
    }

    pub fn otel_state_dir(&self) -> PathBuf {
        self.state_dir.join(OTEL_STATE_DIR)
    }

    pub fn otel_runtime_dir(&self) -> PathBuf {
        self.state_dir.join(OTEL_RUNTIME_DIR)
    }

    pub fn otel_config(&self) -> PathBuf {
        self.otel_runtime_dir().join("otel.yaml")
    }

    pub fn fluent_bit_main_config(&self) -> PathBuf {
        self.fluent_bit_runtime_dir().join("fluent_bit_main.conf")
    }

    pub fn fluent_bit_parser_config(&self) -> PathBuf {
        self.fluent_bit_runtime_dir().join("fluent_bit_parser.conf")
    }

    pub fn fluent_bit_buffers_dir(&self) -> PathBuf {
        self.fluent_bit_state_dir().join("buffers")
    }

    pub fn logging_module_log(&self) -> PathBuf {
        self.logs_dir().join("subagents/logging-module.log")
    }

    pub fn metrics_module_log(&self) -> PathBuf {
        self.logs_dir().join("subagents/metrics-module.log")
    }

    /// Directories holding generated configs and runtime buffers.
    ///
    /// These are what a cleanup Stop removes; logs are kept.
    pub fn generated_dirs(&self) -> Vec<PathBuf> {
        let mut dirs = vec![
            self.otel_runtime_dir(),
            self.fluent_bit_runtime_dir(),
            self.otel_state_dir(),
            self.fluent_bit_state_dir(),
        ];
        dirs.sort();
        dirs.dedup();
        dirs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout() -> PluginLayout {
        PluginLayout::new("/opt/hostagent", "/var/lib/state", "/etc/hostagent/config.yaml")
    }

    #[test]
    fn binaries_live_under_install_dir() {
        let l = layout();
        assert!(l.engine_binary().starts_with("/opt/hostagent"));
        assert!(l.otel_binary().starts_with("/opt/hostagent"));
        assert!(l.fluent_bit_binary().starts_with("/opt/hostagent"));
    }

    #[test]
    fn generated_configs_live_under_state_dir() {
        let l = layout();
        assert!(l.otel_config().starts_with("/var/lib/state"));
        assert!(l.fluent_bit_main_config().starts_with("/var/lib/state"));
        assert!(l.fluent_bit_buffers_dir().starts_with("/var/lib/state"));
    }

    #[test]
    fn generated_dirs_exclude_logs() {
        let l = layout();
        let dirs = l.generated_dirs();
        assert!(!dirs.is_empty());
        assert!(dirs.iter().all(|d| d.starts_with(l.state_dir())));
        assert!(!dirs.contains(&l.logs_dir()));
    }

    #[cfg(not(windows))]
    #[test]
    fn linux_paths_match_engine_expectations() {
        let l = layout();
        assert_eq!(
            l.otel_config(),
            PathBuf::from("/var/lib/state/run/hostagent-opentelemetry-collector/otel.yaml")
        );
        assert_eq!(
            l.fluent_bit_buffers_dir(),
            PathBuf::from("/var/lib/state/state/fluent-bit/buffers")
        );
    }
}
