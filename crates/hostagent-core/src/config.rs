//! Configuration resolution for hostagent.
//!
//! Implements layered config resolution:
//! 1. Built-in defaults
//! 2. Settings file (JSON, passed with `--settings`)
//! 3. Environment variables (`HOSTAGENT_*`)

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::layout;

/// Complete plugin configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub supervisor: SupervisorConfig,
    #[serde(default)]
    pub paths: PathsConfig,
}

/// Restart behaviour of supervised subagents.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Consecutive abnormal exits tolerated before the run is declared failed.
    pub max_consecutive_failures: u32,
    /// Fixed delay between a subagent exit and its relaunch (milliseconds).
    pub restart_backoff_ms: u64,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            max_consecutive_failures: 3,
            restart_backoff_ms: 5_000,
        }
    }
}

impl SupervisorConfig {
    /// Backoff interval as a `Duration`.
    pub const fn restart_backoff(&self) -> Duration {
        Duration::from_millis(self.restart_backoff_ms)
    }
}

/// Filesystem locations the plugin works with.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Unified user configuration consumed by the config engine.
    pub user_config_path: PathBuf,
    /// State directory used when the Start request does not name one.
    pub default_state_dir: PathBuf,
    /// Install directory override. When unset the directory of the running
    /// executable is used.
    pub install_dir: Option<PathBuf>,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            user_config_path: layout::default_user_config_path(),
            default_state_dir: layout::default_state_dir(),
            install_dir: None,
        }
    }
}

/// Load configuration with layered resolution.
pub fn load_config(settings_file: Option<&Path>) -> Result<Config> {
    let mut config = match settings_file {
        Some(path) => load_config_file(path)?,
        None => Config::default(),
    };

    apply_env_overrides(&mut config);
    validate(&config)?;

    Ok(config)
}

fn load_config_file(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read settings file {}: {}", path.display(), e))
    })?;
    serde_json::from_str(&content).map_err(|e| {
        Error::Config(format!("Failed to parse settings file {}: {}", path.display(), e))
    })
}

fn apply_env_overrides(config: &mut Config) {
    if let Ok(val) = std::env::var("HOSTAGENT_MAX_CONSECUTIVE_FAILURES") {
        if let Ok(n) = val.parse() {
            config.supervisor.max_consecutive_failures = n;
        }
    }
    if let Ok(val) = std::env::var("HOSTAGENT_RESTART_BACKOFF_MS") {
        if let Ok(n) = val.parse() {
            config.supervisor.restart_backoff_ms = n;
        }
    }
    if let Ok(val) = std::env::var("HOSTAGENT_USER_CONFIG") {
        config.paths.user_config_path = PathBuf::from(val);
    }
    if let Ok(val) = std::env::var("HOSTAGENT_STATE_DIR") {
        config.paths.default_state_dir = PathBuf::from(val);
    }
    if let Ok(val) = std::env::var("HOSTAGENT_INSTALL_DIR") {
        config.paths.install_dir = Some(PathBuf::from(val));
    }
}

fn validate(config: &Config) -> Result<()> {
    if config.supervisor.max_consecutive_failures == 0 {
        return Err(Error::Config(
            "supervisor.max_consecutive_failures must be at least 1".to_string(),
        ));
    }
    Ok(())
}
