//! Shared fixtures: a throwaway install tree whose binaries are shell scripts.

#![allow(dead_code, clippy::unwrap_used)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use hostagent_core::config::Config;
use hostagent_core::PluginLayout;
use hostagent_plugin::preflight::{ConflictDetector, Preflight, PreflightError};
use hostagent_plugin::runner::{CommandRunner, ProcessRunner};
use hostagent_plugin::LifecycleService;

/// A subagent that records its pid and runs until killed.
pub const LONG_RUNNING: &str = "exec sleep 60";

/// Reports no conflicting installations without asking systemd.
pub struct NoConflicts;

#[async_trait]
impl ConflictDetector for NoConflicts {
    async fn find_preexisting(
        &self,
        _services: &[String],
        _scope: &CancellationToken,
    ) -> Result<Vec<String>, PreflightError> {
        Ok(Vec::new())
    }
}

/// Temp install and state directories for one test.
pub struct Fixture {
    pub dir: tempfile::TempDir,
    pub layout: PluginLayout,
}

impl Fixture {
    /// Every subagent runs `subagent_body`; the engine exits with `engine_exit`.
    pub fn new(subagent_body: &str, engine_exit: i32) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let layout = PluginLayout::new(
            dir.path().join("install"),
            dir.path().join("state"),
            dir.path().join("etc/config.yaml"),
        );
        let fixture = Self { dir, layout };
        std::fs::create_dir_all(fixture.pid_dir()).unwrap();

        fixture.script(
            &fixture.layout.engine_binary(),
            &format!(
                "echo \"$*\" >> \"{}\"\nexit {engine_exit}",
                fixture.engine_log().display()
            ),
        );
        for (name, exe) in [
            ("otelopscol", fixture.layout.otel_binary()),
            ("wrapper", fixture.layout.wrapper_binary()),
            ("diagnostics", fixture.layout.diagnostics_binary()),
            ("fluent-bit", fixture.layout.fluent_bit_binary()),
        ] {
            fixture.subagent(name, &exe, subagent_body);
        }
        fixture
    }

    /// One line of arguments per engine invocation.
    pub fn engine_log(&self) -> PathBuf {
        self.dir.path().join("engine.log")
    }

    pub fn engine_calls(&self) -> Vec<String> {
        std::fs::read_to_string(self.engine_log())
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }

    pub fn pid_dir(&self) -> PathBuf {
        self.dir.path().join("pids")
    }

    /// Replace one subagent's script body.
    pub fn subagent(&self, name: &str, exe: &Path, body: &str) {
        let pid_file = self.pid_dir().join(format!("{name}.pid"));
        self.script(
            exe,
            &format!("echo $$ > \"{}\"\n{body}", pid_file.display()),
        );
    }

    fn script(&self, path: &Path, body: &str) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).unwrap();
    }

    pub fn config(&self) -> Config {
        let mut config = Config::default();
        config.supervisor.max_consecutive_failures = 3;
        config.supervisor.restart_backoff_ms = 50;
        config.paths.install_dir = Some(self.layout.install_dir().to_path_buf());
        config.paths.default_state_dir = self.layout.state_dir().to_path_buf();
        config.paths.user_config_path = self.layout.user_config().to_path_buf();
        config
    }

    /// Service running real processes, with systemd conflict checks stubbed.
    pub fn service(&self) -> LifecycleService {
        let runner: Arc<dyn CommandRunner> =
            Arc::new(ProcessRunner::new().with_terminate_timeout(Duration::from_secs(2)));
        let preflight = Preflight::command_backed(Arc::clone(&runner))
            .with_conflict_detector(Arc::new(NoConflicts));
        LifecycleService::with_preflight(&self.config(), runner, preflight)
    }

    /// Pid recorded by subagent `name`, once it has started.
    pub fn pid(&self, name: &str) -> Option<u32> {
        std::fs::read_to_string(self.pid_dir().join(format!("{name}.pid")))
            .ok()
            .and_then(|s| s.trim().parse().ok())
    }
}

/// Poll `check` until it holds or `timeout` elapses.
pub async fn eventually<F, Fut>(timeout: Duration, check: F) -> bool
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    tokio::time::timeout(timeout, async {
        while !check().await {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .is_ok()
}

#[cfg(target_os = "linux")]
pub fn process_alive(pid: u32) -> bool {
    // Zombies still have a /proc entry; treat them as gone.
    std::fs::read_to_string(format!("/proc/{pid}/stat"))
        .is_ok_and(|stat| !stat.contains(") Z "))
}
