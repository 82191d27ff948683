//! Ties subagent lifetime to the plugin process.
//!
//! Subagents must not outlive the plugin, even when the plugin is killed
//! without a chance to cancel them. Each platform gets the strongest guarantee
//! it offers without extra dependencies.

use std::sync::Arc;

use tokio::process::Command;

/// Platform hook applied to every command before it is spawned.
pub trait ProcessIsolation: Send + Sync {
    fn isolate(&self, cmd: &mut Command);

    /// Strategy name for startup logging.
    fn name(&self) -> &'static str;
}

/// The isolation strategy for the current platform.
pub fn platform_isolation() -> Arc<dyn ProcessIsolation> {
    #[cfg(target_os = "linux")]
    {
        Arc::new(ParentDeathSignal)
    }
    #[cfg(all(unix, not(target_os = "linux")))]
    {
        Arc::new(OwnProcessGroup)
    }
    #[cfg(not(unix))]
    {
        Arc::new(KillOnDrop)
    }
}

/// Linux: the kernel sends SIGKILL to the child when the parent dies.
///
/// The signal fires when the spawning *thread* exits. Tokio worker threads
/// live as long as the runtime, so in practice this is the plugin process.
#[cfg(target_os = "linux")]
#[derive(Debug, Default, Clone, Copy)]
pub struct ParentDeathSignal;

#[cfg(target_os = "linux")]
impl ProcessIsolation for ParentDeathSignal {
    #[allow(unsafe_code, clippy::cast_sign_loss)]
    fn isolate(&self, cmd: &mut Command) {
        let parent = std::process::id();
        // SAFETY: the closure runs between fork and exec and only calls
        // async-signal-safe functions (prctl, getppid).
        unsafe {
            cmd.pre_exec(move || {
                if libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGKILL as libc::c_ulong) != 0 {
                    return Err(std::io::Error::last_os_error());
                }
                // The parent may have exited before prctl took effect.
                if libc::getppid() as u32 != parent {
                    return Err(std::io::Error::other("parent exited before exec"));
                }
                Ok(())
            });
        }
    }

    fn name(&self) -> &'static str {
        "parent-death-signal"
    }
}

/// Other Unix: run the child in its own process group so terminal signals
/// aimed at the plugin do not reach it twice, and kill it when the handle drops.
#[cfg(all(unix, not(target_os = "linux")))]
#[derive(Debug, Default, Clone, Copy)]
pub struct OwnProcessGroup;

#[cfg(all(unix, not(target_os = "linux")))]
impl ProcessIsolation for OwnProcessGroup {
    fn isolate(&self, cmd: &mut Command) {
        cmd.process_group(0).kill_on_drop(true);
    }

    fn name(&self) -> &'static str {
        "process-group"
    }
}

/// Fallback: kill the child when its handle is dropped.
#[cfg(not(unix))]
#[derive(Debug, Default, Clone, Copy)]
pub struct KillOnDrop;

#[cfg(not(unix))]
impl ProcessIsolation for KillOnDrop {
    fn isolate(&self, cmd: &mut Command) {
        cmd.kill_on_drop(true);
    }

    fn name(&self) -> &'static str {
        "kill-on-drop"
    }
}
