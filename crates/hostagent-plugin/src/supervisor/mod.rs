//! Subagent group supervision.
//!
//! A [`SubagentGroup`] runs every subagent of one plugin run under the restart
//! policy, all sharing one cancellation scope. The first subagent to give up
//! records its error through the [`RunReporter`] and cancels the scope, which
//! brings its siblings down. The group returns only after every subagent task
//! has been joined.

pub mod roles;

use std::sync::Arc;

use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::lifecycle::{PluginError, RunReporter};
use crate::policy::{RestartPolicy, UnitExit, supervise};
use crate::runner::{CommandRunner, SubagentDescriptor};

pub use roles::{SubagentRole, descriptors};

/// The subagents of one run.
pub struct SubagentGroup {
    runner: Arc<dyn CommandRunner>,
    policy: RestartPolicy,
    descriptors: Vec<SubagentDescriptor>,
}

impl SubagentGroup {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        policy: RestartPolicy,
        descriptors: Vec<SubagentDescriptor>,
    ) -> Self {
        Self {
            runner,
            policy,
            descriptors,
        }
    }

    /// Spawn the coordinator task on `tasks` and return immediately.
    pub fn launch(
        self,
        tasks: &TaskTracker,
        scope: CancellationToken,
        reporter: RunReporter,
    ) -> JoinHandle<()> {
        tasks.spawn(self.run(scope, reporter))
    }

    /// Supervise all subagents until the scope is canceled or one of them
    /// gives up.
    pub async fn run(self, scope: CancellationToken, reporter: RunReporter) {
        let generation = reporter.generation();
        info!(
            generation,
            subagents = self.descriptors.len(),
            "Starting subagent group"
        );

        let mut units = JoinSet::new();
        for descriptor in self.descriptors {
            let runner = Arc::clone(&self.runner);
            let policy = self.policy;
            let unit_scope = scope.child_token();
            units.spawn(async move {
                let exit = supervise(&descriptor, runner.as_ref(), &policy, &unit_scope).await;
                (descriptor.name, exit)
            });
        }

        while let Some(joined) = units.join_next().await {
            match joined {
                Ok((name, UnitExit::Canceled)) => {
                    debug!(generation, subagent = %name, "Subagent stopped");
                }
                Ok((name, UnitExit::Terminal(err))) => {
                    warn!(generation, subagent = %name, "Subagent failed, stopping group");
                    if !reporter.fail(err).await {
                        debug!(generation, subagent = %name, "Run already ended, error dropped");
                    }
                    scope.cancel();
                }
                Err(e) => {
                    error!(generation, error = %e, "Subagent task panicked, stopping group");
                    reporter
                        .fail(PluginError::restartable(format!(
                            "subagent supervision task failed: {e}"
                        )))
                        .await;
                    scope.cancel();
                }
            }
        }

        reporter.finished().await;
        info!(generation, "Subagent group exited");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use std::time::Duration;

    use hostagent_core::PluginLayout;

    use super::*;
    use crate::lifecycle::{LifecycleHandle, LifecycleState};
    use crate::runner::fake::{FakeRunner, Scripted};

    const FAST: Duration = Duration::from_millis(5);

    fn layout() -> PluginLayout {
        PluginLayout::new("/opt/hostagent", "/var/lib/state", "/etc/hostagent/config.yaml")
    }

    async fn wait_until<F: Fn() -> bool>(cond: F) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !cond() {
                tokio::time::sleep(FAST).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn failing_sibling_cancels_the_others() {
        let runner = FakeRunner::new(|d, _| {
            if d.name == "diagnostics" {
                Scripted::Fail("exit 1".into())
            } else {
                Scripted::RunUntilCanceled
            }
        });
        let handle = LifecycleHandle::shared();
        let ticket = handle.lock().await.begin(layout()).unwrap();
        let group = SubagentGroup::new(
            Arc::new(runner.clone()),
            RestartPolicy::new(3, FAST),
            descriptors(&layout()),
        );

        let reporter = RunReporter::new(Arc::clone(&handle), ticket.generation);
        tokio::time::timeout(Duration::from_secs(5), group.run(ticket.scope.clone(), reporter))
            .await
            .unwrap();

        assert!(ticket.scope.is_cancelled());
        assert_eq!(runner.launches("diagnostics"), 3);
        assert_eq!(runner.cancellations("metrics"), 1);
        assert_eq!(runner.cancellations("logging"), 1);
        match handle.lock().await.state() {
            LifecycleState::Failed(err) => assert!(err.should_restart),
            other => panic!("unexpected state {other:?}"),
        }
    }

    #[tokio::test]
    async fn signal_terminates_group_without_restart() {
        let runner = FakeRunner::new(|d, _| {
            if d.name == "metrics" {
                Scripted::Signal
            } else {
                Scripted::RunUntilCanceled
            }
        });
        let handle = LifecycleHandle::shared();
        let ticket = handle.lock().await.begin(layout()).unwrap();
        let group = SubagentGroup::new(
            Arc::new(runner.clone()),
            RestartPolicy::new(10, FAST),
            descriptors(&layout()),
        );
        group
            .run(
                ticket.scope.clone(),
                RunReporter::new(Arc::clone(&handle), ticket.generation),
            )
            .await;

        assert_eq!(runner.launches("metrics"), 1);
        match handle.lock().await.state() {
            LifecycleState::Failed(err) => assert!(!err.should_restart),
            other => panic!("unexpected state {other:?}"),
        }
    }

    #[tokio::test]
    async fn external_cancel_records_nothing() {
        let runner = FakeRunner::new(|_, _| Scripted::RunUntilCanceled);
        let handle = LifecycleHandle::shared();
        let ticket = handle.lock().await.begin(layout()).unwrap();
        let group = SubagentGroup::new(
            Arc::new(runner.clone()),
            RestartPolicy::new(3, FAST),
            descriptors(&layout()),
        );
        let tasks = TaskTracker::new();
        let task = group.launch(
            &tasks,
            ticket.scope.clone(),
            RunReporter::new(Arc::clone(&handle), ticket.generation),
        );

        let observer = runner.clone();
        wait_until(move || observer.total_launches() == 3).await;
        handle.lock().await.stop();
        task.await.unwrap();

        assert_eq!(handle.lock().await.state(), LifecycleState::Stopped);
        assert_eq!(runner.total_launches(), 3);
    }
}
