//! Restart policy for a single subagent.
//!
//! Every exit other than a cancellation or a signal is followed by a fixed
//! backoff and a relaunch. Abnormal exits draw from a retry budget that a
//! clean exit restores; once it is spent the subagent gives up with a
//! restartable [`PluginError`]. A signal kill ends the subagent at once with
//! a non-restartable one.

use std::time::Duration;

use hostagent_core::config::SupervisorConfig;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::lifecycle::PluginError;
use crate::runner::{CommandRunner, RunOutcome, SubagentDescriptor, TerminationKind};

/// Restart parameters shared by all subagents of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestartPolicy {
    max_consecutive_failures: u32,
    backoff: Duration,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(5))
    }
}

impl RestartPolicy {
    /// A ceiling below one is raised to one.
    pub fn new(max_consecutive_failures: u32, backoff: Duration) -> Self {
        Self {
            max_consecutive_failures: max_consecutive_failures.max(1),
            backoff,
        }
    }

    pub fn from_config(config: &SupervisorConfig) -> Self {
        Self::new(config.max_consecutive_failures, config.restart_backoff())
    }

    pub const fn max_consecutive_failures(&self) -> u32 {
        self.max_consecutive_failures
    }

    pub const fn backoff(&self) -> Duration {
        self.backoff
    }

    /// Fresh budget for one subagent.
    pub const fn budget(&self) -> RetryBudget {
        RetryBudget {
            failures: 0,
            ceiling: self.max_consecutive_failures,
        }
    }

    /// Decide what happens after `outcome`.
    pub fn decide(&self, outcome: &RunOutcome, budget: &mut RetryBudget) -> Decision {
        match outcome.kind {
            TerminationKind::CanceledByContext => Decision::Exit,
            TerminationKind::TerminatedBySignal => Decision::Terminate {
                should_restart: false,
            },
            TerminationKind::ExitedOk => {
                budget.reset();
                Decision::Relaunch {
                    delay: self.backoff,
                }
            }
            TerminationKind::ExitedError => {
                if budget.record_failure() {
                    Decision::Terminate {
                        should_restart: true,
                    }
                } else {
                    Decision::Relaunch {
                        delay: self.backoff,
                    }
                }
            }
        }
    }
}

/// Abnormal exits observed for one subagent in one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryBudget {
    failures: u32,
    ceiling: u32,
}

impl RetryBudget {
    /// Count one failure; returns `true` when the budget is exhausted.
    pub const fn record_failure(&mut self) -> bool {
        self.failures = self.failures.saturating_add(1);
        self.failures >= self.ceiling
    }

    /// A clean exit restores the full budget.
    pub const fn reset(&mut self) {
        self.failures = 0;
    }

    pub const fn failures(&self) -> u32 {
        self.failures
    }

    pub const fn remaining(&self) -> u32 {
        self.ceiling.saturating_sub(self.failures)
    }
}

/// Next step after an execution attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Relaunch { delay: Duration },
    Terminate { should_restart: bool },
    Exit,
}

/// How a supervised subagent stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitExit {
    /// Its scope was canceled.
    Canceled,
    /// It gave up; the whole group must be terminated.
    Terminal(PluginError),
}

/// Run `descriptor` under `policy` until canceled or terminally failed.
///
/// Each attempt gets a fresh child of `scope`, so canceling `scope` reaches
/// the running process as well as a pending backoff.
pub async fn supervise(
    descriptor: &SubagentDescriptor,
    runner: &dyn CommandRunner,
    policy: &RestartPolicy,
    scope: &CancellationToken,
) -> UnitExit {
    let name = descriptor.name.as_str();
    let mut budget = policy.budget();
    let mut attempt: u64 = 0;

    loop {
        if scope.is_cancelled() {
            debug!(subagent = name, "Scope canceled, not launching");
            return UnitExit::Canceled;
        }
        attempt += 1;
        debug!(subagent = name, attempt, "Launching subagent");

        let outcome = runner.run(descriptor, scope.child_token()).await;
        match policy.decide(&outcome, &mut budget) {
            Decision::Exit => {
                info!(subagent = name, "Subagent canceled");
                return UnitExit::Canceled;
            }
            Decision::Terminate { should_restart } => {
                let error = terminal_error(descriptor, &outcome, &budget, should_restart);
                warn!(
                    subagent = name,
                    attempt,
                    should_restart,
                    error = %error.message,
                    "Subagent will not be restarted"
                );
                return UnitExit::Terminal(error);
            }
            Decision::Relaunch { delay } => {
                if outcome.is_success() {
                    info!(subagent = name, ?delay, "Subagent exited cleanly, relaunching");
                } else {
                    warn!(
                        subagent = name,
                        error = %outcome.error_text(),
                        output = %outcome.output.trim_end(),
                        remaining = budget.remaining(),
                        ?delay,
                        "Subagent failed, relaunching"
                    );
                }
                tokio::select! {
                    () = tokio::time::sleep(delay) => {}
                    () = scope.cancelled() => {
                        debug!(subagent = name, "Scope canceled during backoff");
                        return UnitExit::Canceled;
                    }
                }
            }
        }
    }
}

fn terminal_error(
    descriptor: &SubagentDescriptor,
    outcome: &RunOutcome,
    budget: &RetryBudget,
    should_restart: bool,
) -> PluginError {
    let message = if should_restart {
        format!(
            "{} exited with errors {} consecutive times, last error: {}. Command output: {}",
            descriptor.command_line(),
            budget.failures(),
            outcome.error_text(),
            outcome.output.trim_end()
        )
    } else {
        format!(
            "{} was {}. Command output: {}",
            descriptor.command_line(),
            outcome.error_text(),
            outcome.output.trim_end()
        )
    };
    PluginError {
        message,
        should_restart,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::runner::RunError;
    use crate::runner::fake::{FakeRunner, Scripted};

    const FAST: Duration = Duration::from_millis(5);

    fn descriptor() -> SubagentDescriptor {
        SubagentDescriptor::new("metrics", "/opt/hostagent/otelopscol")
    }

    #[test]
    fn ceiling_is_at_least_one() {
        assert_eq!(RestartPolicy::new(0, FAST).max_consecutive_failures(), 1);
    }

    #[test]
    fn decide_per_termination_kind() {
        let policy = RestartPolicy::new(3, FAST);
        let mut budget = policy.budget();

        assert_eq!(
            policy.decide(&RunOutcome::canceled(""), &mut budget),
            Decision::Exit
        );
        assert_eq!(
            policy.decide(&RunOutcome::signaled("", Some(9)), &mut budget),
            Decision::Terminate {
                should_restart: false
            }
        );
        assert_eq!(
            policy.decide(&RunOutcome::ok(""), &mut budget),
            Decision::Relaunch { delay: FAST }
        );
        assert_eq!(budget.failures(), 0);
    }

    #[test]
    fn budget_exhausts_on_nth_failure() {
        let policy = RestartPolicy::new(3, FAST);
        let mut budget = policy.budget();
        let fail = RunOutcome::failed("", RunError::ExitCode(1));

        assert!(matches!(policy.decide(&fail, &mut budget), Decision::Relaunch { .. }));
        assert!(matches!(policy.decide(&fail, &mut budget), Decision::Relaunch { .. }));
        assert_eq!(
            policy.decide(&fail, &mut budget),
            Decision::Terminate {
                should_restart: true
            }
        );
    }

    #[test]
    fn clean_exits_do_not_draw_budget() {
        let policy = RestartPolicy::new(1, FAST);
        let mut budget = policy.budget();
        for _ in 0..10 {
            policy.decide(&RunOutcome::ok(""), &mut budget);
        }
        assert_eq!(budget.remaining(), 1);
    }

    #[test]
    fn clean_exit_restores_budget() {
        let policy = RestartPolicy::new(2, FAST);
        let mut budget = policy.budget();
        let fail = RunOutcome::failed("", RunError::ExitCode(1));

        policy.decide(&fail, &mut budget);
        assert_eq!(budget.remaining(), 1);
        policy.decide(&RunOutcome::ok(""), &mut budget);
        assert_eq!(budget.remaining(), 2);
        assert!(matches!(policy.decide(&fail, &mut budget), Decision::Relaunch { .. }));
    }

    #[tokio::test]
    async fn failing_subagent_launches_exactly_ceiling_times() {
        let runner = FakeRunner::new(|_, _| Scripted::Fail("crash".into()));
        let policy = RestartPolicy::new(3, FAST);
        let exit = supervise(&descriptor(), &runner, &policy, &CancellationToken::new()).await;

        assert_eq!(runner.launches("metrics"), 3);
        match exit {
            UnitExit::Terminal(err) => {
                assert!(err.should_restart);
                assert!(err.message.contains("crash"));
                assert!(err.message.contains("3 consecutive times"));
            }
            UnitExit::Canceled => panic!("expected terminal exit"),
        }
    }

    #[tokio::test]
    async fn signal_is_not_retried() {
        let runner = FakeRunner::new(|_, _| Scripted::Signal);
        let policy = RestartPolicy::new(5, FAST);
        let exit = supervise(&descriptor(), &runner, &policy, &CancellationToken::new()).await;

        assert_eq!(runner.launches("metrics"), 1);
        assert!(matches!(exit, UnitExit::Terminal(ref e) if !e.should_restart));
    }

    #[tokio::test]
    async fn clean_exit_loops_until_canceled() {
        let runner = FakeRunner::succeeding();
        let policy = RestartPolicy::new(1, FAST);
        let scope = CancellationToken::new();
        let cancel = scope.clone();
        let observer = runner.clone();
        tokio::spawn(async move {
            while observer.launches("metrics") < 5 {
                tokio::time::sleep(FAST).await;
            }
            cancel.cancel();
        });

        let exit = supervise(&descriptor(), &runner, &policy, &scope).await;
        assert_eq!(exit, UnitExit::Canceled);
        assert!(runner.launches("metrics") >= 5);
    }

    #[tokio::test]
    async fn cancel_during_backoff_exits_promptly() {
        let runner = FakeRunner::new(|_, _| Scripted::Fail(String::new()));
        let policy = RestartPolicy::new(10, Duration::from_secs(60));
        let scope = CancellationToken::new();
        let cancel = scope.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel.cancel();
        });

        let exit = tokio::time::timeout(
            Duration::from_secs(5),
            supervise(&descriptor(), &runner, &policy, &scope),
        )
        .await
        .unwrap();
        assert_eq!(exit, UnitExit::Canceled);
        assert_eq!(runner.launches("metrics"), 1);
    }

    #[tokio::test]
    async fn canceled_scope_never_launches() {
        let runner = FakeRunner::succeeding();
        let scope = CancellationToken::new();
        scope.cancel();
        let exit = supervise(&descriptor(), &runner, &RestartPolicy::default(), &scope).await;
        assert_eq!(exit, UnitExit::Canceled);
        assert_eq!(runner.total_launches(), 0);
    }

    #[tokio::test]
    async fn recovery_after_failures_keeps_running() {
        // Two failures then healthy runs: a ceiling of 3 is never reached.
        let runner = FakeRunner::new(|_, n| {
            if n <= 2 {
                Scripted::Fail(String::new())
            } else {
                Scripted::RunUntilCanceled
            }
        });
        let policy = RestartPolicy::new(3, FAST);
        let scope = CancellationToken::new();
        let cancel = scope.clone();
        let observer = runner.clone();
        tokio::spawn(async move {
            while observer.launches("metrics") < 3 {
                tokio::time::sleep(FAST).await;
            }
            cancel.cancel();
        });

        let exit = supervise(&descriptor(), &runner, &policy, &scope).await;
        assert_eq!(exit, UnitExit::Canceled);
        assert_eq!(runner.cancellations("metrics"), 1);
    }
}
