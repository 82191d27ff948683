//! Scripted in-memory runner for tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::{CommandRunner, RunError, RunOutcome, SubagentDescriptor};

/// What a scripted run does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scripted {
    /// Exit 0 with this output.
    Succeed(String),
    /// Exit 1 with this output.
    Fail(String),
    /// Die from SIGKILL.
    Signal,
    /// Block until the scope is canceled.
    RunUntilCanceled,
}

type Script = dyn Fn(&SubagentDescriptor, u32) -> Scripted + Send + Sync;

#[derive(Debug, Default)]
struct Counters {
    launches: HashMap<String, u32>,
    cancellations: HashMap<String, u32>,
}

/// [`CommandRunner`] whose behaviour is decided by a closure receiving the
/// descriptor and the 1-based launch number for that descriptor name.
///
/// Counters are keyed by [`SubagentDescriptor::name`].
#[derive(Clone)]
pub struct FakeRunner {
    script: Arc<Script>,
    counters: Arc<Mutex<Counters>>,
}

impl FakeRunner {
    pub fn new<F>(script: F) -> Self
    where
        F: Fn(&SubagentDescriptor, u32) -> Scripted + Send + Sync + 'static,
    {
        Self {
            script: Arc::new(script),
            counters: Arc::new(Mutex::new(Counters::default())),
        }
    }

    /// Every command succeeds immediately with empty output.
    pub fn succeeding() -> Self {
        Self::new(|_, _| Scripted::Succeed(String::new()))
    }

    /// Launches recorded for descriptors named `name`.
    pub fn launches(&self, name: &str) -> u32 {
        self.counters()
            .launches
            .get(name)
            .copied()
            .unwrap_or_default()
    }

    /// Runs of `name` that ended because their scope was canceled.
    pub fn cancellations(&self, name: &str) -> u32 {
        self.counters()
            .cancellations
            .get(name)
            .copied()
            .unwrap_or_default()
    }

    pub fn total_launches(&self) -> u32 {
        self.counters().launches.values().sum()
    }

    fn counters(&self) -> std::sync::MutexGuard<'_, Counters> {
        self.counters.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl CommandRunner for FakeRunner {
    async fn run(&self, descriptor: &SubagentDescriptor, scope: CancellationToken) -> RunOutcome {
        let name = descriptor.name.clone();
        if scope.is_cancelled() {
            return RunOutcome::canceled("");
        }
        let attempt = {
            let mut counters = self.counters();
            let n = counters.launches.entry(name.clone()).or_default();
            *n += 1;
            *n
        };
        match (self.script)(descriptor, attempt) {
            Scripted::Succeed(output) => RunOutcome::ok(output),
            Scripted::Fail(output) => RunOutcome::failed(output, RunError::ExitCode(1)),
            Scripted::Signal => RunOutcome::signaled("", Some(9)),
            Scripted::RunUntilCanceled => {
                scope.cancelled().await;
                *self.counters().cancellations.entry(name).or_default() += 1;
                RunOutcome::canceled("")
            }
        }
    }
}
