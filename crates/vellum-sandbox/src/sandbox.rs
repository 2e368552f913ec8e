//! Isolation primitives for isolated-world code.
//!
//! A [`Sandbox`] decides *where* an isolated script runs; the
//! [`ScriptEngine`] decides *how*. Both variants hand the engine a fresh
//! [`IsolatedGlobals`] per run, so nothing one script defines survives into
//! the next.

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, mpsc};
use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::engine::{IsolatedGlobals, ScriptEngine, ScriptSource};
use crate::error::{ExecutionError, ExecutionResult};

/// Default limit for one script in a [`WorkerSandbox`].
pub const DEFAULT_EXECUTION_TIMEOUT: Duration = Duration::from_secs(5);

/// Which sandbox variant to use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SandboxKind {
    /// Run on the calling thread with a fresh global scope.
    #[default]
    Realm,
    /// Run on a dedicated thread with a deadline.
    Worker,
}

impl fmt::Display for SandboxKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Realm => f.write_str("realm"),
            Self::Worker => f.write_str("worker"),
        }
    }
}

/// Runs isolated-world code.
pub trait Sandbox: Send + Sync {
    /// Which variant this is.
    fn kind(&self) -> SandboxKind;

    /// Evaluate `script` with `engine`, exposing only `globals`.
    ///
    /// # Errors
    ///
    /// [`ExecutionError::ScriptFailed`], [`ExecutionError::Panicked`], or
    /// for workers [`ExecutionError::Timeout`] and [`ExecutionError::Spawn`].
    fn run(
        &self,
        engine: &Arc<dyn ScriptEngine>,
        script: &ScriptSource,
        globals: IsolatedGlobals,
    ) -> ExecutionResult<()>;
}

/// Build the sandbox for `kind`.
#[must_use]
pub fn sandbox_for(kind: SandboxKind, execution_timeout: Duration) -> Arc<dyn Sandbox> {
    match kind {
        SandboxKind::Realm => Arc::new(RealmSandbox),
        SandboxKind::Worker => Arc::new(WorkerSandbox::new(execution_timeout)),
    }
}

/// Same-thread sandbox: a fresh projected realm per run.
#[derive(Debug, Clone, Copy, Default)]
pub struct RealmSandbox;

impl Sandbox for RealmSandbox {
    fn kind(&self) -> SandboxKind {
        SandboxKind::Realm
    }

    fn run(
        &self,
        engine: &Arc<dyn ScriptEngine>,
        script: &ScriptSource,
        globals: IsolatedGlobals,
    ) -> ExecutionResult<()> {
        debug!(extension_id = %script.extension, resource = %script.resource, "Realm run");
        let outcome = catch_unwind(AssertUnwindSafe(|| engine.evaluate(script, &globals)));
        settle(script, outcome)
    }
}

/// Thread-per-run sandbox with a deadline.
///
/// A script that overruns is reported as [`ExecutionError::Timeout`]; its
/// thread is detached and its result discarded whenever it finishes.
#[derive(Debug, Clone, Copy)]
pub struct WorkerSandbox {
    timeout: Duration,
}

impl WorkerSandbox {
    /// Create a worker sandbox with the given per-script limit.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Per-script limit.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl Default for WorkerSandbox {
    fn default() -> Self {
        Self::new(DEFAULT_EXECUTION_TIMEOUT)
    }
}

impl Sandbox for WorkerSandbox {
    fn kind(&self) -> SandboxKind {
        SandboxKind::Worker
    }

    fn run(
        &self,
        engine: &Arc<dyn ScriptEngine>,
        script: &ScriptSource,
        globals: IsolatedGlobals,
    ) -> ExecutionResult<()> {
        let (tx, rx) = mpsc::channel();
        let worker_engine = Arc::clone(engine);
        let worker_script = script.clone();

        thread::Builder::new()
            .name(format!("vellum-worker-{}", script.extension))
            .spawn(move || {
                let outcome = catch_unwind(AssertUnwindSafe(|| {
                    worker_engine.evaluate(&worker_script, &globals)
                }));
                let _ = tx.send(outcome);
            })
            .map_err(|e| ExecutionError::Spawn(e.to_string()))?;

        match rx.recv_timeout(self.timeout) {
            Ok(outcome) => settle(script, outcome),
            Err(mpsc::RecvTimeoutError::Timeout) => {
                warn!(
                    extension_id = %script.extension,
                    resource = %script.resource,
                    timeout = ?self.timeout,
                    "Worker script timed out"
                );
                Err(ExecutionError::Timeout {
                    resource: script.resource.clone(),
                    timeout: self.timeout,
                })
            },
            // The sender only disappears without sending if the thread died
            // outside `catch_unwind`.
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(ExecutionError::Panicked {
                resource: script.resource.clone(),
            }),
        }
    }
}

type Outcome = thread::Result<Result<(), crate::error::ScriptFault>>;

fn settle(script: &ScriptSource, outcome: Outcome) -> ExecutionResult<()> {
    match outcome {
        Ok(Ok(())) => Ok(()),
        Ok(Err(fault)) => Err(ExecutionError::ScriptFailed {
            resource: script.resource.clone(),
            message: fault.message,
        }),
        Err(_) => Err(ExecutionError::Panicked {
            resource: script.resource.clone(),
        }),
    }
}
