//! Mock script engine.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use vellum_core::{ExtensionId, ResourceRef};
use vellum_sandbox::{IsolatedGlobals, ScriptEngine, ScriptFault, ScriptSource};

type Program = Arc<dyn Fn(&IsolatedGlobals) -> Result<(), ScriptFault> + Send + Sync>;

/// One evaluation observed by [`MockScriptEngine`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptRun {
    /// Owning extension.
    pub extension: ExtensionId,
    /// Resource that ran.
    pub resource: ResourceRef,
    /// Code that ran.
    pub code: String,
}

/// Mock implementation of [`ScriptEngine`].
///
/// Scripts are looked up by their source text. Unknown code succeeds
/// without doing anything; every evaluation is recorded.
#[derive(Clone, Default)]
pub struct MockScriptEngine {
    programs: Arc<Mutex<HashMap<String, Program>>>,
    runs: Arc<Mutex<Vec<ScriptRun>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MockScriptEngine {
    /// Create an engine with no programs.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `program` whenever a script's source is exactly `code`.
    #[must_use]
    pub fn with_program<F>(self, code: impl Into<String>, program: F) -> Self
    where
        F: Fn(&IsolatedGlobals) -> Result<(), ScriptFault> + Send + Sync + 'static,
    {
        lock(&self.programs).insert(code.into(), Arc::new(program));
        self
    }

    /// Make `code` throw `message`.
    #[must_use]
    pub fn with_failure(self, code: impl Into<String>, message: impl Into<String>) -> Self {
        let message = message.into();
        self.with_program(code, move |_| Err(ScriptFault::new(message.clone())))
    }

    /// Every evaluation so far, in order.
    #[must_use]
    pub fn runs(&self) -> Vec<ScriptRun> {
        lock(&self.runs).clone()
    }

    /// How many times `resource` ran.
    #[must_use]
    pub fn run_count(&self, resource: &str) -> usize {
        lock(&self.runs)
            .iter()
            .filter(|r| r.resource.as_str() == resource)
            .count()
    }

    /// Resources that ran, in order.
    #[must_use]
    pub fn executed_resources(&self) -> Vec<String> {
        lock(&self.runs)
            .iter()
            .map(|r| r.resource.as_str().to_string())
            .collect()
    }
}

impl ScriptEngine for MockScriptEngine {
    fn evaluate(&self, script: &ScriptSource, globals: &IsolatedGlobals) -> Result<(), ScriptFault> {
        lock(&self.runs).push(ScriptRun {
            extension: script.extension.clone(),
            resource: script.resource.clone(),
            code: script.code.clone(),
        });
        let program = lock(&self.programs).get(&script.code).cloned();
        match program {
            Some(program) => program(globals),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for MockScriptEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockScriptEngine")
            .field("programs", &lock(&self.programs).len())
            .field("runs", &lock(&self.runs).len())
            .finish()
    }
}
