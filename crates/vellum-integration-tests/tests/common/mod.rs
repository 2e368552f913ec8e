//! Shared harness for end-to-end tests.

use std::sync::{Arc, Mutex};

use vellum_inject::{CoordinatorConfig, EventReceiver, InjectionCoordinator};
use vellum_sandbox::InMemoryResources;
use vellum_test::{MockHostShell, MockScriptEngine, init_test_logging};

/// A coordinator wired to mock host collaborators.
#[allow(dead_code)]
pub struct EngineHarness {
    /// The coordinator under test.
    pub coordinator: InjectionCoordinator,
    /// Records every isolated-world evaluation.
    pub engine: MockScriptEngine,
    /// Answers capability calls.
    pub shell: MockHostShell,
    /// Resource store behind the coordinator.
    pub resources: Arc<InMemoryResources>,
    /// Events since construction.
    pub events: EventReceiver,
}

#[allow(dead_code)]
impl EngineHarness {
    /// Default config, an engine with no programs and an echoing shell.
    pub fn new() -> Self {
        Self::with(CoordinatorConfig::default(), MockScriptEngine::new())
    }

    /// Custom config and engine.
    pub fn with(config: CoordinatorConfig, engine: MockScriptEngine) -> Self {
        init_test_logging();
        let shell = MockHostShell::new();
        let resources = Arc::new(InMemoryResources::new());
        let coordinator = InjectionCoordinator::new(
            config,
            Arc::new(engine.clone()),
            resources.clone(),
            Arc::new(shell.clone()),
        );
        let events = coordinator.subscribe_events();
        Self {
            coordinator,
            engine,
            shell,
            resources,
            events,
        }
    }

    /// Serve `(resource, source)` pairs for an extension.
    pub fn provide(&self, extension: &str, files: &[(&str, &str)]) {
        for (resource, source) in files {
            self.resources.insert(extension, *resource, *source);
        }
    }

    /// Kinds of every event published since the last call.
    pub fn event_types(&mut self) -> Vec<&'static str> {
        self.events.drain().iter().map(|e| e.event_type()).collect()
    }
}

/// A shared, lockable log for values captured inside script programs.
#[allow(dead_code)]
pub type Shared<T> = Arc<Mutex<Vec<T>>>;

/// Create an empty [`Shared`] log.
#[allow(dead_code)]
pub fn shared<T>() -> Shared<T> {
    Arc::new(Mutex::new(Vec::new()))
}
