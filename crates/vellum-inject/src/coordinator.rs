//! The injection coordinator.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{
    Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak,
};
use std::time::Duration;

use tracing::{debug, info, trace, warn};

use vellum_bridge::{BridgeConfig, CapabilityBridge, HostBroker, HostShell};
use vellum_core::{
    Document, DocumentId, ExtensionId, ExtensionManifest, Frame, InjectionRecord, ResourceRef,
    RuleSpec, RunAt, ScriptRule, StyleElement, World,
};
use vellum_lifecycle::{LifecycleScheduler, PhaseCallback};
use vellum_patterns::{DEFAULT_CACHE_CAPACITY, PatternMatcher};
use vellum_sandbox::{
    DEFAULT_EXECUTION_TIMEOUT, ExecutionContext, ExecutionError, ResourceLoader, SandboxKind,
    ScriptEngine, ScriptSource, sandbox_for,
};

use crate::context::{DocumentContext, DocumentState, TeardownReport};
use crate::error::RegistrationResult;
use crate::events::{DEFAULT_EVENT_CAPACITY, EventBus, EventReceiver, InjectionEvent};
use crate::registry::{InjectionPlan, MatchedRule, RegistrationReport, RuleRegistry, partition};

/// Log target for failures attributed to an extension.
pub const EXTENSION_LOG_TARGET: &str = "vellum::extension";

/// Upper bound on delivery rounds in one [`InjectionCoordinator::pump`].
const MAX_PUMP_ROUNDS: usize = 64;

/// Coordinator settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoordinatorConfig {
    /// Sandbox variant for isolated-world code.
    pub sandbox: SandboxKind,
    /// Per-script limit for worker sandboxes.
    pub execution_timeout: Duration,
    /// Channel limits for isolated worlds.
    pub bridge: BridgeConfig,
    /// Compiled patterns kept in the matcher cache.
    pub pattern_cache_capacity: usize,
    /// Event bus capacity.
    pub event_capacity: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            sandbox: SandboxKind::default(),
            execution_timeout: DEFAULT_EXECUTION_TIMEOUT,
            bridge: BridgeConfig::default(),
            pattern_cache_capacity: DEFAULT_CACHE_CAPACITY,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

/// Outcome of trying to start one resource.
enum Begin {
    Proceed,
    Duplicate,
    Gone,
}

struct Inner {
    config: CoordinatorConfig,
    registry: RwLock<RuleRegistry>,
    documents: Mutex<HashMap<DocumentId, DocumentContext>>,
    scheduler: LifecycleScheduler,
    execution: ExecutionContext,
    resources: Arc<dyn ResourceLoader>,
    shell: Arc<dyn HostShell>,
    events: EventBus,
    navigations: AtomicU64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

/// Matches rules to documents, schedules them by phase and owns every
/// document's injection state.
///
/// The coordinator is the single writer of the rule table and of every
/// per-document context. Cloning shares the same state.
#[derive(Clone)]
pub struct InjectionCoordinator {
    inner: Arc<Inner>,
}

impl InjectionCoordinator {
    /// Create a coordinator.
    ///
    /// `engine` evaluates isolated-world code, `resources` resolves
    /// resource references and `shell` answers capability calls.
    #[must_use]
    pub fn new(
        config: CoordinatorConfig,
        engine: Arc<dyn ScriptEngine>,
        resources: Arc<dyn ResourceLoader>,
        shell: Arc<dyn HostShell>,
    ) -> Self {
        let sandbox = sandbox_for(config.sandbox, config.execution_timeout);
        info!(
            sandbox = %config.sandbox,
            response_timeout_ms = config.bridge.response_timeout.as_millis(),
            "Injection coordinator created"
        );
        Self {
            inner: Arc::new(Inner {
                config,
                registry: RwLock::new(RuleRegistry::new(PatternMatcher::with_capacity(
                    config.pattern_cache_capacity,
                ))),
                documents: Mutex::new(HashMap::new()),
                scheduler: LifecycleScheduler::new(),
                execution: ExecutionContext::new(sandbox, engine),
                resources,
                shell,
                events: EventBus::with_capacity(config.event_capacity),
                navigations: AtomicU64::new(0),
            }),
        }
    }

    /// Active settings.
    #[must_use]
    pub fn config(&self) -> &CoordinatorConfig {
        &self.inner.config
    }

    /// Register an extension's content-script rules, replacing any it had.
    ///
    /// Documents already navigated keep the rules they matched.
    ///
    /// # Errors
    ///
    /// A [`RegistrationError`](crate::RegistrationError) for a blank id or a
    /// malformed rule. Rules whose patterns do not compile are listed in
    /// the report instead.
    pub fn register(
        &self,
        extension: impl Into<ExtensionId>,
        rules: Vec<RuleSpec>,
    ) -> RegistrationResult<RegistrationReport> {
        let report = write(&self.inner.registry).register(extension.into(), rules)?;
        for rejected in &report.rejected {
            warn!(
                target: EXTENSION_LOG_TARGET,
                extension_id = %report.extension,
                rule = %rejected.rule,
                error = %rejected.error,
                "Rule skipped: match pattern did not compile"
            );
        }
        info!(
            extension_id = %report.extension,
            rules = report.accepted.len(),
            skipped = report.rejected.len(),
            "Extension registered"
        );
        Ok(report)
    }

    /// Register the `content_scripts` of a parsed manifest.
    ///
    /// # Errors
    ///
    /// See [`register`](Self::register).
    pub fn register_manifest(
        &self,
        extension: impl Into<ExtensionId>,
        manifest: &ExtensionManifest,
    ) -> RegistrationResult<RegistrationReport> {
        self.register(extension, manifest.content_scripts.clone())
    }

    /// Remove an extension's rules and close its isolated worlds.
    ///
    /// Phases already scheduled skip the extension's rules when they fire.
    ///
    /// # Errors
    ///
    /// [`RegistrationError::NotRegistered`](crate::RegistrationError::NotRegistered)
    /// for an unknown extension.
    pub fn unregister(&self, extension: &ExtensionId) -> RegistrationResult<()> {
        let removed = write(&self.inner.registry).unregister(extension)?;
        let mut closed: usize = 0;
        for ctx in lock(&self.inner.documents).values_mut() {
            if ctx.close_world(extension) {
                closed = closed.saturating_add(1);
            }
        }
        info!(
            extension_id = %extension,
            rules = removed,
            channels_closed = closed,
            "Extension unregistered"
        );
        Ok(())
    }

    /// Registered extensions, in registration order.
    #[must_use]
    pub fn extensions(&self) -> Vec<ExtensionId> {
        read(&self.inner.registry).extensions().to_vec()
    }

    /// Start injecting into a freshly navigated document.
    ///
    /// Any previous context for the same document is torn down first.
    /// Phases the document has already passed fire before this returns.
    pub fn on_navigate(&self, document: Arc<dyn Document>, url: &str) -> DocumentState {
        let document_id = document.id();
        self.teardown(document_id);

        let navigation = self.inner.navigations.fetch_add(1, Ordering::Relaxed);
        let frame = document.frame();
        let matched = read(&self.inner.registry).matching(url, &frame);

        let mut context = DocumentContext::new(Arc::clone(&document), url, navigation);
        if matched.is_empty() {
            debug!(document_id = %document_id, url, "No rules match");
            context.transition(DocumentState::Done);
            lock(&self.inner.documents).insert(document_id, context);
            return DocumentState::Done;
        }

        info!(
            document_id = %document_id,
            url,
            rules = matched.len(),
            "Rules matched"
        );
        context.transition(DocumentState::Matched);
        context.phases = partition(matched);
        let phases: Vec<RunAt> = context.phases.keys().copied().collect();
        context.transition(DocumentState::Scheduled);
        lock(&self.inner.documents).insert(document_id, context);

        // Subscribing may fire phases synchronously, so no lock is held here.
        for phase in phases {
            let weak: Weak<Inner> = Arc::downgrade(&self.inner);
            let callback: PhaseCallback = Box::new(move |fired| {
                if let Some(inner) = weak.upgrade() {
                    inner.run_phase(document_id, navigation, fired);
                }
            });
            let outcome = self.inner.scheduler.subscribe(&document, phase, callback);
            trace!(document_id = %document_id, %phase, ?outcome, "Phase subscription");
        }

        self.document_state(document_id)
            .unwrap_or(DocumentState::TornDown)
    }

    /// Destroy a document's context.
    ///
    /// Pending phases are cancelled first, then style markers are detached,
    /// channels closed and records cleared. Safe to call repeatedly; returns
    /// `None` when there was nothing to tear down.
    pub fn teardown(&self, document_id: DocumentId) -> Option<TeardownReport> {
        let cancelled = self.inner.scheduler.cancel(document_id);
        let context = lock(&self.inner.documents).remove(&document_id);
        let Some(context) = context else {
            trace!(document_id = %document_id, cancelled, "Nothing to tear down");
            return None;
        };

        let report = context.teardown();
        info!(
            document_id = %document_id,
            previous = %report.previous,
            markers_detached = report.markers_detached,
            channels_closed = report.channels_closed,
            records_cleared = report.records_cleared,
            "Document torn down"
        );
        self.inner
            .events
            .publish(InjectionEvent::DocumentTornDown(report));
        Some(report)
    }

    /// Deliver queued channel traffic for a document in both directions
    /// until nothing is left. Returns the number of packets handled.
    pub fn pump(&self, document_id: DocumentId) -> usize {
        let endpoints = match lock(&self.inner.documents).get(&document_id) {
            Some(ctx) => ctx.endpoints(),
            None => return 0,
        };

        let mut total: usize = 0;
        for _ in 0..MAX_PUMP_ROUNDS {
            let handled = endpoints
                .iter()
                .map(|(bridge, broker)| broker.pump().saturating_add(bridge.dispatch_pending()))
                .fold(0_usize, usize::saturating_add);
            if handled == 0 {
                break;
            }
            total = total.saturating_add(handled);
        }
        total
    }

    /// Current state of a document, or `None` if it has no live context.
    #[must_use]
    pub fn document_state(&self, document_id: DocumentId) -> Option<DocumentState> {
        lock(&self.inner.documents)
            .get(&document_id)
            .map(|ctx| ctx.state)
    }

    /// URL the document was last navigated to.
    #[must_use]
    pub fn document_url(&self, document_id: DocumentId) -> Option<String> {
        lock(&self.inner.documents)
            .get(&document_id)
            .map(|ctx| ctx.url.clone())
    }

    /// Injection records for a document, in execution order.
    #[must_use]
    pub fn records(&self, document_id: DocumentId) -> Vec<InjectionRecord> {
        lock(&self.inner.documents)
            .get(&document_id)
            .map(|ctx| ctx.records().to_vec())
            .unwrap_or_default()
    }

    /// Open isolated-world channels for a document.
    #[must_use]
    pub fn open_channel_count(&self, document_id: DocumentId) -> usize {
        lock(&self.inner.documents)
            .get(&document_id)
            .map_or(0, DocumentContext::open_channels)
    }

    /// Open isolated-world channels across every document.
    #[must_use]
    pub fn total_open_channels(&self) -> usize {
        lock(&self.inner.documents)
            .values()
            .map(DocumentContext::open_channels)
            .sum()
    }

    /// Stylesheets currently applied to a document.
    #[must_use]
    pub fn style_count(&self, document_id: DocumentId) -> usize {
        lock(&self.inner.documents)
            .get(&document_id)
            .map_or(0, |ctx| ctx.markers.len())
    }

    /// The host end of an extension's channel in a document, for pushing
    /// messages into its isolated world.
    #[must_use]
    pub fn host_broker(&self, document_id: DocumentId, extension: &ExtensionId) -> Option<HostBroker> {
        lock(&self.inner.documents)
            .get(&document_id)
            .and_then(|ctx| ctx.broker_for(extension))
    }

    /// What a navigation to `url` in `frame` would inject, without running
    /// anything.
    #[must_use]
    pub fn plan(&self, url: &str, frame: &Frame) -> InjectionPlan {
        read(&self.inner.registry).plan(url, frame)
    }

    /// Subscribe to injection events.
    #[must_use]
    pub fn subscribe_events(&self) -> EventReceiver {
        self.inner.events.subscribe()
    }

    /// The event bus.
    #[must_use]
    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }
}

impl std::fmt::Debug for InjectionCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InjectionCoordinator")
            .field("config", &self.inner.config)
            .field("documents", &lock(&self.inner.documents).len())
            .finish_non_exhaustive()
    }
}

impl Inner {
    fn run_phase(&self, document_id: DocumentId, navigation: u64, phase: RunAt) {
        let (document, rules) = {
            let mut documents = lock(&self.documents);
            let Some(ctx) = documents.get_mut(&document_id) else {
                trace!(document_id = %document_id, %phase, "Phase fired for a torn-down document");
                return;
            };
            if ctx.navigation != navigation {
                return;
            }
            let Some(rules) = ctx.phases.remove(&phase) else {
                return;
            };
            (Arc::clone(&ctx.document), rules)
        };

        debug!(document_id = %document_id, %phase, rules = rules.len(), "Running phase");
        for matched in &rules {
            if !self.is_live(matched) {
                debug!(
                    rule = %matched.rule.id(),
                    "Skipping rule of an unregistered extension"
                );
                continue;
            }
            if !self.inject_rule(&document, navigation, phase, &matched.rule) {
                debug!(document_id = %document_id, %phase, "Document torn down mid-phase");
                return;
            }
        }

        let mut documents = lock(&self.documents);
        if let Some(ctx) = documents.get_mut(&document_id) {
            if ctx.navigation == navigation
                && ctx.phases.is_empty()
                && ctx.state == DocumentState::Scheduled
            {
                ctx.transition(DocumentState::Done);
            }
        }
    }

    fn is_live(&self, matched: &MatchedRule) -> bool {
        read(&self.registry).is_current(matched.rule.extension(), matched.epoch())
    }

    /// Styles first, then scripts. Returns `false` if the document went away.
    fn inject_rule(
        &self,
        document: &Arc<dyn Document>,
        navigation: u64,
        phase: RunAt,
        rule: &ScriptRule,
    ) -> bool {
        for resource in rule.styles() {
            if !self.inject_style(document, navigation, phase, rule.extension(), resource) {
                return false;
            }
        }
        for resource in rule.scripts() {
            if !self.inject_script(document, navigation, phase, rule, resource) {
                return false;
            }
        }
        true
    }

    fn inject_style(
        &self,
        document: &Arc<dyn Document>,
        navigation: u64,
        phase: RunAt,
        extension: &ExtensionId,
        resource: &ResourceRef,
    ) -> bool {
        let document_id = document.id();
        match self.begin(document_id, navigation, extension, resource, phase) {
            Begin::Proceed => {},
            Begin::Duplicate => return true,
            Begin::Gone => return false,
        }

        let css = match self.resources.load(extension, resource) {
            Ok(css) => css,
            Err(e) => {
                self.failed(document_id, extension, resource, phase, &e.into());
                return true;
            },
        };

        let result = {
            let mut documents = lock(&self.documents);
            let Some(ctx) = documents.get_mut(&document_id) else {
                return false;
            };
            if ctx.navigation != navigation {
                return false;
            }
            self.execution.inject_style(
                &mut ctx.markers,
                document.as_ref(),
                StyleElement {
                    extension: extension.clone(),
                    resource: resource.clone(),
                    css,
                },
            )
        };

        match result {
            Ok(handle) => {
                debug!(
                    document_id = %document_id,
                    extension_id = %extension,
                    resource = %resource,
                    %phase,
                    ?handle,
                    "Style injected"
                );
                self.events.publish(InjectionEvent::StyleInjected {
                    document_id,
                    extension_id: extension.clone(),
                    resource: resource.clone(),
                    phase,
                });
            },
            Err(ExecutionError::DuplicateStyle { .. }) => {
                self.skipped(document_id, extension, resource, phase);
            },
            Err(e) => self.failed(document_id, extension, resource, phase, &e),
        }
        true
    }

    fn inject_script(
        &self,
        document: &Arc<dyn Document>,
        navigation: u64,
        phase: RunAt,
        rule: &ScriptRule,
        resource: &ResourceRef,
    ) -> bool {
        let document_id = document.id();
        let extension = rule.extension();
        match self.begin(document_id, navigation, extension, resource, phase) {
            Begin::Proceed => {},
            Begin::Duplicate => return true,
            Begin::Gone => return false,
        }

        let code = match self.resources.load(extension, resource) {
            Ok(code) => code,
            Err(e) => {
                self.failed(document_id, extension, resource, phase, &e.into());
                return true;
            },
        };

        let bridge = match rule.world() {
            World::Main => None,
            World::Isolated => match self.isolated_bridge(document_id, navigation, extension) {
                Some(bridge) => Some(bridge),
                None => return false,
            },
        };

        let source = ScriptSource::new(extension.clone(), resource.clone(), code);
        match self
            .execution
            .run(&source, rule.world(), document.as_ref(), bridge.as_ref())
        {
            Ok(()) => {
                debug!(
                    document_id = %document_id,
                    extension_id = %extension,
                    resource = %resource,
                    %phase,
                    world = %rule.world(),
                    "Script injected"
                );
                self.events.publish(InjectionEvent::ScriptInjected {
                    document_id,
                    extension_id: extension.clone(),
                    resource: resource.clone(),
                    phase,
                    world: rule.world(),
                });
            },
            Err(e) => self.failed(document_id, extension, resource, phase, &e),
        }
        true
    }

    /// Record the start of an injection unless it already happened.
    fn begin(
        &self,
        document_id: DocumentId,
        navigation: u64,
        extension: &ExtensionId,
        resource: &ResourceRef,
        phase: RunAt,
    ) -> Begin {
        let record = InjectionRecord::new(extension.clone(), resource.clone(), phase, document_id);
        let fresh = {
            let mut documents = lock(&self.documents);
            match documents.get_mut(&document_id) {
                Some(ctx) if ctx.navigation == navigation => ctx.try_record(record),
                _ => return Begin::Gone,
            }
        };
        if fresh {
            return Begin::Proceed;
        }
        self.skipped(document_id, extension, resource, phase);
        Begin::Duplicate
    }

    fn skipped(
        &self,
        document_id: DocumentId,
        extension: &ExtensionId,
        resource: &ResourceRef,
        phase: RunAt,
    ) {
        debug!(
            document_id = %document_id,
            extension_id = %extension,
            resource = %resource,
            %phase,
            "Already injected, skipping"
        );
        self.events.publish(InjectionEvent::InjectionSkipped {
            document_id,
            extension_id: extension.clone(),
            resource: resource.clone(),
            phase,
        });
    }

    fn isolated_bridge(
        &self,
        document_id: DocumentId,
        navigation: u64,
        extension: &ExtensionId,
    ) -> Option<CapabilityBridge> {
        let mut documents = lock(&self.documents);
        let ctx = documents.get_mut(&document_id)?;
        if ctx.navigation != navigation {
            return None;
        }
        Some(ctx.bridge_for(extension, &self.shell, self.config.bridge))
    }

    fn failed(
        &self,
        document_id: DocumentId,
        extension: &ExtensionId,
        resource: &ResourceRef,
        phase: RunAt,
        error: &ExecutionError,
    ) {
        warn!(
            target: EXTENSION_LOG_TARGET,
            document_id = %document_id,
            extension_id = %extension,
            resource = %resource,
            %phase,
            error = %error,
            "Injection failed"
        );
        self.events.publish(InjectionEvent::InjectionFailed {
            document_id,
            extension_id: extension.clone(),
            resource: resource.clone(),
            phase,
            error: error.to_string(),
        });
    }
}
