//! Per-document phase scheduler.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use vellum_core::{Document, DocumentId, LifecycleSignal, ListenerId, RunAt};

/// Callback fired when a document reaches a phase.
pub type PhaseCallback = Box<dyn FnOnce(RunAt) + Send>;

/// Outcome of [`LifecycleScheduler::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Subscription {
    /// The phase has not been reached yet; the callback is queued.
    Pending,
    /// The phase was already reached; the callback ran before `subscribe` returned.
    FiredImmediately,
    /// A callback for this phase and document already exists; the new one was dropped.
    AlreadySubscribed,
    /// The document was cancelled before the callback could fire.
    Cancelled,
}

/// Fires phase callbacks at the right point of each document's lifecycle.
///
/// Cloning is cheap and clones share state.
#[derive(Clone, Default)]
pub struct LifecycleScheduler {
    inner: Arc<Mutex<SchedulerState>>,
}

#[derive(Default)]
struct SchedulerState {
    documents: HashMap<DocumentId, DocumentSchedule>,
}

struct DocumentSchedule {
    document: Arc<dyn Document>,
    listener: Option<ListenerId>,
    /// Latest phase the document is known to have reached.
    reached: RunAt,
    subscribed: BTreeSet<RunAt>,
    fired: BTreeSet<RunAt>,
    pending: BTreeMap<RunAt, PhaseCallback>,
    /// Set while a flush is running callbacks, so nested signals only
    /// record progress and the outer flush fires the remaining phases.
    flushing: bool,
    cancel: CancellationToken,
}

impl DocumentSchedule {
    fn new(document: Arc<dyn Document>) -> Self {
        let reached = document.ready_state().reached_phase();
        Self {
            document,
            listener: None,
            reached,
            subscribed: BTreeSet::new(),
            fired: BTreeSet::new(),
            pending: BTreeMap::new(),
            flushing: false,
            cancel: CancellationToken::new(),
        }
    }

    fn observe(&mut self, phase: RunAt) {
        if phase > self.reached {
            self.reached = phase;
        }
    }

    /// Remove every pending callback whose phase has been reached, in phase order.
    fn take_due(&mut self) -> Vec<(RunAt, PhaseCallback)> {
        let due: Vec<RunAt> = self
            .pending
            .keys()
            .copied()
            .filter(|phase| *phase <= self.reached)
            .collect();

        due.into_iter()
            .filter_map(|phase| {
                let callback = self.pending.remove(&phase)?;
                self.fired.insert(phase);
                Some((phase, callback))
            })
            .collect()
    }
}

impl std::fmt::Debug for LifecycleScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count = lock(&self.inner).documents.len();
        f.debug_struct("LifecycleScheduler")
            .field("documents", &count)
            .finish()
    }
}

fn lock(inner: &Mutex<SchedulerState>) -> MutexGuard<'_, SchedulerState> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

impl LifecycleScheduler {
    /// Create an empty scheduler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback` to run once `document` reaches `phase`.
    ///
    /// If the document is already past `phase`, the callback (and any
    /// earlier pending phase) fires before this returns. Subscribing the
    /// same phase twice for one document is a no-op.
    pub fn subscribe(
        &self,
        document: &Arc<dyn Document>,
        phase: RunAt,
        callback: PhaseCallback,
    ) -> Subscription {
        let document_id = document.id();
        let ready = document.ready_state();

        let fired = Arc::new(AtomicBool::new(false));
        let fired_flag = Arc::clone(&fired);
        let callback: PhaseCallback = Box::new(move |phase| {
            fired_flag.store(true, Ordering::Release);
            callback(phase);
        });

        let needs_listener = {
            let mut state = lock(&self.inner);
            let schedule = state
                .documents
                .entry(document_id)
                .or_insert_with(|| DocumentSchedule::new(Arc::clone(document)));

            if !schedule.subscribed.insert(phase) {
                debug!(document_id = %document_id, %phase, "Phase already subscribed");
                return Subscription::AlreadySubscribed;
            }

            schedule.observe(ready.reached_phase());
            schedule.pending.insert(phase, callback);
            trace!(document_id = %document_id, %phase, ?ready, "Phase subscribed");

            schedule.listener.is_none() && schedule.reached < RunAt::DocumentIdle
        };

        if needs_listener {
            self.install_listener(document, document_id);
        }

        flush(&self.inner, document_id);

        if fired.load(Ordering::Acquire) {
            Subscription::FiredImmediately
        } else if self.is_tracking(document_id) {
            Subscription::Pending
        } else {
            Subscription::Cancelled
        }
    }

    /// Feed a lifecycle signal for a document by hand.
    ///
    /// Signals normally arrive through the listener installed on the
    /// document; this is the same entry point.
    pub fn signal(&self, document_id: DocumentId, signal: LifecycleSignal) {
        advance(&self.inner, document_id, signal);
    }

    /// Abort every pending subscription for a document.
    ///
    /// The document listener is removed and callbacks that have not fired
    /// are dropped. Returns `false` if the document was not tracked.
    pub fn cancel(&self, document_id: DocumentId) -> bool {
        let removed = lock(&self.inner).documents.remove(&document_id);
        let Some(schedule) = removed else {
            return false;
        };

        schedule.cancel.cancel();
        if let Some(listener) = schedule.listener {
            schedule.document.remove_lifecycle_listener(listener);
        }
        debug!(
            document_id = %document_id,
            dropped = schedule.pending.len(),
            "Cancelled lifecycle subscriptions"
        );
        true
    }

    /// Phases that have fired for a document, in order.
    #[must_use]
    pub fn fired_phases(&self, document_id: DocumentId) -> Vec<RunAt> {
        lock(&self.inner)
            .documents
            .get(&document_id)
            .map(|s| s.fired.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Number of callbacks still waiting for a document.
    #[must_use]
    pub fn pending_count(&self, document_id: DocumentId) -> usize {
        lock(&self.inner)
            .documents
            .get(&document_id)
            .map_or(0, |s| s.pending.len())
    }

    /// Whether the scheduler holds state for a document.
    #[must_use]
    pub fn is_tracking(&self, document_id: DocumentId) -> bool {
        lock(&self.inner).documents.contains_key(&document_id)
    }

    fn install_listener(&self, document: &Arc<dyn Document>, document_id: DocumentId) {
        let weak: Weak<Mutex<SchedulerState>> = Arc::downgrade(&self.inner);
        let token = match lock(&self.inner).documents.get(&document_id) {
            Some(schedule) => schedule.cancel.clone(),
            None => return,
        };

        let listener_token = token.clone();
        let listener = document.add_lifecycle_listener(Box::new(move |signal| {
            if listener_token.is_cancelled() {
                trace!(document_id = %document_id, ?signal, "Signal after cancel ignored");
                return;
            }
            if let Some(inner) = weak.upgrade() {
                advance(&inner, document_id, signal);
            }
        }));

        let mut state = lock(&self.inner);
        match state.documents.get_mut(&document_id) {
            Some(schedule) if !token.is_cancelled() => schedule.listener = Some(listener),
            _ => {
                drop(state);
                document.remove_lifecycle_listener(listener);
            },
        }
    }
}

fn advance(inner: &Arc<Mutex<SchedulerState>>, document_id: DocumentId, signal: LifecycleSignal) {
    {
        let mut state = lock(inner);
        let Some(schedule) = state.documents.get_mut(&document_id) else {
            return;
        };
        trace!(document_id = %document_id, ?signal, "Lifecycle signal");
        schedule.observe(signal.phase());
    }
    flush(inner, document_id);
}

/// Run every due callback for a document, outside the state lock.
fn flush(inner: &Arc<Mutex<SchedulerState>>, document_id: DocumentId) {
    {
        let mut state = lock(inner);
        let Some(schedule) = state.documents.get_mut(&document_id) else {
            return;
        };
        if schedule.flushing {
            return;
        }
        schedule.flushing = true;
    }

    loop {
        let (token, batch) = {
            let mut state = lock(inner);
            let Some(schedule) = state.documents.get_mut(&document_id) else {
                return;
            };
            let batch = schedule.take_due();
            if batch.is_empty() {
                schedule.flushing = false;
                return;
            }
            (schedule.cancel.clone(), batch)
        };

        for (phase, callback) in batch {
            if token.is_cancelled() {
                debug!(document_id = %document_id, %phase, "Document cancelled mid-flush");
                return;
            }
            debug!(document_id = %document_id, %phase, "Firing phase");
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                callback(phase);
            }));
            if let Err(e) = result {
                warn!(document_id = %document_id, %phase, error = ?e, "Phase callback panicked");
            }
        }
    }
}
