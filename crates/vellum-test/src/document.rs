//! Mock host document.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use vellum_core::{
    Document, DocumentError, DocumentId, ElementHandle, Frame, LifecycleSignal, ListenerId,
    ReadyState, ResourceRef, ScriptAttachment, ScriptElement, StyleElement,
};

type SharedListener = Arc<dyn Fn(LifecycleSignal) + Send + Sync>;

/// An element the engine attached.
#[derive(Debug, Clone, PartialEq, Eq)]
enum MockElement {
    Script(ScriptElement),
    Style(StyleElement),
}

#[derive(Default)]
struct MockDocumentState {
    next_listener: u64,
    next_element: u64,
    listeners: BTreeMap<u64, SharedListener>,
    elements: BTreeMap<ElementHandle, MockElement>,
    executed_main: Vec<ScriptElement>,
    failing_main: HashMap<ResourceRef, String>,
    detached: bool,
}

/// Mock implementation of [`Document`].
///
/// The ready state only changes when the test says so. [`advance`](Self::advance)
/// fires the lifecycle signals a real page would emit on the way.
pub struct MockDocument {
    id: DocumentId,
    frame: Frame,
    ready: Mutex<ReadyState>,
    state: Mutex<MockDocumentState>,
}

impl MockDocument {
    /// A top-level document that is still loading.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Self::with_state(ReadyState::Loading)
    }

    /// A top-level document in the given state.
    #[must_use]
    pub fn with_state(ready: ReadyState) -> Arc<Self> {
        Self::build(Frame::Top, ready)
    }

    /// A child frame document.
    #[must_use]
    pub fn child_frame(parent_url: Option<&str>, ready: ReadyState) -> Arc<Self> {
        Self::build(
            Frame::Child {
                parent_url: parent_url.map(str::to_string),
            },
            ready,
        )
    }

    fn build(frame: Frame, ready: ReadyState) -> Arc<Self> {
        Arc::new(Self {
            id: DocumentId::new(),
            frame,
            ready: Mutex::new(ready),
            state: Mutex::new(MockDocumentState::default()),
        })
    }

    fn state(&self) -> MutexGuard<'_, MockDocumentState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make main-world scripts from `resource` report an exception.
    pub fn fail_main_script(&self, resource: impl Into<ResourceRef>, message: impl Into<String>) {
        self.state()
            .failing_main
            .insert(resource.into(), message.into());
    }

    /// Move the document forward to `target`, firing `DOMContentLoaded`
    /// and `load` as each is crossed. Moving backwards is ignored.
    pub fn advance(&self, target: ReadyState) {
        let signals = {
            let mut ready = self.ready.lock().unwrap_or_else(PoisonError::into_inner);
            let from = *ready;
            if target <= from {
                return;
            }
            *ready = target;
            let mut signals = Vec::new();
            if from < ReadyState::Interactive && target >= ReadyState::Interactive {
                signals.push(LifecycleSignal::DomContentLoaded);
            }
            if target == ReadyState::Complete {
                signals.push(LifecycleSignal::Load);
            }
            signals
        };
        for signal in signals {
            self.emit(signal);
        }
    }

    /// Change the ready state without firing any signal.
    pub fn set_ready_state(&self, ready: ReadyState) {
        *self.ready.lock().unwrap_or_else(PoisonError::into_inner) = ready;
    }

    /// Fire a signal at every listener, regardless of the ready state.
    pub fn emit(&self, signal: LifecycleSignal) {
        let listeners: Vec<SharedListener> = self.state().listeners.values().cloned().collect();
        for listener in listeners {
            listener(signal);
        }
    }

    /// Simulate the frame being removed; DOM operations fail afterwards.
    pub fn detach(&self) {
        self.state().detached = true;
    }

    /// Number of installed lifecycle listeners.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.state().listeners.len()
    }

    /// Sources of main-world scripts attached so far, in order.
    #[must_use]
    pub fn executed_main_scripts(&self) -> Vec<String> {
        self.state()
            .executed_main
            .iter()
            .map(|s| s.source.clone())
            .collect()
    }

    /// Stylesheets currently attached.
    #[must_use]
    pub fn attached_styles(&self) -> Vec<StyleElement> {
        self.state()
            .elements
            .values()
            .filter_map(|e| match e {
                MockElement::Style(style) => Some(style.clone()),
                MockElement::Script(_) => None,
            })
            .collect()
    }

    /// Number of engine-attached elements still in the page.
    #[must_use]
    pub fn element_count(&self) -> usize {
        self.state().elements.len()
    }

    fn insert(&self, element: MockElement) -> Result<ElementHandle, DocumentError> {
        let mut state = self.state();
        if state.detached {
            return Err(DocumentError::Detached);
        }
        state.next_element = state.next_element.saturating_add(1);
        let handle = ElementHandle(state.next_element);
        state.elements.insert(handle, element);
        Ok(handle)
    }
}

impl Document for MockDocument {
    fn id(&self) -> DocumentId {
        self.id
    }

    fn ready_state(&self) -> ReadyState {
        *self.ready.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn frame(&self) -> Frame {
        self.frame.clone()
    }

    fn add_lifecycle_listener(&self, listener: vellum_core::LifecycleListener) -> ListenerId {
        let mut state = self.state();
        state.next_listener = state.next_listener.saturating_add(1);
        let id = state.next_listener;
        state.listeners.insert(id, Arc::from(listener));
        ListenerId(id)
    }

    fn remove_lifecycle_listener(&self, id: ListenerId) -> bool {
        self.state().listeners.remove(&id.0).is_some()
    }

    fn attach_script(&self, script: ScriptElement) -> Result<ScriptAttachment, DocumentError> {
        let outcome = match self.state().failing_main.get(&script.resource) {
            Some(message) => Err(message.clone()),
            None => Ok(()),
        };
        let handle = self.insert(MockElement::Script(script.clone()))?;
        self.state().executed_main.push(script);
        Ok(ScriptAttachment { handle, outcome })
    }

    fn append_style(&self, style: StyleElement) -> Result<ElementHandle, DocumentError> {
        self.insert(MockElement::Style(style))
    }

    fn remove_element(&self, handle: ElementHandle) -> Result<(), DocumentError> {
        let mut state = self.state();
        if state.detached {
            return Err(DocumentError::Detached);
        }
        state
            .elements
            .remove(&handle)
            .map(|_| ())
            .ok_or(DocumentError::ElementNotFound(handle))
    }
}

impl std::fmt::Debug for MockDocument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockDocument")
            .field("id", &self.id)
            .field("frame", &self.frame)
            .field("ready", &self.ready_state())
            .finish_non_exhaustive()
    }
}
