//! Minimal document and engine doubles for unit tests.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use vellum_core::{
    Document, DocumentError, DocumentId, ElementHandle, LifecycleListener, ListenerId,
    ReadyState, ScriptAttachment, ScriptElement, StyleElement,
};

use crate::engine::{IsolatedGlobals, ScriptEngine, ScriptSource};
use crate::error::ScriptFault;

#[derive(Default)]
pub(crate) struct StubDocument {
    pub(crate) id: DocumentId,
    pub(crate) fail_main: Option<String>,
    pub(crate) elements: Mutex<BTreeMap<u64, String>>,
    pub(crate) ran: Mutex<Vec<String>>,
    pub(crate) next: Mutex<u64>,
}

impl StubDocument {
    fn insert(&self, label: String) -> ElementHandle {
        let mut next = self.next.lock().unwrap();
        *next = next.saturating_add(1);
        self.elements.lock().unwrap().insert(*next, label);
        ElementHandle(*next)
    }
}

impl Document for StubDocument {
    fn id(&self) -> DocumentId {
        self.id
    }

    fn ready_state(&self) -> ReadyState {
        ReadyState::Complete
    }

    fn add_lifecycle_listener(&self, _listener: LifecycleListener) -> ListenerId {
        ListenerId(0)
    }

    fn remove_lifecycle_listener(&self, _id: ListenerId) -> bool {
        false
    }

    fn attach_script(&self, script: ScriptElement) -> Result<ScriptAttachment, DocumentError> {
        self.ran.lock().unwrap().push(script.source.clone());
        let handle = self.insert(format!("script:{}", script.resource));
        let outcome = match &self.fail_main {
            Some(message) => Err(message.clone()),
            None => Ok(()),
        };
        Ok(ScriptAttachment { handle, outcome })
    }

    fn append_style(&self, style: StyleElement) -> Result<ElementHandle, DocumentError> {
        Ok(self.insert(format!("style:{}", style.resource)))
    }

    fn remove_element(&self, handle: ElementHandle) -> Result<(), DocumentError> {
        self.elements
            .lock()
            .unwrap()
            .remove(&handle.0)
            .map(|_| ())
            .ok_or(DocumentError::ElementNotFound(handle))
    }
}

type Program = dyn Fn(&ScriptSource, &IsolatedGlobals) -> Result<(), ScriptFault> + Send + Sync;

pub(crate) struct FnEngine(pub(crate) Arc<Program>);

impl FnEngine {
    pub(crate) fn shared<F>(program: F) -> Arc<dyn ScriptEngine>
    where
        F: Fn(&ScriptSource, &IsolatedGlobals) -> Result<(), ScriptFault> + Send + Sync + 'static,
    {
        Arc::new(Self(Arc::new(program)))
    }
}

impl ScriptEngine for FnEngine {
    fn evaluate(&self, script: &ScriptSource, globals: &IsolatedGlobals) -> Result<(), ScriptFault> {
        (self.0)(script, globals)
    }
}
