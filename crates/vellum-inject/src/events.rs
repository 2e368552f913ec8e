//! Injection events for host observers.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{trace, warn};

use vellum_core::{DocumentId, ExtensionId, ResourceRef, RunAt, World};

use crate::context::TeardownReport;

/// Default channel capacity for the event bus.
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Something the coordinator did to a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InjectionEvent {
    /// A script ran to completion.
    ScriptInjected {
        /// Target document.
        document_id: DocumentId,
        /// Owning extension.
        extension_id: ExtensionId,
        /// Script resource.
        resource: ResourceRef,
        /// Phase it ran at.
        phase: RunAt,
        /// World it ran in.
        world: World,
    },
    /// A stylesheet was appended.
    StyleInjected {
        /// Target document.
        document_id: DocumentId,
        /// Owning extension.
        extension_id: ExtensionId,
        /// Stylesheet resource.
        resource: ResourceRef,
        /// Phase it was applied at.
        phase: RunAt,
    },
    /// A resource already had a record for this document and phase.
    InjectionSkipped {
        /// Target document.
        document_id: DocumentId,
        /// Owning extension.
        extension_id: ExtensionId,
        /// Skipped resource.
        resource: ResourceRef,
        /// Phase it was skipped at.
        phase: RunAt,
    },
    /// A resource failed to load or run. Siblings were unaffected.
    InjectionFailed {
        /// Target document.
        document_id: DocumentId,
        /// Owning extension.
        extension_id: ExtensionId,
        /// Failed resource.
        resource: ResourceRef,
        /// Phase it failed at.
        phase: RunAt,
        /// Rendered error.
        error: String,
    },
    /// A document's context was destroyed.
    DocumentTornDown(TeardownReport),
}

impl InjectionEvent {
    /// Short name of the event kind.
    #[must_use]
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::ScriptInjected { .. } => "script_injected",
            Self::StyleInjected { .. } => "style_injected",
            Self::InjectionSkipped { .. } => "injection_skipped",
            Self::InjectionFailed { .. } => "injection_failed",
            Self::DocumentTornDown(_) => "document_torn_down",
        }
    }

    /// Document the event concerns.
    #[must_use]
    pub fn document_id(&self) -> DocumentId {
        match self {
            Self::ScriptInjected { document_id, .. }
            | Self::StyleInjected { document_id, .. }
            | Self::InjectionSkipped { document_id, .. }
            | Self::InjectionFailed { document_id, .. } => *document_id,
            Self::DocumentTornDown(report) => report.document_id,
        }
    }
}

/// Broadcasts [`InjectionEvent`]s to every subscriber.
///
/// Publishing never blocks; slow receivers lose the oldest events.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Arc<InjectionEvent>>,
    capacity: usize,
}

impl EventBus {
    /// Create a bus with default capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_EVENT_CAPACITY)
    }

    /// Create a bus with the given capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender, capacity }
    }

    /// Publish an event. Returns the number of receivers that got it.
    pub fn publish(&self, event: InjectionEvent) -> usize {
        let event_type = event.event_type();
        if let Ok(count) = self.sender.send(Arc::new(event)) {
            trace!(event_type, receiver_count = count, "Event published");
            count
        } else {
            trace!(event_type, "No receivers for event");
            0
        }
    }

    /// Receive every event published from now on.
    #[must_use]
    pub fn subscribe(&self) -> EventReceiver {
        EventReceiver {
            receiver: self.sender.subscribe(),
            document: None,
        }
    }

    /// Receive only events about one document.
    #[must_use]
    pub fn subscribe_document(&self, document_id: DocumentId) -> EventReceiver {
        EventReceiver {
            receiver: self.sender.subscribe(),
            document: Some(document_id),
        }
    }

    /// Current number of receivers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Channel capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiving half of an [`EventBus`] subscription.
pub struct EventReceiver {
    receiver: broadcast::Receiver<Arc<InjectionEvent>>,
    document: Option<DocumentId>,
}

impl EventReceiver {
    fn wants(&self, event: &InjectionEvent) -> bool {
        self.document.is_none_or(|id| event.document_id() == id)
    }

    /// Wait for the next event. Returns `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<Arc<InjectionEvent>> {
        loop {
            match self.receiver.recv().await {
                Ok(event) if self.wants(&event) => return Some(event),
                Ok(_) => {},
                Err(broadcast::error::RecvError::Lagged(count)) => {
                    warn!(skipped = count, "Event receiver lagged, events dropped");
                },
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Take the next queued event without waiting.
    pub fn try_recv(&mut self) -> Option<Arc<InjectionEvent>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) if self.wants(&event) => return Some(event),
                Ok(_) => {},
                Err(broadcast::error::TryRecvError::Lagged(count)) => {
                    warn!(skipped = count, "Event receiver lagged, events dropped");
                },
                Err(
                    broadcast::error::TryRecvError::Empty | broadcast::error::TryRecvError::Closed,
                ) => return None,
            }
        }
    }

    /// Drain every queued event.
    pub fn drain(&mut self) -> Vec<Arc<InjectionEvent>> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }
}

impl std::fmt::Debug for EventReceiver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventReceiver")
            .field("document", &self.document)
            .finish_non_exhaustive()
    }
}
