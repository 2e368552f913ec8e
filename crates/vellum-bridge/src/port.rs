//! Long-lived ports opened with `runtime.connect`.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use serde_json::Value;
use tracing::{debug, warn};

use crate::channel::Endpoint;
use crate::error::{BridgeError, BridgeResult};
use crate::packet::{Packet, PacketTag, PortId};

/// Listener registered with `port.onMessage.addListener`.
pub type PortListener = Arc<dyn Fn(Value) + Send + Sync>;

/// Listener registered with `port.onDisconnect.addListener`.
pub type DisconnectListener = Box<dyn FnOnce() + Send>;

pub(crate) type PortTable = Mutex<HashMap<PortId, Port>>;

struct PortInner {
    id: PortId,
    name: Option<String>,
    endpoint: Arc<Endpoint>,
    table: Weak<PortTable>,
    connected: AtomicBool,
    message_listeners: Mutex<Vec<PortListener>>,
    disconnect_listeners: Mutex<Vec<DisconnectListener>>,
}

/// Page side of a port.
///
/// Ports carry any number of messages in both directions until either side
/// disconnects. Cloning yields another handle to the same port.
#[derive(Clone)]
pub struct Port {
    inner: Arc<PortInner>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Port {
    pub(crate) fn new(
        id: PortId,
        name: Option<String>,
        endpoint: Arc<Endpoint>,
        table: &Arc<PortTable>,
    ) -> Self {
        Self {
            inner: Arc::new(PortInner {
                id,
                name,
                endpoint,
                table: Arc::downgrade(table),
                connected: AtomicBool::new(true),
                message_listeners: Mutex::new(Vec::new()),
                disconnect_listeners: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Port ID.
    #[must_use]
    pub fn id(&self) -> PortId {
        self.inner.id
    }

    /// Name passed to `runtime.connect`.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.inner.name.as_deref()
    }

    /// Whether the port is still connected.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::Acquire) && !self.inner.endpoint.is_closed()
    }

    /// `port.postMessage(msg)`.
    ///
    /// Posting after the channel is torn down is silently dropped.
    ///
    /// # Errors
    ///
    /// [`BridgeError::PortDisconnected`] if the port was disconnected.
    pub fn post_message(&self, message: Value) -> BridgeResult<()> {
        if !self.inner.connected.load(Ordering::Acquire) {
            return Err(BridgeError::PortDisconnected { port: self.inner.id });
        }
        let packet = Packet::new(PacketTag::PortMessage, self.inner.endpoint.next_id(), message)
            .on_port(self.inner.id);
        if let Err(e) = self.inner.endpoint.post(packet) {
            debug!(port = %self.inner.id, error = %e, "Dropping port message");
        }
        Ok(())
    }

    /// `port.onMessage.addListener(fn)`.
    pub fn add_message_listener(&self, listener: PortListener) {
        lock(&self.inner.message_listeners).push(listener);
    }

    /// `port.onDisconnect.addListener(fn)`.
    ///
    /// Fires when the host end disconnects. A local `disconnect` does not
    /// fire it.
    pub fn on_disconnect(&self, listener: DisconnectListener) {
        lock(&self.inner.disconnect_listeners).push(listener);
    }

    /// `port.disconnect()`.
    pub fn disconnect(&self) {
        if !self.mark_disconnected() {
            return;
        }
        let packet = Packet::new(
            PacketTag::PortDisconnect,
            self.inner.endpoint.next_id(),
            Value::Null,
        )
        .on_port(self.inner.id);
        if let Err(e) = self.inner.endpoint.post(packet) {
            debug!(port = %self.inner.id, error = %e, "Dropping port disconnect");
        }
        lock(&self.inner.disconnect_listeners).clear();
    }

    /// Deliver an inbound message to every listener.
    pub(crate) fn deliver(&self, message: &Value) {
        if !self.inner.connected.load(Ordering::Acquire) {
            return;
        }
        let listeners: Vec<PortListener> = lock(&self.inner.message_listeners).clone();
        for listener in listeners {
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                listener(message.clone());
            }));
            if let Err(e) = result {
                warn!(port = %self.inner.id, error = ?e, "Port listener panicked");
            }
        }
    }

    /// The host end disconnected.
    pub(crate) fn remote_disconnect(&self) {
        if !self.mark_disconnected() {
            return;
        }
        let listeners: Vec<DisconnectListener> =
            std::mem::take(&mut *lock(&self.inner.disconnect_listeners));
        for listener in listeners {
            listener();
        }
    }

    /// Drop the port without notifying anyone (channel teardown).
    pub(crate) fn abandon(&self) {
        self.inner.connected.store(false, Ordering::Release);
        lock(&self.inner.message_listeners).clear();
        lock(&self.inner.disconnect_listeners).clear();
    }

    fn mark_disconnected(&self) -> bool {
        if !self.inner.connected.swap(false, Ordering::AcqRel) {
            return false;
        }
        if let Some(table) = self.inner.table.upgrade() {
            lock(&table).remove(&self.inner.id);
        }
        debug!(port = %self.inner.id, "Port disconnected");
        true
    }
}

impl fmt::Debug for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Port")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}
