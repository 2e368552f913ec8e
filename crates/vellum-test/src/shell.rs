//! Mock host shell.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::{Map, Value, json};

use vellum_bridge::{HostError, HostPort, HostShell, MessageSender, Responder, StorageKeys};
use vellum_core::ExtensionId;

type Reply = Arc<dyn Fn(&Value) -> Option<Value> + Send + Sync>;

/// A message the shell received.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedMessage {
    /// Who sent it.
    pub sender: MessageSender,
    /// Target tab for `tabs.sendMessage`, `None` for `runtime.sendMessage`.
    pub tab_id: Option<u64>,
    /// Message body.
    pub message: Value,
}

/// Mock implementation of [`HostShell`].
///
/// - `runtime.sendMessage` is answered with `{"echo": msg}` unless a
///   custom reply is configured.
/// - `tabs.sendMessage` is answered with `{"tab_id": id, "echo": msg}`.
/// - Storage is an in-memory map per extension.
/// - Port messages are echoed back on the same port.
#[derive(Clone, Default)]
pub struct MockHostShell {
    storage: Arc<Mutex<HashMap<ExtensionId, Map<String, Value>>>>,
    messages: Arc<Mutex<Vec<RecordedMessage>>>,
    ports: Arc<Mutex<Vec<HostPort>>>,
    port_messages: Arc<Mutex<Vec<Value>>>,
    reply: Option<Reply>,
    storage_failure: Option<String>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MockHostShell {
    /// Create a shell with empty storage.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer runtime messages with `reply`; returning `None` leaves the
    /// sender without a response.
    #[must_use]
    pub fn with_reply<F>(mut self, reply: F) -> Self
    where
        F: Fn(&Value) -> Option<Value> + Send + Sync + 'static,
    {
        self.reply = Some(Arc::new(reply));
        self
    }

    /// Make every storage call fail.
    #[must_use]
    pub fn with_storage_failure(mut self, message: impl Into<String>) -> Self {
        self.storage_failure = Some(message.into());
        self
    }

    /// Seed one stored value.
    #[must_use]
    pub fn with_stored(self, extension: &str, key: &str, value: Value) -> Self {
        lock(&self.storage)
            .entry(ExtensionId::new(extension))
            .or_default()
            .insert(key.to_string(), value);
        self
    }

    /// Everything received so far.
    #[must_use]
    pub fn messages(&self) -> Vec<RecordedMessage> {
        lock(&self.messages).clone()
    }

    /// Stored items for one extension.
    #[must_use]
    pub fn stored(&self, extension: &str) -> Map<String, Value> {
        lock(&self.storage)
            .get(&ExtensionId::new(extension))
            .cloned()
            .unwrap_or_default()
    }

    /// Ports opened by page code.
    #[must_use]
    pub fn ports(&self) -> Vec<HostPort> {
        lock(&self.ports).clone()
    }

    /// Messages received on any port.
    #[must_use]
    pub fn port_messages(&self) -> Vec<Value> {
        lock(&self.port_messages).clone()
    }

    fn record(&self, sender: &MessageSender, tab_id: Option<u64>, message: &Value) {
        lock(&self.messages).push(RecordedMessage {
            sender: sender.clone(),
            tab_id,
            message: message.clone(),
        });
    }

    fn check_storage(&self) -> Result<(), HostError> {
        match &self.storage_failure {
            Some(message) => Err(HostError::Storage(message.clone())),
            None => Ok(()),
        }
    }
}

impl HostShell for MockHostShell {
    fn on_runtime_message(&self, sender: &MessageSender, message: Value, responder: Responder) {
        self.record(sender, None, &message);
        let reply = match &self.reply {
            Some(reply) => reply(&message),
            None => Some(json!({ "echo": message })),
        };
        if let Some(reply) = reply {
            responder.respond(reply);
        }
    }

    fn on_tab_message(
        &self,
        sender: &MessageSender,
        tab_id: u64,
        message: Value,
        responder: Responder,
    ) {
        self.record(sender, Some(tab_id), &message);
        responder.respond(json!({ "tab_id": tab_id, "echo": message }));
    }

    fn storage_get(
        &self,
        extension: &ExtensionId,
        keys: &StorageKeys,
    ) -> Result<Map<String, Value>, HostError> {
        self.check_storage()?;
        let storage = lock(&self.storage);
        let stored = storage.get(extension);
        let mut items: Map<String, Value> = stored
            .map(|items| {
                items
                    .iter()
                    .filter(|(key, _)| keys.selects(key))
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect()
            })
            .unwrap_or_default();
        if let StorageKeys::Defaults(defaults) = keys {
            for (key, default) in defaults {
                items.entry(key.clone()).or_insert_with(|| default.clone());
            }
        }
        Ok(items)
    }

    fn storage_set(
        &self,
        extension: &ExtensionId,
        items: Map<String, Value>,
    ) -> Result<(), HostError> {
        self.check_storage()?;
        lock(&self.storage)
            .entry(extension.clone())
            .or_default()
            .extend(items);
        Ok(())
    }

    fn on_port_connect(&self, _sender: &MessageSender, port: HostPort) {
        lock(&self.ports).push(port);
    }

    fn on_port_message(&self, _sender: &MessageSender, port: &HostPort, message: Value) {
        lock(&self.port_messages).push(message.clone());
        port.post_message(json!({ "echo": message }));
    }

    fn on_port_disconnect(&self, _sender: &MessageSender, port: &HostPort) {
        lock(&self.ports).retain(|p| p.id() != port.id());
    }
}

impl std::fmt::Debug for MockHostShell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockHostShell")
            .field("messages", &lock(&self.messages).len())
            .field("ports", &lock(&self.ports).len())
            .finish_non_exhaustive()
    }
}
