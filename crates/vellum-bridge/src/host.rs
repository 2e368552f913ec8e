//! Host side of a channel.
//!
//! The [`HostBroker`] drains packets posted by an isolated world and
//! forwards them to the [`HostShell`], the collaborator that owns real
//! storage, tab routing and the extension's background context.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Instant;

use serde_json::{Map, Value, json};
use tracing::{debug, trace, warn};

use vellum_core::{DocumentId, ExtensionId};

use crate::bridge::BridgeConfig;
use crate::capability::StorageKeys;
use crate::channel::Endpoint;
use crate::correlation::{PendingRequests, ResponseCallback, Waiter};
use crate::error::{BridgeError, BridgeResult, HostError};
use crate::packet::{ChannelId, CorrelationId, Packet, PacketTag, PortId};

/// Identifies who sent a packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageSender {
    /// Owning extension.
    pub extension_id: ExtensionId,
    /// Document the isolated world lives in.
    pub document_id: Option<DocumentId>,
    /// Channel the packet arrived on.
    pub channel: ChannelId,
}

/// Host collaborator the engine brokers capability calls to.
///
/// The engine stores no extension data and does no tab routing itself.
pub trait HostShell: Send + Sync {
    /// A `runtime.sendMessage` from page code. Reply through `responder`,
    /// now or later, or drop it to leave the sender without a reply.
    fn on_runtime_message(&self, sender: &MessageSender, message: Value, responder: Responder);

    /// A `tabs.sendMessage` addressed to `tab_id`.
    fn on_tab_message(
        &self,
        sender: &MessageSender,
        tab_id: u64,
        message: Value,
        responder: Responder,
    );

    /// `storage.local.get`.
    ///
    /// # Errors
    ///
    /// Any backend failure; it is reported to the page as `{"error": ...}`.
    fn storage_get(
        &self,
        extension: &ExtensionId,
        keys: &StorageKeys,
    ) -> Result<Map<String, Value>, HostError>;

    /// `storage.local.set`.
    ///
    /// # Errors
    ///
    /// Any backend failure; it is reported to the page as `{"error": ...}`.
    fn storage_set(&self, extension: &ExtensionId, items: Map<String, Value>)
    -> Result<(), HostError>;

    /// Page code opened a port.
    fn on_port_connect(&self, _sender: &MessageSender, _port: HostPort) {}

    /// A message arrived on an open port.
    fn on_port_message(&self, _sender: &MessageSender, _port: &HostPort, _message: Value) {}

    /// Page code disconnected a port.
    fn on_port_disconnect(&self, _sender: &MessageSender, _port: &HostPort) {}
}

/// One-shot reply handle given to the host shell.
///
/// Replies on a torn-down channel are dropped.
pub struct Responder {
    endpoint: Arc<Endpoint>,
    reply_to: CorrelationId,
    tag: PacketTag,
}

impl Responder {
    fn new(endpoint: Arc<Endpoint>, reply_to: CorrelationId, tag: PacketTag) -> Self {
        Self {
            endpoint,
            reply_to,
            tag,
        }
    }

    /// The request being answered.
    #[must_use]
    pub fn reply_to(&self) -> CorrelationId {
        self.reply_to
    }

    /// Send the reply. Returns `false` if the channel is gone.
    pub fn respond(self, payload: Value) -> bool {
        let packet =
            Packet::new(self.tag, self.endpoint.next_id(), payload).replying_to(self.reply_to);
        match self.endpoint.post(packet) {
            Ok(()) => true,
            Err(e) => {
                debug!(reply_to = %self.reply_to, error = %e, "Dropping host reply");
                false
            },
        }
    }
}

impl fmt::Debug for Responder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Responder")
            .field("reply_to", &self.reply_to)
            .field("tag", &self.tag)
            .finish_non_exhaustive()
    }
}

/// Open host ports of one channel, keyed by port ID.
type HostPortTable = Mutex<HashMap<PortId, HostPort>>;

/// Host side of a port.
#[derive(Clone)]
pub struct HostPort {
    id: PortId,
    name: Option<String>,
    endpoint: Arc<Endpoint>,
    table: Weak<HostPortTable>,
}

impl HostPort {
    /// Port ID.
    #[must_use]
    pub fn id(&self) -> PortId {
        self.id
    }

    /// Name the page passed to `runtime.connect`.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Whether the port is still registered with its broker.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.table
            .upgrade()
            .is_some_and(|table| lock(&table).contains_key(&self.id))
    }

    /// Send a message to the page end. Returns `false` if the port is
    /// disconnected or the channel is gone.
    pub fn post_message(&self, message: Value) -> bool {
        if !self.is_open() {
            return false;
        }
        let packet =
            Packet::new(PacketTag::PortMessage, self.endpoint.next_id(), message).on_port(self.id);
        self.endpoint.post(packet).is_ok()
    }

    /// Disconnect from the host end; the page's `onDisconnect` fires.
    ///
    /// The port leaves the broker's table, so later page traffic on it is
    /// dropped. Returns `false` if it was already disconnected.
    pub fn disconnect(&self) -> bool {
        let Some(table) = self.table.upgrade() else {
            return false;
        };
        if lock(&table).remove(&self.id).is_none() {
            return false;
        }
        debug!(port = %self.id, "Host disconnected port");
        let packet = Packet::new(PacketTag::PortDisconnect, self.endpoint.next_id(), Value::Null)
            .on_port(self.id);
        self.endpoint.post(packet).is_ok()
    }
}

impl fmt::Debug for HostPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostPort")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

struct BrokerInner {
    shell: Arc<dyn HostShell>,
    endpoint: Arc<Endpoint>,
    sender: MessageSender,
    ports: Arc<HostPortTable>,
    pending: Mutex<PendingRequests>,
}

/// Forwards one channel's page traffic to the host shell.
#[derive(Clone)]
pub struct HostBroker {
    inner: Arc<BrokerInner>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl HostBroker {
    /// Create a broker over the host endpoint of a channel.
    #[must_use]
    pub fn new(
        shell: Arc<dyn HostShell>,
        endpoint: Arc<Endpoint>,
        document_id: Option<DocumentId>,
        config: BridgeConfig,
    ) -> Self {
        let sender = MessageSender {
            extension_id: endpoint.owner().clone(),
            document_id,
            channel: endpoint.channel_id(),
        };
        let pending = PendingRequests::new(
            endpoint.channel_id(),
            config.response_timeout,
            config.max_pending_requests,
        );
        Self {
            inner: Arc::new(BrokerInner {
                shell,
                endpoint,
                sender,
                ports: Arc::new(Mutex::new(HashMap::new())),
                pending: Mutex::new(pending),
            }),
        }
    }

    /// Who this broker's traffic comes from.
    #[must_use]
    pub fn sender(&self) -> &MessageSender {
        &self.inner.sender
    }

    /// Open ports on this channel.
    #[must_use]
    pub fn open_ports(&self) -> usize {
        lock(&self.inner.ports).len()
    }

    /// Send a `message` to the isolated world's `onMessage` listeners.
    ///
    /// # Errors
    ///
    /// [`BridgeError::ChannelClosed`] if the channel is gone, or
    /// [`BridgeError::TooManyPending`] if too many replies are outstanding.
    pub fn send_message(&self, message: Value, callback: Option<ResponseCallback>) -> BridgeResult<()> {
        let endpoint = &self.inner.endpoint;
        let id = endpoint.next_id();
        if let Some(callback) = callback {
            lock(&self.inner.pending)
                .insert(id, Waiter::Callback(callback), Instant::now())
                .map_err(|(e, _)| e)?;
        }
        endpoint
            .post(Packet::new(PacketTag::Message, id, message))
            .inspect_err(|_| {
                lock(&self.inner.pending).forget(id);
            })
    }

    /// Process every packet queued for the host side. Returns the number handled.
    pub fn pump(&self) -> usize {
        let expired = lock(&self.inner.pending).take_expired(Instant::now());
        for (id, waiter) in expired {
            waiter.fail(BridgeError::Timeout { id });
        }

        let mut handled: usize = 0;
        while let Some(packet) = self.inner.endpoint.try_recv() {
            handled = handled.saturating_add(1);
            self.handle(packet);
        }
        handled
    }

    /// Close the channel and forget every port and waiter.
    pub fn close(&self) {
        self.inner.endpoint.close();
        lock(&self.inner.ports).clear();
        lock(&self.inner.pending).clear();
    }

    fn handle(&self, packet: Packet) {
        let inner = &self.inner;
        let sender = &inner.sender;
        trace!(channel = %sender.channel, tag = %packet.tag, id = %packet.id, "Host dispatch");

        match packet.tag {
            PacketTag::Message => {
                let responder = self.responder(packet.id, PacketTag::Response);
                inner.shell.on_runtime_message(sender, packet.payload, responder);
            },
            PacketTag::TabsMessage => match parse_tab_message(packet.payload) {
                Ok((tab_id, message)) => {
                    let responder = self.responder(packet.id, PacketTag::Response);
                    inner.shell.on_tab_message(sender, tab_id, message, responder);
                },
                Err(e) => self.reject(packet.id, PacketTag::Response, &e.to_string()),
            },
            PacketTag::StorageGet => {
                let reply = StorageKeys::from_value(packet.payload)
                    .map_err(|e| e.to_string())
                    .and_then(|keys| {
                        inner
                            .shell
                            .storage_get(&sender.extension_id, &keys)
                            .map_err(|e| e.to_string())
                    });
                match reply {
                    Ok(items) => {
                        self.responder(packet.id, PacketTag::StorageResponse)
                            .respond(Value::Object(items));
                    },
                    Err(message) => self.reject(packet.id, PacketTag::StorageResponse, &message),
                }
            },
            PacketTag::StorageSet => {
                let Value::Object(items) = packet.payload else {
                    self.reject(packet.id, PacketTag::StorageResponse, "items must be an object");
                    return;
                };
                match inner.shell.storage_set(&sender.extension_id, items) {
                    Ok(()) => {
                        self.responder(packet.id, PacketTag::StorageResponse)
                            .respond(json!({}));
                    },
                    Err(e) => self.reject(packet.id, PacketTag::StorageResponse, &e.to_string()),
                }
            },
            PacketTag::PortConnect => {
                let Some(id) = packet.port else {
                    debug!(channel = %sender.channel, "port-connect without port id");
                    return;
                };
                let name = packet
                    .payload
                    .get("name")
                    .and_then(Value::as_str)
                    .map(str::to_string);
                let port = HostPort {
                    id,
                    name,
                    endpoint: Arc::clone(&inner.endpoint),
                    table: Arc::downgrade(&inner.ports),
                };
                lock(&inner.ports).insert(id, port.clone());
                inner.shell.on_port_connect(sender, port);
            },
            PacketTag::PortMessage => {
                let port = packet.port.and_then(|id| lock(&inner.ports).get(&id).cloned());
                match port {
                    Some(port) => inner.shell.on_port_message(sender, &port, packet.payload),
                    None => debug!(channel = %sender.channel, "Message for unknown port"),
                }
            },
            PacketTag::PortDisconnect => {
                let port = packet.port.and_then(|id| lock(&inner.ports).remove(&id));
                if let Some(port) = port {
                    inner.shell.on_port_disconnect(sender, &port);
                }
            },
            PacketTag::Response => {
                let Some(reply_to) = packet.reply_to else {
                    return;
                };
                let waiter = lock(&inner.pending).resolve(reply_to, Instant::now());
                if let Some(waiter) = waiter {
                    waiter.complete(packet.payload);
                }
            },
            PacketTag::StorageResponse => {
                debug!(channel = %sender.channel, "Page-bound packet on host side ignored");
            },
        }
    }

    fn responder(&self, reply_to: CorrelationId, tag: PacketTag) -> Responder {
        Responder::new(Arc::clone(&self.inner.endpoint), reply_to, tag)
    }

    fn reject(&self, reply_to: CorrelationId, tag: PacketTag, message: &str) {
        warn!(
            target: "vellum::extension",
            extension_id = %self.inner.sender.extension_id,
            %tag,
            error = message,
            "Host request failed"
        );
        self.responder(reply_to, tag)
            .respond(json!({ "error": message }));
    }
}

impl fmt::Debug for HostBroker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostBroker")
            .field("sender", &self.inner.sender)
            .finish_non_exhaustive()
    }
}

fn parse_tab_message(payload: Value) -> BridgeResult<(u64, Value)> {
    let malformed = |message: &str| BridgeError::MalformedPayload {
        tag: PacketTag::TabsMessage.as_str(),
        message: message.to_string(),
    };
    let Value::Object(mut fields) = payload else {
        return Err(malformed("expected an object"));
    };
    let tab_id = fields
        .get("tab_id")
        .and_then(Value::as_u64)
        .ok_or_else(|| malformed("missing tab_id"))?;
    let message = fields.remove("message").unwrap_or(Value::Null);
    Ok((tab_id, message))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::CapabilityBridge;
    use crate::channel::Channel;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct EchoShell {
        store: StdMutex<Map<String, Value>>,
        ports: StdMutex<Vec<HostPort>>,
        port_messages: StdMutex<Vec<Value>>,
        fail_storage: bool,
    }

    impl HostShell for EchoShell {
        fn on_runtime_message(&self, _sender: &MessageSender, message: Value, responder: Responder) {
            responder.respond(json!({ "echo": message }));
        }

        fn on_tab_message(
            &self,
            _sender: &MessageSender,
            tab_id: u64,
            _message: Value,
            responder: Responder,
        ) {
            responder.respond(json!({ "tab": tab_id }));
        }

        fn storage_get(
            &self,
            _extension: &ExtensionId,
            keys: &StorageKeys,
        ) -> Result<Map<String, Value>, HostError> {
            if self.fail_storage {
                return Err(HostError::Storage("disk full".into()));
            }
            Ok(self
                .store
                .lock()
                .unwrap()
                .iter()
                .filter(|(k, _)| keys.selects(k))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect())
        }

        fn storage_set(
            &self,
            _extension: &ExtensionId,
            items: Map<String, Value>,
        ) -> Result<(), HostError> {
            self.store.lock().unwrap().extend(items);
            Ok(())
        }

        fn on_port_connect(&self, _sender: &MessageSender, port: HostPort) {
            self.ports.lock().unwrap().push(port);
        }

        fn on_port_message(&self, _sender: &MessageSender, port: &HostPort, message: Value) {
            self.port_messages.lock().unwrap().push(message.clone());
            port.post_message(json!({ "ack": message }));
        }
    }

    fn wire(shell: Arc<EchoShell>) -> (Channel, CapabilityBridge, HostBroker) {
        let channel = Channel::open(ExtensionId::new("ext1"));
        let bridge = CapabilityBridge::new(channel.page(), BridgeConfig::default());
        let broker = HostBroker::new(shell, channel.host(), None, BridgeConfig::default());
        (channel, bridge, broker)
    }

    fn round_trip(bridge: &CapabilityBridge, broker: &HostBroker) {
        broker.pump();
        bridge.dispatch_pending();
    }

    fn capture() -> (Arc<StdMutex<Option<Value>>>, ResponseCallback) {
        let slot = Arc::new(StdMutex::new(None));
        let sink = Arc::clone(&slot);
        (slot, Box::new(move |v| *sink.lock().unwrap() = Some(v)))
    }

    #[test]
    fn test_runtime_round_trip() {
        let (_channel, bridge, broker) = wire(Arc::new(EchoShell::default()));
        let (slot, callback) = capture();

        bridge
            .chrome_api()
            .runtime
            .send_message(json!("ping"), Some(callback))
            .unwrap();
        round_trip(&bridge, &broker);

        assert_eq!(*slot.lock().unwrap(), Some(json!({"echo": "ping"})));
    }

    #[test]
    fn test_storage_round_trip() {
        let (_channel, bridge, broker) = wire(Arc::new(EchoShell::default()));
        let chrome = bridge.chrome_api();
        let mut items = Map::new();
        items.insert("theme".into(), json!("dark"));
        items.insert("size".into(), json!(12));
        chrome.storage.set(items, None).unwrap();

        let (slot, callback) = capture();
        chrome.storage.get(StorageKeys::from("theme"), callback).unwrap();
        round_trip(&bridge, &broker);

        assert_eq!(*slot.lock().unwrap(), Some(json!({"theme": "dark"})));
    }

    #[test]
    fn test_storage_failure_reported_to_page() {
        let shell = Arc::new(EchoShell {
            fail_storage: true,
            ..EchoShell::default()
        });
        let (_channel, bridge, broker) = wire(shell);
        let (slot, callback) = capture();
        bridge
            .chrome_api()
            .storage
            .get(StorageKeys::All, callback)
            .unwrap();
        round_trip(&bridge, &broker);

        let reply = slot.lock().unwrap().clone().unwrap();
        assert_eq!(reply["error"], json!("Storage error: disk full"));
    }

    #[test]
    fn test_tabs_round_trip() {
        let (_channel, bridge, broker) = wire(Arc::new(EchoShell::default()));
        let (slot, callback) = capture();
        bridge
            .chrome_api()
            .tabs
            .send_message(7, json!("hello"), Some(callback))
            .unwrap();
        round_trip(&bridge, &broker);
        assert_eq!(*slot.lock().unwrap(), Some(json!({"tab": 7})));
    }

    #[test]
    fn test_host_initiated_message() {
        let (_channel, bridge, broker) = wire(Arc::new(EchoShell::default()));
        bridge
            .chrome_api()
            .runtime
            .add_message_listener(Arc::new(|msg, respond| {
                respond.send(json!({ "page-saw": msg }));
            }));

        let (slot, callback) = capture();
        broker.send_message(json!("from host"), Some(callback)).unwrap();
        bridge.dispatch_pending();
        broker.pump();

        assert_eq!(*slot.lock().unwrap(), Some(json!({"page-saw": "from host"})));
    }

    #[test]
    fn test_port_traffic_both_ways() {
        let shell = Arc::new(EchoShell::default());
        let (_channel, bridge, broker) = wire(Arc::clone(&shell));
        let port = bridge.chrome_api().runtime.connect(Some("feed")).unwrap();
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        port.add_message_listener(Arc::new(move |v| sink.lock().unwrap().push(v)));

        port.post_message(json!(1)).unwrap();
        port.post_message(json!(2)).unwrap();
        round_trip(&bridge, &broker);

        assert_eq!(broker.open_ports(), 1);
        assert_eq!(shell.ports.lock().unwrap()[0].name(), Some("feed"));
        assert_eq!(*seen.lock().unwrap(), vec![json!({"ack": 1}), json!({"ack": 2})]);

        port.disconnect();
        broker.pump();
        assert_eq!(broker.open_ports(), 0);
    }

    #[test]
    fn test_host_disconnect_forgets_port() {
        let shell = Arc::new(EchoShell::default());
        let (_channel, bridge, broker) = wire(Arc::clone(&shell));
        let port = bridge.chrome_api().runtime.connect(Some("feed")).unwrap();
        let disconnects = Arc::new(StdMutex::new(0_u32));
        let sink = Arc::clone(&disconnects);
        port.on_disconnect(Box::new(move || *sink.lock().unwrap() += 1));
        broker.pump();
        assert_eq!(broker.open_ports(), 1);

        let host_port = shell.ports.lock().unwrap()[0].clone();
        assert!(host_port.is_open());
        assert!(host_port.disconnect());
        assert_eq!(broker.open_ports(), 0);
        assert!(!host_port.is_open());
        assert!(!host_port.disconnect());
        assert!(!host_port.post_message(json!("late")));

        // Sent before the page learns of the disconnect.
        port.post_message(json!("in flight")).unwrap();
        broker.pump();
        assert!(shell.port_messages.lock().unwrap().is_empty());

        bridge.dispatch_pending();
        assert!(!port.is_connected());
        assert_eq!(*disconnects.lock().unwrap(), 1);
    }

    #[test]
    fn test_reply_after_close_is_dropped() {
        let (_channel, bridge, broker) = wire(Arc::new(EchoShell::default()));
        let (slot, callback) = capture();
        bridge
            .chrome_api()
            .runtime
            .send_message(json!("ping"), Some(callback))
            .unwrap();
        broker.pump();
        bridge.close();
        assert_eq!(bridge.dispatch_pending(), 0);
        assert!(slot.lock().unwrap().is_none());
        assert!(broker.send_message(json!("late"), None).is_err());
    }
}
