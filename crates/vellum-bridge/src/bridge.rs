//! Page-side capability bridge.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde_json::{Map, Value, json};
use tokio::sync::oneshot;
use tracing::{debug, trace, warn};

use vellum_core::ExtensionId;

use crate::capability::{
    ChromeApi, MessageListener, RuntimeCapability, SendResponse, StorageCapability, StorageKeys,
    TabsCapability,
};
use crate::channel::Endpoint;
use crate::correlation::{PendingRequests, ResponseCallback, ResponseFuture, Waiter};
use crate::error::{BridgeError, BridgeResult};
use crate::packet::{ChannelId, Packet, PacketTag, PortId};
use crate::port::{Port, PortTable};

/// Default time to wait for a reply.
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(30);

/// Default cap on unanswered requests per channel.
pub const DEFAULT_MAX_PENDING_REQUESTS: usize = 256;

/// Default cap on open ports per channel.
pub const DEFAULT_MAX_PORTS: usize = 64;

/// Bridge limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BridgeConfig {
    /// How long a request waits for its reply.
    pub response_timeout: Duration,
    /// Maximum unanswered requests per channel.
    pub max_pending_requests: usize,
    /// Maximum open ports per channel.
    pub max_ports: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
            max_pending_requests: DEFAULT_MAX_PENDING_REQUESTS,
            max_ports: DEFAULT_MAX_PORTS,
        }
    }
}

struct BridgeInner {
    extension: ExtensionId,
    endpoint: Arc<Endpoint>,
    config: BridgeConfig,
    pending: Mutex<PendingRequests>,
    listeners: Mutex<Vec<MessageListener>>,
    ports: Arc<PortTable>,
}

/// The isolated world's view of its channel.
///
/// Implements the `runtime`, `storage.local` and `tabs` namespaces by
/// posting packets on the page endpoint. Inbound packets are processed
/// by [`dispatch_pending`](Self::dispatch_pending).
#[derive(Clone)]
pub struct CapabilityBridge {
    inner: Arc<BridgeInner>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl CapabilityBridge {
    /// Create a bridge over the page endpoint of a channel.
    #[must_use]
    pub fn new(endpoint: Arc<Endpoint>, config: BridgeConfig) -> Self {
        let pending = PendingRequests::new(
            endpoint.channel_id(),
            config.response_timeout,
            config.max_pending_requests,
        );
        Self {
            inner: Arc::new(BridgeInner {
                extension: endpoint.owner().clone(),
                endpoint,
                config,
                pending: Mutex::new(pending),
                listeners: Mutex::new(Vec::new()),
                ports: Arc::new(Mutex::new(HashMap::new())),
            }),
        }
    }

    /// Owning extension.
    #[must_use]
    pub fn extension(&self) -> &ExtensionId {
        &self.inner.extension
    }

    /// Channel this bridge talks over.
    #[must_use]
    pub fn channel_id(&self) -> ChannelId {
        self.inner.endpoint.channel_id()
    }

    /// Whether the channel has been torn down.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.endpoint.is_closed()
    }

    /// Build the `chrome` object for isolated-world code.
    #[must_use]
    pub fn chrome_api(&self) -> ChromeApi {
        ChromeApi {
            runtime: Arc::new(RuntimeApi(self.clone())),
            storage: Arc::new(StorageApi(self.clone())),
            tabs: Arc::new(TabsApi(self.clone())),
        }
    }

    /// Number of requests awaiting a reply.
    #[must_use]
    pub fn pending_requests(&self) -> usize {
        lock(&self.inner.pending).len()
    }

    /// Number of open ports.
    #[must_use]
    pub fn open_ports(&self) -> usize {
        lock(&self.inner.ports).len()
    }

    /// Process every packet queued for the page side.
    ///
    /// Replies resolve their waiters, messages reach `onMessage` listeners
    /// and port traffic reaches its port. Expired requests are swept first.
    /// Returns the number of packets handled.
    pub fn dispatch_pending(&self) -> usize {
        self.sweep_expired();

        let mut handled: usize = 0;
        while let Some(packet) = self.inner.endpoint.try_recv() {
            handled = handled.saturating_add(1);
            self.dispatch(packet);
        }
        handled
    }

    /// Tear the bridge down: close the channel and drop every waiter,
    /// listener and port without invoking them.
    pub fn close(&self) {
        self.inner.endpoint.close();
        let dropped = lock(&self.inner.pending).clear();
        lock(&self.inner.listeners).clear();
        let ports: Vec<Port> = lock(&self.inner.ports).drain().map(|(_, p)| p).collect();
        for port in &ports {
            port.abandon();
        }
        debug!(
            channel = %self.channel_id(),
            extension_id = %self.inner.extension,
            dropped_requests = dropped,
            dropped_ports = ports.len(),
            "Bridge closed"
        );
    }

    fn dispatch(&self, packet: Packet) {
        trace!(channel = %self.channel_id(), tag = %packet.tag, id = %packet.id, "Dispatch");
        match packet.tag {
            PacketTag::Response | PacketTag::StorageResponse => {
                let Some(reply_to) = packet.reply_to else {
                    debug!(tag = %packet.tag, "Reply without reply_to");
                    return;
                };
                let waiter = lock(&self.inner.pending).resolve(reply_to, Instant::now());
                if let Some(waiter) = waiter {
                    waiter.complete(packet.payload);
                }
            },
            PacketTag::Message => {
                let listeners: Vec<MessageListener> = lock(&self.inner.listeners).clone();
                if listeners.is_empty() {
                    debug!(channel = %self.channel_id(), "Message with no listeners");
                    return;
                }
                let respond = SendResponse::new(Arc::clone(&self.inner.endpoint), packet.id);
                for listener in listeners {
                    let payload = packet.payload.clone();
                    let respond = respond.clone();
                    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                        listener(payload, respond);
                    }));
                    if let Err(e) = result {
                        warn!(
                            target: "vellum::extension",
                            extension_id = %self.inner.extension,
                            error = ?e,
                            "onMessage listener panicked"
                        );
                    }
                }
            },
            PacketTag::PortMessage => {
                if let Some(port) = self.port(packet.port) {
                    port.deliver(&packet.payload);
                }
            },
            PacketTag::PortDisconnect => {
                let port = packet
                    .port
                    .and_then(|id| lock(&self.inner.ports).remove(&id));
                if let Some(port) = port {
                    port.remote_disconnect();
                }
            },
            PacketTag::StorageGet
            | PacketTag::StorageSet
            | PacketTag::TabsMessage
            | PacketTag::PortConnect => {
                debug!(tag = %packet.tag, "Host-bound packet on page side ignored");
            },
        }
    }

    fn port(&self, id: Option<PortId>) -> Option<Port> {
        let id = id?;
        let port = lock(&self.inner.ports).get(&id).cloned();
        if port.is_none() {
            debug!(port = %id, "Traffic for unknown port");
        }
        port
    }

    fn sweep_expired(&self) {
        let expired = lock(&self.inner.pending).take_expired(Instant::now());
        for (id, waiter) in expired {
            debug!(channel = %self.channel_id(), id = %id, "Request expired");
            waiter.fail(BridgeError::Timeout { id });
        }
    }

    /// Post a request, tracking `waiter` for the reply.
    fn post_request(&self, tag: PacketTag, payload: Value, waiter: Option<Waiter>) -> BridgeResult<()> {
        let endpoint = &self.inner.endpoint;
        if endpoint.is_closed() {
            debug!(channel = %self.channel_id(), %tag, "Dropping request on closed channel");
            return Ok(());
        }

        let id = endpoint.next_id();
        if let Some(waiter) = waiter {
            lock(&self.inner.pending)
                .insert(id, waiter, Instant::now())
                .map_err(|(e, _)| e)?;
        }

        if let Err(e) = endpoint.post(Packet::new(tag, id, payload)) {
            debug!(channel = %self.channel_id(), %tag, error = %e, "Dropping request");
            lock(&self.inner.pending).forget(id);
        }
        Ok(())
    }

    fn request_future(&self, tag: PacketTag, payload: Value) -> ResponseFuture {
        let endpoint = &self.inner.endpoint;
        let channel = endpoint.channel_id();
        let id = endpoint.next_id();
        if endpoint.is_closed() {
            return ResponseFuture::failed(channel, id, BridgeError::ChannelClosed { channel });
        }

        let (tx, rx) = oneshot::channel();
        let now = Instant::now();
        let deadline = {
            let mut pending = lock(&self.inner.pending);
            if let Err((e, _)) = pending.insert(id, Waiter::Future(tx), now) {
                return ResponseFuture::failed(channel, id, e);
            }
            pending.deadline_from(now)
        };

        if let Err(e) = endpoint.post(Packet::new(tag, id, payload)) {
            lock(&self.inner.pending).forget(id);
            return ResponseFuture::failed(channel, id, e);
        }
        ResponseFuture::new(channel, id, deadline, rx)
    }
}

impl fmt::Debug for CapabilityBridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapabilityBridge")
            .field("extension", &self.inner.extension)
            .field("channel", &self.channel_id())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

struct RuntimeApi(CapabilityBridge);

impl RuntimeCapability for RuntimeApi {
    fn id(&self) -> &ExtensionId {
        self.0.extension()
    }

    fn send_message(&self, message: Value, callback: Option<ResponseCallback>) -> BridgeResult<()> {
        self.0
            .post_request(PacketTag::Message, message, callback.map(Waiter::Callback))
    }

    fn request(&self, message: Value) -> ResponseFuture {
        self.0.request_future(PacketTag::Message, message)
    }

    fn add_message_listener(&self, listener: MessageListener) {
        lock(&self.0.inner.listeners).push(listener);
    }

    fn connect(&self, name: Option<&str>) -> BridgeResult<Port> {
        let inner = &self.0.inner;
        let endpoint = &inner.endpoint;
        if endpoint.is_closed() {
            return Err(BridgeError::ChannelClosed {
                channel: endpoint.channel_id(),
            });
        }

        let id = endpoint.next_id();
        let port_id = PortId(id.0);
        let port = Port::new(
            port_id,
            name.map(str::to_string),
            Arc::clone(endpoint),
            &inner.ports,
        );
        {
            let mut ports = lock(&inner.ports);
            if ports.len() >= inner.config.max_ports {
                return Err(BridgeError::TooManyPorts {
                    limit: inner.config.max_ports,
                });
            }
            ports.insert(port_id, port.clone());
        }

        let packet = Packet::new(PacketTag::PortConnect, id, json!({ "name": name }))
            .on_port(port_id);
        if let Err(e) = endpoint.post(packet) {
            lock(&inner.ports).remove(&port_id);
            return Err(e);
        }
        debug!(channel = %endpoint.channel_id(), port = %port_id, ?name, "Port opened");
        Ok(port)
    }
}

struct StorageApi(CapabilityBridge);

impl StorageCapability for StorageApi {
    fn get(&self, keys: StorageKeys, callback: ResponseCallback) -> BridgeResult<()> {
        self.0.post_request(
            PacketTag::StorageGet,
            keys.to_value(),
            Some(Waiter::Callback(callback)),
        )
    }

    fn set(
        &self,
        items: Map<String, Value>,
        callback: Option<ResponseCallback>,
    ) -> BridgeResult<()> {
        self.0.post_request(
            PacketTag::StorageSet,
            Value::Object(items),
            callback.map(Waiter::Callback),
        )
    }
}

struct TabsApi(CapabilityBridge);

impl TabsCapability for TabsApi {
    fn send_message(
        &self,
        tab_id: u64,
        message: Value,
        callback: Option<ResponseCallback>,
    ) -> BridgeResult<()> {
        self.0.post_request(
            PacketTag::TabsMessage,
            json!({ "tab_id": tab_id, "message": message }),
            callback.map(Waiter::Callback),
        )
    }
}
