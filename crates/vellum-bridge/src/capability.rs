//! The capability surface projected into isolated worlds.
//!
//! Each trait mirrors one namespace of the extension API (`runtime`,
//! `storage.local`, `tabs`). Implementations route every call through the
//! world's private channel; isolated code never sees host objects.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde_json::{Map, Value};
use tracing::debug;

use vellum_core::ExtensionId;

use crate::channel::Endpoint;
use crate::correlation::{ResponseCallback, ResponseFuture};
use crate::error::{BridgeError, BridgeResult};
use crate::packet::{CorrelationId, Packet, PacketTag};
use crate::port::Port;

/// Listener registered with `runtime.onMessage.addListener`.
pub type MessageListener = Arc<dyn Fn(Value, SendResponse) + Send + Sync>;

/// `runtime` namespace.
pub trait RuntimeCapability: Send + Sync {
    /// `runtime.id`: the owning extension.
    fn id(&self) -> &ExtensionId;

    /// `runtime.sendMessage(msg, callback?)`.
    ///
    /// The callback fires at most once, with the first reply. Sending on a
    /// torn-down channel is a silent no-op.
    ///
    /// # Errors
    ///
    /// [`BridgeError::TooManyPending`] if the channel has too many
    /// unanswered requests.
    fn send_message(&self, message: Value, callback: Option<ResponseCallback>) -> BridgeResult<()>;

    /// Future form of `sendMessage`.
    fn request(&self, message: Value) -> ResponseFuture;

    /// `runtime.onMessage.addListener(fn)`.
    fn add_message_listener(&self, listener: MessageListener);

    /// `runtime.connect(opts?)`.
    ///
    /// # Errors
    ///
    /// [`BridgeError::ChannelClosed`] on a torn-down channel, or
    /// [`BridgeError::TooManyPorts`] when the port limit is reached.
    fn connect(&self, name: Option<&str>) -> BridgeResult<Port>;
}

/// `storage.local` namespace.
pub trait StorageCapability: Send + Sync {
    /// `storage.local.get(keys, callback)`.
    ///
    /// # Errors
    ///
    /// [`BridgeError::TooManyPending`] if the channel has too many
    /// unanswered requests.
    fn get(&self, keys: StorageKeys, callback: ResponseCallback) -> BridgeResult<()>;

    /// `storage.local.set(items, callback?)`.
    ///
    /// # Errors
    ///
    /// [`BridgeError::TooManyPending`] if the channel has too many
    /// unanswered requests.
    fn set(&self, items: Map<String, Value>, callback: Option<ResponseCallback>)
    -> BridgeResult<()>;
}

/// `tabs` namespace.
pub trait TabsCapability: Send + Sync {
    /// `tabs.sendMessage(tabId, msg, callback?)`.
    ///
    /// # Errors
    ///
    /// [`BridgeError::TooManyPending`] if the channel has too many
    /// unanswered requests.
    fn send_message(
        &self,
        tab_id: u64,
        message: Value,
        callback: Option<ResponseCallback>,
    ) -> BridgeResult<()>;
}

/// The `chrome` object handed to isolated-world code.
#[derive(Clone)]
pub struct ChromeApi {
    /// `chrome.runtime`.
    pub runtime: Arc<dyn RuntimeCapability>,
    /// `chrome.storage.local`.
    pub storage: Arc<dyn StorageCapability>,
    /// `chrome.tabs`.
    pub tabs: Arc<dyn TabsCapability>,
}

impl fmt::Debug for ChromeApi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChromeApi")
            .field("runtime.id", self.runtime.id())
            .finish_non_exhaustive()
    }
}

/// Keys argument of `storage.local.get`.
#[derive(Debug, Clone, PartialEq)]
pub enum StorageKeys {
    /// `null`: every stored item.
    All,
    /// A single key.
    One(String),
    /// A list of keys.
    Many(Vec<String>),
    /// An object of keys with default values.
    Defaults(Map<String, Value>),
}

impl StorageKeys {
    /// Wire form.
    #[must_use]
    pub fn to_value(&self) -> Value {
        match self {
            Self::All => Value::Null,
            Self::One(key) => Value::String(key.clone()),
            Self::Many(keys) => Value::Array(keys.iter().cloned().map(Value::String).collect()),
            Self::Defaults(defaults) => Value::Object(defaults.clone()),
        }
    }

    /// Parse the wire form.
    ///
    /// # Errors
    ///
    /// [`BridgeError::MalformedPayload`] for numbers, booleans, or lists
    /// containing non-strings.
    pub fn from_value(value: Value) -> BridgeResult<Self> {
        let malformed = |message: &str| BridgeError::MalformedPayload {
            tag: PacketTag::StorageGet.as_str(),
            message: message.to_string(),
        };
        match value {
            Value::Null => Ok(Self::All),
            Value::String(key) => Ok(Self::One(key)),
            Value::Array(items) => items
                .into_iter()
                .map(|item| match item {
                    Value::String(key) => Ok(key),
                    _ => Err(malformed("key list must contain only strings")),
                })
                .collect::<BridgeResult<Vec<_>>>()
                .map(Self::Many),
            Value::Object(defaults) => Ok(Self::Defaults(defaults)),
            Value::Bool(_) | Value::Number(_) => {
                Err(malformed("keys must be null, a string, a list or an object"))
            },
        }
    }

    /// Whether `key` is selected.
    #[must_use]
    pub fn selects(&self, key: &str) -> bool {
        match self {
            Self::All => true,
            Self::One(k) => k == key,
            Self::Many(keys) => keys.iter().any(|k| k == key),
            Self::Defaults(defaults) => defaults.contains_key(key),
        }
    }
}

impl From<&str> for StorageKeys {
    fn from(key: &str) -> Self {
        Self::One(key.to_string())
    }
}

/// The `sendResponse` argument passed to `onMessage` listeners.
///
/// Only the first call posts a reply; later calls are ignored.
#[derive(Clone)]
pub struct SendResponse {
    endpoint: Arc<Endpoint>,
    reply_to: CorrelationId,
    used: Arc<AtomicBool>,
}

impl SendResponse {
    pub(crate) fn new(endpoint: Arc<Endpoint>, reply_to: CorrelationId) -> Self {
        Self {
            endpoint,
            reply_to,
            used: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Post the reply. Returns `false` if a reply was already sent or the
    /// channel is gone.
    pub fn send(&self, response: Value) -> bool {
        if self.used.swap(true, Ordering::AcqRel) {
            return false;
        }
        let packet = Packet::new(PacketTag::Response, self.endpoint.next_id(), response)
            .replying_to(self.reply_to);
        match self.endpoint.post(packet) {
            Ok(()) => true,
            Err(e) => {
                debug!(reply_to = %self.reply_to, error = %e, "Dropping response");
                false
            },
        }
    }
}

impl fmt::Debug for SendResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SendResponse")
            .field("reply_to", &self.reply_to)
            .field("used", &self.used.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::Channel;
    use serde_json::json;

    #[test]
    fn test_storage_keys_parse() {
        assert_eq!(StorageKeys::from_value(Value::Null).unwrap(), StorageKeys::All);
        assert_eq!(
            StorageKeys::from_value(json!("theme")).unwrap(),
            StorageKeys::One("theme".into())
        );
        assert_eq!(
            StorageKeys::from_value(json!(["a", "b"])).unwrap(),
            StorageKeys::Many(vec!["a".into(), "b".into()])
        );
        assert!(StorageKeys::from_value(json!([1])).is_err());
        assert!(StorageKeys::from_value(json!(true)).is_err());
    }

    #[test]
    fn test_storage_keys_selects() {
        let keys = StorageKeys::from_value(json!({"theme": "dark"})).unwrap();
        assert!(keys.selects("theme"));
        assert!(!keys.selects("font"));
        assert!(StorageKeys::All.selects("anything"));
    }

    #[test]
    fn test_send_response_is_one_shot() {
        let channel = Channel::open(ExtensionId::new("ext1"));
        let respond = SendResponse::new(channel.page(), CorrelationId(3));

        assert!(respond.send(json!(1)));
        assert!(!respond.clone().send(json!(2)));

        let packet = channel.host().try_recv().unwrap();
        assert_eq!(packet.tag, PacketTag::Response);
        assert_eq!(packet.reply_to, Some(CorrelationId(3)));
        assert!(channel.host().try_recv().is_none());
    }
}
