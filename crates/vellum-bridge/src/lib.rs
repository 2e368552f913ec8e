//! Vellum Bridge - The capability surface of isolated worlds.
//!
//! Every isolated world gets a private [`Channel`] to its owning extension.
//! Page code only ever sees the [`ChromeApi`] built by a
//! [`CapabilityBridge`]; every call becomes a tagged [`Packet`] on the
//! channel, and the [`HostBroker`] on the other end forwards it to the
//! [`HostShell`].
//!
//! ```text
//! isolated world                      host
//! ──────────────                      ────
//! chrome.runtime.sendMessage ─┐
//! chrome.storage.local.get   ─┼─▶ page endpoint ══ channel ══ host endpoint ─▶ HostBroker ─▶ HostShell
//! chrome.tabs.sendMessage    ─┘
//! ```
//!
//! Replies are correlated by packet ID with a deadline. Once a channel is
//! closed, queued packets are discarded and late replies never reach a
//! stale callback.
//!
//! # Example
//!
//! ```
//! use std::sync::{Arc, Mutex};
//!
//! use serde_json::json;
//! use vellum_bridge::{BridgeConfig, CapabilityBridge, Channel};
//! use vellum_core::ExtensionId;
//!
//! let channel = Channel::open(ExtensionId::new("ext1"));
//! let bridge = CapabilityBridge::new(channel.page(), BridgeConfig::default());
//! let chrome = bridge.chrome_api();
//!
//! let reply = Arc::new(Mutex::new(None));
//! let slot = Arc::clone(&reply);
//! chrome
//!     .runtime
//!     .send_message(json!("ping"), Some(Box::new(move |v| *slot.lock().unwrap() = Some(v))))
//!     .unwrap();
//!
//! // Pretend to be the host.
//! let request = channel.host().try_recv().unwrap();
//! let host = channel.host();
//! host.post(
//!     vellum_bridge::Packet::new(vellum_bridge::PacketTag::Response, host.next_id(), json!("pong"))
//!         .replying_to(request.id),
//! )
//! .unwrap();
//!
//! bridge.dispatch_pending();
//! assert_eq!(*reply.lock().unwrap(), Some(json!("pong")));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

mod bridge;
mod capability;
mod channel;
mod correlation;
mod error;
mod host;
mod packet;
mod port;

pub use bridge::{
    BridgeConfig, CapabilityBridge, DEFAULT_MAX_PENDING_REQUESTS, DEFAULT_MAX_PORTS,
    DEFAULT_RESPONSE_TIMEOUT,
};
pub use capability::{
    ChromeApi, MessageListener, RuntimeCapability, SendResponse, StorageCapability, StorageKeys,
    TabsCapability,
};
pub use channel::{Channel, Endpoint, Side};
pub use correlation::{ResponseCallback, ResponseFuture};
pub use error::{BridgeError, BridgeResult, HostError};
pub use host::{HostBroker, HostPort, HostShell, MessageSender, Responder};
pub use packet::{ChannelId, CorrelationId, Packet, PacketTag, PortId};
pub use port::{DisconnectListener, Port, PortListener};
