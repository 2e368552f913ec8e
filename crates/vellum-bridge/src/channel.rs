//! Bidirectional private channel between an isolated world and the host.
//!
//! A [`Channel`] owns two [`Endpoint`]s sharing one closed flag. Packets
//! are queued and delivered cooperatively: nothing is dispatched until the
//! receiving side drains its inbox. Closing either endpoint closes both and
//! discards everything still queued.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc;
use tracing::{debug, trace};

use vellum_core::ExtensionId;

use crate::error::{BridgeError, BridgeResult};
use crate::packet::{ChannelId, CorrelationId, Packet};

/// Which side of a channel an endpoint belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    /// The isolated world.
    Page,
    /// The host shell.
    Host,
}

struct ChannelShared {
    id: ChannelId,
    owner: ExtensionId,
    closed: AtomicBool,
    next_id: AtomicU64,
    page_inbox: Mutex<mpsc::UnboundedReceiver<Packet>>,
    host_inbox: Mutex<mpsc::UnboundedReceiver<Packet>>,
}

impl ChannelShared {
    fn inbox(&self, side: Side) -> &Mutex<mpsc::UnboundedReceiver<Packet>> {
        match side {
            Side::Page => &self.page_inbox,
            Side::Host => &self.host_inbox,
        }
    }

    fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        let mut dropped: usize = 0;
        for side in [Side::Page, Side::Host] {
            let mut inbox = self.inbox(side).lock().unwrap_or_else(PoisonError::into_inner);
            inbox.close();
            while inbox.try_recv().is_ok() {
                dropped = dropped.saturating_add(1);
            }
        }
        debug!(channel = %self.id, extension_id = %self.owner, dropped, "Channel closed");
        true
    }
}

/// One end of a [`Channel`].
pub struct Endpoint {
    side: Side,
    shared: Arc<ChannelShared>,
    outbox: mpsc::UnboundedSender<Packet>,
}

impl Endpoint {
    /// Which side this endpoint is on.
    #[must_use]
    pub fn side(&self) -> Side {
        self.side
    }

    /// The channel this endpoint belongs to.
    #[must_use]
    pub fn channel_id(&self) -> ChannelId {
        self.shared.id
    }

    /// The extension that owns the channel.
    #[must_use]
    pub fn owner(&self) -> &ExtensionId {
        &self.shared.owner
    }

    /// Whether the channel has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Allocate a channel-unique packet ID.
    pub fn next_id(&self) -> CorrelationId {
        CorrelationId(self.shared.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Queue a packet for the other side.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::ChannelClosed`] if the channel was closed.
    pub fn post(&self, packet: Packet) -> BridgeResult<()> {
        let closed = BridgeError::ChannelClosed {
            channel: self.shared.id,
        };
        if self.is_closed() {
            return Err(closed);
        }
        trace!(channel = %self.shared.id, side = ?self.side, tag = %packet.tag, id = %packet.id, "Post");
        self.outbox.send(packet).map_err(|_| closed)
    }

    /// Take the next packet addressed to this side, if any.
    ///
    /// Returns `None` once the channel is closed, even if packets were queued.
    pub fn try_recv(&self) -> Option<Packet> {
        if self.is_closed() {
            return None;
        }
        self.shared
            .inbox(self.side)
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .try_recv()
            .ok()
    }

    /// Close the channel for both sides. Returns `false` if it was already closed.
    pub fn close(&self) -> bool {
        self.shared.close()
    }
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("channel", &self.shared.id)
            .field("side", &self.side)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

/// A private channel owned by one extension's isolated world.
#[derive(Debug, Clone)]
pub struct Channel {
    page: Arc<Endpoint>,
    host: Arc<Endpoint>,
}

impl Channel {
    /// Open a new channel for `owner`.
    #[must_use]
    pub fn open(owner: ExtensionId) -> Self {
        let (to_host, host_inbox) = mpsc::unbounded_channel();
        let (to_page, page_inbox) = mpsc::unbounded_channel();
        let shared = Arc::new(ChannelShared {
            id: ChannelId::new(),
            owner,
            closed: AtomicBool::new(false),
            next_id: AtomicU64::new(1),
            page_inbox: Mutex::new(page_inbox),
            host_inbox: Mutex::new(host_inbox),
        });
        debug!(channel = %shared.id, extension_id = %shared.owner, "Channel opened");

        Self {
            page: Arc::new(Endpoint {
                side: Side::Page,
                shared: Arc::clone(&shared),
                outbox: to_host,
            }),
            host: Arc::new(Endpoint {
                side: Side::Host,
                shared,
                outbox: to_page,
            }),
        }
    }

    /// Channel ID.
    #[must_use]
    pub fn id(&self) -> ChannelId {
        self.page.channel_id()
    }

    /// Owning extension.
    #[must_use]
    pub fn owner(&self) -> &ExtensionId {
        self.page.owner()
    }

    /// The isolated-world endpoint.
    #[must_use]
    pub fn page(&self) -> Arc<Endpoint> {
        Arc::clone(&self.page)
    }

    /// The host endpoint.
    #[must_use]
    pub fn host(&self) -> Arc<Endpoint> {
        Arc::clone(&self.host)
    }

    /// Whether the channel has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.page.is_closed()
    }

    /// Close both endpoints. Returns `false` if already closed.
    pub fn close(&self) -> bool {
        self.page.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::PacketTag;
    use serde_json::json;

    fn packet(channel: &Channel, body: &str) -> Packet {
        Packet::new(PacketTag::Message, channel.page().next_id(), json!(body))
    }

    #[test]
    fn test_packets_cross_sides() {
        let channel = Channel::open(ExtensionId::new("ext1"));
        channel.page().post(packet(&channel, "up")).unwrap();
        channel.host().post(packet(&channel, "down")).unwrap();

        assert_eq!(channel.host().try_recv().unwrap().payload, json!("up"));
        assert_eq!(channel.page().try_recv().unwrap().payload, json!("down"));
        assert!(channel.page().try_recv().is_none());
        assert!(channel.host().try_recv().is_none());
    }

    #[test]
    fn test_ids_are_unique_across_sides() {
        let channel = Channel::open(ExtensionId::new("ext1"));
        let a = channel.page().next_id();
        let b = channel.host().next_id();
        let c = channel.page().next_id();
        assert_ne!(a, b);
        assert_ne!(b, c);
        assert!(a < c);
    }

    #[test]
    fn test_close_drops_queued_packets() {
        let channel = Channel::open(ExtensionId::new("ext1"));
        channel.page().post(packet(&channel, "queued")).unwrap();

        assert!(channel.host().close());
        assert!(!channel.close());
        assert!(channel.is_closed());
        assert!(channel.host().try_recv().is_none());
    }

    #[test]
    fn test_post_after_close_fails() {
        let channel = Channel::open(ExtensionId::new("ext1"));
        channel.close();
        let err = channel.page().post(packet(&channel, "late")).unwrap_err();
        assert_eq!(
            err,
            BridgeError::ChannelClosed {
                channel: channel.id()
            }
        );
    }
}
