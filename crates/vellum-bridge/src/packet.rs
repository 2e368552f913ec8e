//! Wire packets exchanged over a channel.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Identifier of one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelId(Uuid);

impl ChannelId {
    /// Create a new random channel ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ChannelId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "chan:{}", &self.0.simple().to_string()[..8])
    }
}

/// Per-channel packet identifier used to correlate replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(pub u64);

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Identifier of a long-lived port within a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PortId(pub u64);

impl fmt::Display for PortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "port:{}", self.0)
    }
}

/// What a packet carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PacketTag {
    /// `runtime.sendMessage` in either direction.
    Message,
    /// Reply to a `message`.
    Response,
    /// `storage.local.get`.
    StorageGet,
    /// `storage.local.set`.
    StorageSet,
    /// Reply to a storage request.
    StorageResponse,
    /// `tabs.sendMessage`.
    TabsMessage,
    /// `runtime.connect`.
    PortConnect,
    /// `port.postMessage`.
    PortMessage,
    /// `port.disconnect`.
    PortDisconnect,
}

impl PacketTag {
    /// Wire name of the tag.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Message => "message",
            Self::Response => "response",
            Self::StorageGet => "storage-get",
            Self::StorageSet => "storage-set",
            Self::StorageResponse => "storage-response",
            Self::TabsMessage => "tabs-message",
            Self::PortConnect => "port-connect",
            Self::PortMessage => "port-message",
            Self::PortDisconnect => "port-disconnect",
        }
    }
}

impl fmt::Display for PacketTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One unit of traffic on a channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Packet {
    /// Packet kind.
    pub tag: PacketTag,
    /// Channel-unique packet ID.
    pub id: CorrelationId,
    /// The request this packet answers, for replies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<CorrelationId>,
    /// The port this packet belongs to, for port traffic.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<PortId>,
    /// Message body.
    #[serde(default)]
    pub payload: Value,
}

impl Packet {
    /// Create a packet.
    #[must_use]
    pub fn new(tag: PacketTag, id: CorrelationId, payload: Value) -> Self {
        Self {
            tag,
            id,
            reply_to: None,
            port: None,
            payload,
        }
    }

    /// Mark this packet as the reply to `request`.
    #[must_use]
    pub fn replying_to(mut self, request: CorrelationId) -> Self {
        self.reply_to = Some(request);
        self
    }

    /// Attach this packet to a port.
    #[must_use]
    pub fn on_port(mut self, port: PortId) -> Self {
        self.port = Some(port);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wire_shape() {
        let packet = Packet::new(PacketTag::StorageResponse, CorrelationId(7), json!({"a": 1}))
            .replying_to(CorrelationId(3));
        let value = serde_json::to_value(&packet).unwrap();
        assert_eq!(
            value,
            json!({"tag": "storage-response", "id": 7, "reply_to": 3, "payload": {"a": 1}})
        );
    }

    #[test]
    fn test_parse_port_packet() {
        let packet: Packet =
            serde_json::from_str(r#"{"tag":"port-message","id":2,"port":5,"payload":"hi"}"#)
                .unwrap();
        assert_eq!(packet.tag, PacketTag::PortMessage);
        assert_eq!(packet.port, Some(PortId(5)));
        assert_eq!(packet.reply_to, None);
    }

    #[test]
    fn test_unknown_tag_rejected() {
        let result: Result<Packet, _> =
            serde_json::from_str(r#"{"tag":"eval","id":1,"payload":null}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_tag_names_match_serde() {
        for tag in [
            PacketTag::Message,
            PacketTag::Response,
            PacketTag::StorageGet,
            PacketTag::StorageSet,
            PacketTag::StorageResponse,
            PacketTag::TabsMessage,
            PacketTag::PortConnect,
            PacketTag::PortMessage,
            PacketTag::PortDisconnect,
        ] {
            assert_eq!(serde_json::to_value(tag).unwrap(), Value::from(tag.as_str()));
        }
    }
}
