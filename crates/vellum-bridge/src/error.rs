//! Bridge error types.

use thiserror::Error;

use crate::packet::{ChannelId, CorrelationId, PortId};

/// Errors raised by the capability bridge.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BridgeError {
    /// The channel was torn down.
    #[error("Channel {channel} is closed")]
    ChannelClosed {
        /// The closed channel.
        channel: ChannelId,
    },

    /// No response arrived before the deadline.
    #[error("Request {id} timed out")]
    Timeout {
        /// Correlation ID of the request.
        id: CorrelationId,
    },

    /// Too many requests are awaiting a response on one channel.
    #[error("Too many pending requests (limit {limit})")]
    TooManyPending {
        /// Configured limit.
        limit: usize,
    },

    /// Too many ports are open on one channel.
    #[error("Too many open ports (limit {limit})")]
    TooManyPorts {
        /// Configured limit.
        limit: usize,
    },

    /// The port was disconnected.
    #[error("Port {port} is disconnected")]
    PortDisconnected {
        /// The disconnected port.
        port: PortId,
    },

    /// A packet payload did not have the expected shape.
    #[error("Malformed {tag} payload: {message}")]
    MalformedPayload {
        /// Packet tag.
        tag: &'static str,
        /// What was wrong.
        message: String,
    },
}

/// Result type for bridge operations.
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Errors a [`HostShell`](crate::HostShell) reports back to the page.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HostError {
    /// The storage backend failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// The host could not route a message to the addressed tab.
    #[error("No tab with id {tab_id}")]
    UnknownTab {
        /// Addressed tab.
        tab_id: u64,
    },
}
