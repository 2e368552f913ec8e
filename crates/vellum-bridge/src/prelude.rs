//! Prelude module - commonly used types for convenient import.
//!
//! Use `use vellum_bridge::prelude::*;` to import all essential types.

// Errors
pub use crate::{BridgeError, BridgeResult, HostError};

// Channels
pub use crate::{BridgeConfig, CapabilityBridge, Channel, HostBroker};

// Capability surface
pub use crate::{
    ChromeApi, Port, ResponseFuture, RuntimeCapability, SendResponse, StorageCapability,
    StorageKeys, TabsCapability,
};

// Host side
pub use crate::{HostPort, HostShell, MessageSender, Responder};
