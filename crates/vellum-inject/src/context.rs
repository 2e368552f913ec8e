//! Per-document injection state.
//!
//! Every navigation gets one [`DocumentContext`] owned by the coordinator's
//! arena. It holds the document's records, style markers and isolated-world
//! channels, and is consumed by [`DocumentContext::teardown`].

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use vellum_bridge::{BridgeConfig, CapabilityBridge, Channel, HostBroker, HostShell};
use vellum_core::{Document, DocumentId, ExtensionId, InjectionRecord, RunAt};
use vellum_sandbox::StyleMarkers;

use crate::registry::MatchedRule;

/// Injection state of one document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentState {
    /// Navigated, not yet matched.
    Idle,
    /// Rules matched, not yet scheduled.
    Matched,
    /// Waiting for one or more phases.
    Scheduled,
    /// Every phase ran, or nothing matched.
    Done,
    /// Torn down; its records and channels are gone.
    TornDown,
}

impl fmt::Display for DocumentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Matched => "matched",
            Self::Scheduled => "scheduled",
            Self::Done => "done",
            Self::TornDown => "torn_down",
        };
        f.write_str(name)
    }
}

/// What a teardown released.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TeardownReport {
    /// The torn-down document.
    pub document_id: DocumentId,
    /// State the document was in.
    pub previous: DocumentState,
    /// Style elements removed from the page.
    pub markers_detached: usize,
    /// Channels closed.
    pub channels_closed: usize,
    /// Injection records discarded.
    pub records_cleared: usize,
}

/// One extension's isolated world in one document.
struct IsolatedWorld {
    channel: Channel,
    bridge: CapabilityBridge,
    broker: HostBroker,
}

impl IsolatedWorld {
    fn open(
        extension: &ExtensionId,
        document_id: DocumentId,
        shell: &Arc<dyn HostShell>,
        config: BridgeConfig,
    ) -> Self {
        let channel = Channel::open(extension.clone());
        let bridge = CapabilityBridge::new(channel.page(), config);
        let broker = HostBroker::new(Arc::clone(shell), channel.host(), Some(document_id), config);
        debug!(
            extension_id = %extension,
            document_id = %document_id,
            channel = %channel.id(),
            "Isolated world opened"
        );
        Self {
            channel,
            bridge,
            broker,
        }
    }

    /// Returns `true` if the channel was still open.
    fn close(&self) -> bool {
        let was_open = !self.channel.is_closed();
        self.bridge.close();
        self.broker.close();
        self.channel.close();
        was_open
    }
}

/// Arena entry for one navigated document.
pub(crate) struct DocumentContext {
    pub(crate) document: Arc<dyn Document>,
    pub(crate) url: String,
    pub(crate) navigation: u64,
    pub(crate) state: DocumentState,
    pub(crate) phases: BTreeMap<RunAt, Vec<MatchedRule>>,
    pub(crate) markers: StyleMarkers,
    records: Vec<InjectionRecord>,
    worlds: HashMap<ExtensionId, IsolatedWorld>,
}

impl DocumentContext {
    pub(crate) fn new(document: Arc<dyn Document>, url: &str, navigation: u64) -> Self {
        Self {
            document,
            url: url.to_string(),
            navigation,
            state: DocumentState::Idle,
            phases: BTreeMap::new(),
            markers: StyleMarkers::new(),
            records: Vec::new(),
            worlds: HashMap::new(),
        }
    }

    pub(crate) fn document_id(&self) -> DocumentId {
        self.document.id()
    }

    pub(crate) fn transition(&mut self, to: DocumentState) {
        debug!(
            document_id = %self.document_id(),
            from = %self.state,
            to = %to,
            "Document state"
        );
        self.state = to;
    }

    /// Add a record unless an equal one exists. Returns `false` on a duplicate.
    pub(crate) fn try_record(&mut self, record: InjectionRecord) -> bool {
        if self.records.contains(&record) {
            return false;
        }
        self.records.push(record);
        true
    }

    pub(crate) fn records(&self) -> &[InjectionRecord] {
        &self.records
    }

    /// The extension's bridge, opening its world on first use.
    pub(crate) fn bridge_for(
        &mut self,
        extension: &ExtensionId,
        shell: &Arc<dyn HostShell>,
        config: BridgeConfig,
    ) -> CapabilityBridge {
        let document_id = self.document_id();
        self.worlds
            .entry(extension.clone())
            .or_insert_with(|| IsolatedWorld::open(extension, document_id, shell, config))
            .bridge
            .clone()
    }

    pub(crate) fn broker_for(&self, extension: &ExtensionId) -> Option<HostBroker> {
        self.worlds.get(extension).map(|w| w.broker.clone())
    }

    /// Both ends of every open world, for pumping outside the arena lock.
    pub(crate) fn endpoints(&self) -> Vec<(CapabilityBridge, HostBroker)> {
        self.worlds
            .values()
            .filter(|w| !w.channel.is_closed())
            .map(|w| (w.bridge.clone(), w.broker.clone()))
            .collect()
    }

    pub(crate) fn open_channels(&self) -> usize {
        self.worlds
            .values()
            .filter(|w| !w.channel.is_closed())
            .count()
    }

    /// Close and forget one extension's world.
    pub(crate) fn close_world(&mut self, extension: &ExtensionId) -> bool {
        self.worlds
            .remove(extension)
            .is_some_and(|world| world.close())
    }

    /// Detach markers, close channels, then clear records.
    pub(crate) fn teardown(mut self) -> TeardownReport {
        let previous = self.state;
        let document_id = self.document_id();

        let markers_detached = self.markers.detach_all(self.document.as_ref());
        self.markers.clear();

        let channels_closed = self
            .worlds
            .drain()
            .filter(|(_, world)| world.close())
            .count();

        let records_cleared = self.records.len();
        self.records.clear();
        self.phases.clear();
        self.transition(DocumentState::TornDown);

        TeardownReport {
            document_id,
            previous,
            markers_detached,
            channels_closed,
            records_cleared,
        }
    }
}

impl fmt::Debug for DocumentContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DocumentContext")
            .field("document_id", &self.document_id())
            .field("url", &self.url)
            .field("state", &self.state)
            .field("records", &self.records.len())
            .field("worlds", &self.worlds.len())
            .finish_non_exhaustive()
    }
}
