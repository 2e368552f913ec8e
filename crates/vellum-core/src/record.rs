//! Injection records.

use serde::{Deserialize, Serialize};

use crate::ids::{DocumentId, ExtensionId, ResourceRef};
use crate::rule::RunAt;

/// Dedup key for one injected resource.
///
/// Created when execution of the resource begins, never mutated, and
/// discarded when its document is torn down.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InjectionRecord {
    /// Extension that owns the resource.
    pub extension_id: ExtensionId,
    /// Injected resource.
    pub resource: ResourceRef,
    /// Phase it was injected at.
    pub phase: RunAt,
    /// Target document.
    pub document_id: DocumentId,
}

impl InjectionRecord {
    /// Create a record.
    #[must_use]
    pub fn new(
        extension_id: ExtensionId,
        resource: ResourceRef,
        phase: RunAt,
        document_id: DocumentId,
    ) -> Self {
        Self {
            extension_id,
            resource,
            phase,
            document_id,
        }
    }
}
