//! Registry Events
//!
//! Events emitted by the ingestion pipeline for external consumers to react
//! to registry refreshes.

use serde::{Deserialize, Serialize};

/// Events emitted while ingesting declarations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegistryEvent {
    /// A node and its component set were written
    NodeIngested {
        node_id: String,
        origin: String,
        component_count: u32,
    },

    /// A declaration was skipped
    ItemRejected {
        origin: String,
        kind: String,
        reason: String,
    },

    /// A bootstrap pass finished
    RefreshCompleted { ingested: u32, failed: u32 },
}
