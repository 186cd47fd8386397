//! Domain Ports - Core trait definitions for the registry
//!
//! These traits define the boundaries between the registry logic and its
//! storage engine and runtime environment. Adapters implement these traits
//! to provide concrete functionality.

use crate::domain::model::{ComponentMap, ComponentOwner, Node, OwnedComponent};
use crate::error::Result;
use async_trait::async_trait;

// =============================================================================
// Node Store Port
// =============================================================================

/// Durable keyed storage for nodes and their component mappings
///
/// Every method is transactional for a single node. Readers observe either
/// the previous or the next complete component set of a node, never a mix.
#[async_trait]
pub trait NodeStore: Send + Sync {
    /// Insert or replace a node by `node_id`
    async fn put_node(&self, node: &Node) -> Result<()>;

    /// Atomically clear and rewrite the mapping set of one node.
    /// Fails with `NodeNotFound` when no node row exists.
    async fn replace_components(&self, node_id: &str, components: &ComponentMap) -> Result<()>;

    /// Write the node and replace its mapping set in one transaction
    async fn apply_node(&self, node: &Node, components: &ComponentMap) -> Result<()>;

    /// Fetch one node regardless of status
    async fn get_node(&self, node_id: &str) -> Result<Option<Node>>;

    /// All nodes with `status == active`, ordered by `node_id`
    async fn list_active_nodes(&self) -> Result<Vec<Node>>;

    /// Mapping set of one node (empty if unknown)
    async fn get_components(&self, node_id: &str) -> Result<ComponentMap>;

    /// First active owner of `component_class` in `node_id` order
    async fn find_node_by_component(&self, component_class: &str)
        -> Result<Option<ComponentOwner>>;

    /// Like [`find_node_by_component`](Self::find_node_by_component), also
    /// returning the owner's record and mapping set from the same snapshot
    async fn resolve_component(&self, component_class: &str) -> Result<Option<OwnedComponent>>;

    /// Change a node's status. Returns false if the node is unknown.
    async fn set_status(&self, node_id: &str, status: &str) -> Result<bool>;
}

// =============================================================================
// Execution Context Port
// =============================================================================

/// Answers whether the registry runs inside a container network where
/// loopback URLs must be rewritten to service names.
///
/// Implementations must be best-effort: probe failures mean "no".
#[async_trait]
pub trait ExecutionContext: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// Whether `service_name` should be used in place of loopback hosts
    async fn is_containerized(&self, service_name: &str) -> bool;
}
