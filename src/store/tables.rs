//! redb table definitions for the registry store.
//!
//! Node rows are JSON-serialized into `&[u8]` values. Component mappings use
//! tuple keys so that all rows of one node (or one component class) are
//! contiguous and can be range-scanned.

use redb::TableDefinition;

/// Node records keyed by `node_id`.
pub const NODES: TableDefinition<&str, &[u8]> = TableDefinition::new("nodes");

/// Module paths keyed by `(node_id, component_class)`.
pub const COMPONENTS: TableDefinition<(&str, &str), &str> = TableDefinition::new("components");

/// Reverse index keyed by `(component_class, node_id)`.
pub const COMPONENT_OWNERS: TableDefinition<(&str, &str), &str> =
    TableDefinition::new("component_owners");
