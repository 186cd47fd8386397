//! redb-backed node store
//!
//! Implements [`NodeStore`] on an embedded redb database. Every mutation is
//! a single write transaction and every read uses its own read transaction,
//! so a node's component set is always observed whole. Reverse resolution
//! reads the owner, its record and its mapping set from one snapshot. Blocking redb calls
//! run on the tokio blocking pool.

use crate::domain::model::{ComponentMap, ComponentOwner, Node, OwnedComponent};
use crate::domain::ports::NodeStore;
use crate::error::{Error, Result};
use crate::store::tables::{COMPONENTS, COMPONENT_OWNERS, NODES};
use async_trait::async_trait;
use redb::{Database, ReadableDatabase, ReadableTable, Table, WriteTransaction};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Convert any `Display` error into an `Error` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| Error::$variant(e.to_string())
    };
}

// =============================================================================
// Store Handle
// =============================================================================

/// Thread-safe registry store backed by redb
#[derive(Clone)]
pub struct RedbNodeStore {
    db: Arc<Database>,
}

impl std::fmt::Debug for RedbNodeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbNodeStore").finish_non_exhaustive()
    }
}

impl RedbNodeStore {
    /// Open (or create) a persistent store at the given path.
    ///
    /// A missing file is created with a fresh schema.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(map_err!(StorageOpen))?;
            }
        }
        let db = Database::create(path).map_err(map_err!(StorageOpen))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        info!(path = %path.display(), "Registry store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory store (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(StorageOpen))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("In-memory registry store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> Result<()> {
        let txn = self.db.begin_write().map_err(map_err!(StorageTransaction))?;
        txn.open_table(NODES).map_err(map_err!(StorageTable))?;
        txn.open_table(COMPONENTS).map_err(map_err!(StorageTable))?;
        txn.open_table(COMPONENT_OWNERS).map_err(map_err!(StorageTable))?;
        txn.commit().map_err(map_err!(StorageTransaction))?;
        Ok(())
    }

    /// Run a blocking store operation off the async executor
    async fn blocking<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Database) -> Result<T> + Send + 'static,
    {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || op(&db))
            .await
            .map_err(|e| Error::Internal(format!("store task failed: {}", e)))?
    }
}

// =============================================================================
// Transaction Helpers
// =============================================================================

fn encode_node(node: &Node) -> Result<Vec<u8>> {
    serde_json::to_vec(node).map_err(map_err!(Serialization))
}

fn decode_node(bytes: &[u8]) -> Result<Node> {
    serde_json::from_slice(bytes).map_err(map_err!(Serialization))
}

fn write_node(txn: &WriteTransaction, node: &Node) -> Result<()> {
    let value = encode_node(node)?;
    let mut nodes = txn.open_table(NODES).map_err(map_err!(StorageTable))?;
    nodes
        .insert(node.node_id.as_str(), value.as_slice())
        .map_err(map_err!(StorageWrite))?;
    Ok(())
}

/// Class names currently mapped for `node_id`
fn mapped_classes(
    components: &Table<'_, (&'static str, &'static str), &'static str>,
    node_id: &str,
) -> Result<Vec<String>> {
    let mut classes = Vec::new();
    for entry in components
        .range((node_id, "")..)
        .map_err(map_err!(StorageRead))?
    {
        let (key, _) = entry.map_err(map_err!(StorageRead))?;
        let (owner, class) = key.value();
        if owner != node_id {
            break;
        }
        classes.push(class.to_string());
    }
    Ok(classes)
}

fn write_components(txn: &WriteTransaction, node_id: &str, map: &ComponentMap) -> Result<()> {
    let mut components = txn.open_table(COMPONENTS).map_err(map_err!(StorageTable))?;
    let mut owners = txn
        .open_table(COMPONENT_OWNERS)
        .map_err(map_err!(StorageTable))?;

    for class in mapped_classes(&components, node_id)? {
        components
            .remove((node_id, class.as_str()))
            .map_err(map_err!(StorageWrite))?;
        owners
            .remove((class.as_str(), node_id))
            .map_err(map_err!(StorageWrite))?;
    }

    for (class, module_path) in map {
        components
            .insert((node_id, class.as_str()), module_path.as_str())
            .map_err(map_err!(StorageWrite))?;
        owners
            .insert((class.as_str(), node_id), module_path.as_str())
            .map_err(map_err!(StorageWrite))?;
    }
    Ok(())
}

/// Mapping set of `node_id` from an open components table
fn read_components<T>(components: &T, node_id: &str) -> Result<ComponentMap>
where
    T: ReadableTable<(&'static str, &'static str), &'static str>,
{
    let mut map = ComponentMap::new();
    for entry in components
        .range((node_id, "")..)
        .map_err(map_err!(StorageRead))?
    {
        let (key, value) = entry.map_err(map_err!(StorageRead))?;
        let (owner, class) = key.value();
        if owner != node_id {
            break;
        }
        map.insert(class.to_string(), value.value().to_string());
    }
    Ok(map)
}

/// Lowest-id active owner of `component_class` and its module path
fn first_active_owner<O, N>(
    owners: &O,
    nodes: &N,
    component_class: &str,
) -> Result<Option<(Node, String)>>
where
    O: ReadableTable<(&'static str, &'static str), &'static str>,
    N: ReadableTable<&'static str, &'static [u8]>,
{
    for entry in owners
        .range((component_class, "")..)
        .map_err(map_err!(StorageRead))?
    {
        let (key, value) = entry.map_err(map_err!(StorageRead))?;
        let (class, node_id) = key.value();
        if class != component_class {
            break;
        }
        let Some(guard) = nodes.get(node_id).map_err(map_err!(StorageRead))? else {
            continue;
        };
        let node = decode_node(guard.value())?;
        if node.is_active() {
            return Ok(Some((node, value.value().to_string())));
        }
    }
    Ok(None)
}

fn node_exists(txn: &WriteTransaction, node_id: &str) -> Result<bool> {
    let nodes = txn.open_table(NODES).map_err(map_err!(StorageTable))?;
    let found = nodes.get(node_id).map_err(map_err!(StorageRead))?.is_some();
    Ok(found)
}

// =============================================================================
// NodeStore Implementation
// =============================================================================

#[async_trait]
impl NodeStore for RedbNodeStore {
    async fn put_node(&self, node: &Node) -> Result<()> {
        let node = node.clone();
        self.blocking(move |db| {
            let txn = db.begin_write().map_err(map_err!(StorageTransaction))?;
            write_node(&txn, &node)?;
            txn.commit().map_err(map_err!(StorageTransaction))?;
            debug!(node_id = %node.node_id, "Node stored");
            Ok(())
        })
        .await
    }

    async fn replace_components(&self, node_id: &str, components: &ComponentMap) -> Result<()> {
        let node_id = node_id.to_string();
        let components = components.clone();
        self.blocking(move |db| {
            let txn = db.begin_write().map_err(map_err!(StorageTransaction))?;
            if !node_exists(&txn, &node_id)? {
                // Dropping the transaction aborts it.
                return Err(Error::NodeNotFound { node_id });
            }
            write_components(&txn, &node_id, &components)?;
            txn.commit().map_err(map_err!(StorageTransaction))?;
            debug!(node_id = %node_id, count = components.len(), "Components replaced");
            Ok(())
        })
        .await
    }

    async fn apply_node(&self, node: &Node, components: &ComponentMap) -> Result<()> {
        let node = node.clone();
        let components = components.clone();
        self.blocking(move |db| {
            let txn = db.begin_write().map_err(map_err!(StorageTransaction))?;
            write_node(&txn, &node)?;
            write_components(&txn, &node.node_id, &components)?;
            txn.commit().map_err(map_err!(StorageTransaction))?;
            debug!(
                node_id = %node.node_id,
                count = components.len(),
                "Node and components applied"
            );
            Ok(())
        })
        .await
    }

    async fn get_node(&self, node_id: &str) -> Result<Option<Node>> {
        let node_id = node_id.to_string();
        self.blocking(move |db| {
            let txn = db.begin_read().map_err(map_err!(StorageTransaction))?;
            let nodes = txn.open_table(NODES).map_err(map_err!(StorageTable))?;
            let found = nodes.get(node_id.as_str()).map_err(map_err!(StorageRead))?;
            let node = match found {
                Some(guard) => Some(decode_node(guard.value())?),
                None => None,
            };
            Ok(node)
        })
        .await
    }

    async fn list_active_nodes(&self) -> Result<Vec<Node>> {
        self.blocking(|db| {
            let txn = db.begin_read().map_err(map_err!(StorageTransaction))?;
            let nodes = txn.open_table(NODES).map_err(map_err!(StorageTable))?;
            let mut active = Vec::new();
            for entry in nodes.iter().map_err(map_err!(StorageRead))? {
                let (_, value) = entry.map_err(map_err!(StorageRead))?;
                let node = decode_node(value.value())?;
                if node.is_active() {
                    active.push(node);
                }
            }
            Ok(active)
        })
        .await
    }

    async fn get_components(&self, node_id: &str) -> Result<ComponentMap> {
        let node_id = node_id.to_string();
        self.blocking(move |db| {
            let txn = db.begin_read().map_err(map_err!(StorageTransaction))?;
            let components = txn.open_table(COMPONENTS).map_err(map_err!(StorageTable))?;
            read_components(&components, &node_id)
        })
        .await
    }

    async fn find_node_by_component(
        &self,
        component_class: &str,
    ) -> Result<Option<ComponentOwner>> {
        let component_class = component_class.to_string();
        self.blocking(move |db| {
            // One read transaction: the owner scan and status checks share a snapshot.
            let txn = db.begin_read().map_err(map_err!(StorageTransaction))?;
            let owners = txn
                .open_table(COMPONENT_OWNERS)
                .map_err(map_err!(StorageTable))?;
            let nodes = txn.open_table(NODES).map_err(map_err!(StorageTable))?;

            let owner = first_active_owner(&owners, &nodes, &component_class)?;
            Ok(owner.map(|(node, module_path)| ComponentOwner {
                node_id: node.node_id,
                module_path,
            }))
        })
        .await
    }

    async fn resolve_component(&self, component_class: &str) -> Result<Option<OwnedComponent>> {
        let component_class = component_class.to_string();
        self.blocking(move |db| {
            let txn = db.begin_read().map_err(map_err!(StorageTransaction))?;
            let owners = txn
                .open_table(COMPONENT_OWNERS)
                .map_err(map_err!(StorageTable))?;
            let nodes = txn.open_table(NODES).map_err(map_err!(StorageTable))?;
            let components = txn.open_table(COMPONENTS).map_err(map_err!(StorageTable))?;

            let Some((node, module_path)) = first_active_owner(&owners, &nodes, &component_class)?
            else {
                return Ok(None);
            };
            let components = read_components(&components, &node.node_id)?;
            Ok(Some(OwnedComponent {
                node,
                components,
                module_path,
            }))
        })
        .await
    }

    async fn set_status(&self, node_id: &str, status: &str) -> Result<bool> {
        let node_id = node_id.to_string();
        let status = status.to_string();
        self.blocking(move |db| {
            let txn = db.begin_write().map_err(map_err!(StorageTransaction))?;
            let current = {
                let nodes = txn.open_table(NODES).map_err(map_err!(StorageTable))?;
                let found = nodes.get(node_id.as_str()).map_err(map_err!(StorageRead))?;
                match found {
                    Some(guard) => Some(decode_node(guard.value())?),
                    None => None,
                }
            };
            let Some(mut node) = current else {
                return Ok(false);
            };
            node.status = status;
            write_node(&txn, &node)?;
            txn.commit().map_err(map_err!(StorageTransaction))?;
            info!(node_id = %node.node_id, status = %node.status, "Node status changed");
            Ok(true)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::STATUS_INACTIVE;
    use assert_matches::assert_matches;

    fn node(id: &str) -> Node {
        let mut node = Node::new(id);
        node.name = format!("{} name", id);
        node.api_url = Some("http://localhost:8000".into());
        node
    }

    fn components(pairs: &[(&str, &str)]) -> ComponentMap {
        pairs
            .iter()
            .map(|(c, m)| (c.to_string(), m.to_string()))
            .collect()
    }

    #[tokio::test]
    async fn test_put_and_get_node() {
        let store = RedbNodeStore::open_in_memory().unwrap();
        let n = node("node-a");

        store.put_node(&n).await.unwrap();

        assert_eq!(store.get_node("node-a").await.unwrap(), Some(n));
        assert!(store.get_node("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_put_node_replaces_record() {
        let store = RedbNodeStore::open_in_memory().unwrap();
        let mut n = node("node-a");
        store.put_node(&n).await.unwrap();

        n.name = "renamed".into();
        n.docker_image = Some("img:2".into());
        store.put_node(&n).await.unwrap();

        let stored = store.get_node("node-a").await.unwrap().unwrap();
        assert_eq!(stored.name, "renamed");
        assert_eq!(stored.docker_image.as_deref(), Some("img:2"));
    }

    #[tokio::test]
    async fn test_replace_components_is_wholesale() {
        let store = RedbNodeStore::open_in_memory().unwrap();
        store.put_node(&node("node-a")).await.unwrap();

        store
            .replace_components("node-a", &components(&[("A", "m.a"), ("B", "m.b")]))
            .await
            .unwrap();
        store
            .replace_components("node-a", &components(&[("B", "m.b2"), ("C", "m.c")]))
            .await
            .unwrap();

        let map = store.get_components("node-a").await.unwrap();
        assert_eq!(map, components(&[("B", "m.b2"), ("C", "m.c")]));
        assert!(store.find_node_by_component("A").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_replace_components_requires_node() {
        let store = RedbNodeStore::open_in_memory().unwrap();

        let result = store
            .replace_components("ghost", &components(&[("A", "m.a")]))
            .await;

        assert_matches!(result, Err(Error::NodeNotFound { node_id }) if node_id == "ghost");
        assert!(store.get_components("ghost").await.unwrap().is_empty());
        assert!(store.find_node_by_component("A").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_components_do_not_leak_between_prefix_ids() {
        let store = RedbNodeStore::open_in_memory().unwrap();
        store
            .apply_node(&node("node"), &components(&[("A", "m.a")]))
            .await
            .unwrap();
        store
            .apply_node(&node("node-2"), &components(&[("B", "m.b")]))
            .await
            .unwrap();

        assert_eq!(store.get_components("node").await.unwrap(), components(&[("A", "m.a")]));
        assert_eq!(store.get_components("node-2").await.unwrap(), components(&[("B", "m.b")]));
    }

    #[tokio::test]
    async fn test_list_active_nodes_filters_status() {
        let store = RedbNodeStore::open_in_memory().unwrap();
        store.put_node(&node("node-b")).await.unwrap();
        store.put_node(&node("node-a")).await.unwrap();
        let mut retired = node("node-c");
        retired.status = STATUS_INACTIVE.into();
        store.put_node(&retired).await.unwrap();

        let ids: Vec<String> = store
            .list_active_nodes()
            .await
            .unwrap()
            .into_iter()
            .map(|n| n.node_id)
            .collect();
        assert_eq!(ids, vec!["node-a", "node-b"]);

        // Inactive rows are retained and fetchable directly
        assert!(store.get_node("node-c").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_find_node_by_component_lowest_active_id_wins() {
        let store = RedbNodeStore::open_in_memory().unwrap();
        store
            .apply_node(&node("node-b"), &components(&[("X", "m2")]))
            .await
            .unwrap();
        store
            .apply_node(&node("node-a"), &components(&[("X", "m1")]))
            .await
            .unwrap();

        for _ in 0..3 {
            let owner = store.find_node_by_component("X").await.unwrap().unwrap();
            assert_eq!(owner.node_id, "node-a");
            assert_eq!(owner.module_path, "m1");
        }

        assert!(store.set_status("node-a", STATUS_INACTIVE).await.unwrap());
        let owner = store.find_node_by_component("X").await.unwrap().unwrap();
        assert_eq!(owner.node_id, "node-b");
        assert_eq!(owner.module_path, "m2");
    }

    #[tokio::test]
    async fn test_resolve_component_reads_one_snapshot() {
        let store = RedbNodeStore::open_in_memory().unwrap();
        store
            .apply_node(&node("node-a"), &components(&[("X", "a.x"), ("Y", "a.y")]))
            .await
            .unwrap();
        store
            .apply_node(&node("node-b"), &components(&[("X", "b.x")]))
            .await
            .unwrap();

        let owned = store.resolve_component("X").await.unwrap().unwrap();
        assert_eq!(owned.node.node_id, "node-a");
        assert_eq!(owned.module_path, "a.x");
        assert_eq!(owned.components, components(&[("X", "a.x"), ("Y", "a.y")]));

        // Deactivated between two lookups: the next one falls back to node-b
        assert!(store.set_status("node-a", STATUS_INACTIVE).await.unwrap());
        let owned = store.resolve_component("X").await.unwrap().unwrap();
        assert_eq!(owned.node.node_id, "node-b");
        assert!(owned.node.is_active());
        assert_eq!(owned.components.get("X").map(String::as_str), Some("b.x"));
        assert_eq!(owned.module_path, "b.x");

        // Re-declared without the class: node-a owns nothing under X any more
        store
            .apply_node(&node("node-a"), &components(&[("Y", "a.y")]))
            .await
            .unwrap();
        let owned = store.resolve_component("Y").await.unwrap().unwrap();
        assert_eq!(owned.components, components(&[("Y", "a.y")]));
        assert_eq!(
            store.resolve_component("X").await.unwrap().unwrap().node.node_id,
            "node-b"
        );
        assert!(store.resolve_component("Z").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_find_node_by_component_none_active() {
        let store = RedbNodeStore::open_in_memory().unwrap();
        let mut n = node("node-a");
        n.status = "deploying".into();
        store.apply_node(&n, &components(&[("X", "m1")])).await.unwrap();

        assert!(store.find_node_by_component("X").await.unwrap().is_none());
        assert!(store.find_node_by_component("Y").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_set_status_unknown_node() {
        let store = RedbNodeStore::open_in_memory().unwrap();
        assert!(!store.set_status("ghost", STATUS_INACTIVE).await.unwrap());
    }

    #[tokio::test]
    async fn test_persistence_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("nested").join("registry.redb");

        {
            let store = RedbNodeStore::open(&db_path).unwrap();
            store
                .apply_node(&node("node-a"), &components(&[("X", "m1")]))
                .await
                .unwrap();
        }

        let store = RedbNodeStore::open(&db_path).unwrap();
        assert!(store.get_node("node-a").await.unwrap().is_some());
        assert_eq!(store.get_components("node-a").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_open_rejects_non_database_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry.redb");
        std::fs::write(&path, b"definitely not a redb file, just some text").unwrap();

        let result = RedbNodeStore::open(&path);
        assert_matches!(result, Err(Error::StorageOpen(_)));
    }
}
