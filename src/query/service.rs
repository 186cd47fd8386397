//! Registry Query Service
//!
//! Read operations over the store with address resolution applied to every
//! returned node.

use super::views::{ComponentResolution, NodeDetail, NodeList, NodeMetadata, NodeSummary};
use crate::domain::model::{ComponentMap, Node};
use crate::domain::ports::NodeStore;
use crate::error::{Error, Result};
use crate::metrics::RegistryMetrics;
use crate::resolver::AddressResolver;
use futures::future::join_all;
use std::sync::Arc;
use tracing::{debug, warn};

/// Read-only access to the registry
pub struct RegistryService {
    store: Arc<dyn NodeStore>,
    resolver: AddressResolver,
    metrics: Arc<RegistryMetrics>,
}

impl RegistryService {
    pub fn new(
        store: Arc<dyn NodeStore>,
        resolver: AddressResolver,
        metrics: Arc<RegistryMetrics>,
    ) -> Self {
        Self {
            store,
            resolver,
            metrics,
        }
    }

    pub fn store(&self) -> &Arc<dyn NodeStore> {
        &self.store
    }

    /// All active nodes with their component classes.
    ///
    /// A node whose component lookup fails is left out of the listing.
    pub async fn list_nodes(&self) -> Result<NodeList> {
        let nodes = self
            .store
            .list_active_nodes()
            .await
            .map_err(|e| {
                self.metrics.record_query("list_nodes", "error");
                e
            })?;

        let assembled = join_all(nodes.iter().map(|node| self.summarize(node))).await;

        let mut summaries = Vec::with_capacity(assembled.len());
        for (node, result) in nodes.iter().zip(assembled) {
            match result {
                Ok(summary) => summaries.push(summary),
                Err(e) => {
                    warn!(node_id = %node.node_id, error = %e, "Failed to load node, skipping from listing");
                }
            }
        }

        self.metrics.active_nodes.set(summaries.len() as i64);
        self.metrics.record_query("list_nodes", "ok");
        debug!(total = summaries.len(), "Listed active nodes");

        Ok(NodeList {
            total_nodes: summaries.len(),
            nodes: summaries,
        })
    }

    /// One node, active or not, with its full component map
    pub async fn get_node(&self, node_id: &str) -> Result<NodeDetail> {
        let result = self.load_detail(node_id).await;
        self.metrics
            .record_query("get_node", outcome_label(&result));
        result
    }

    /// The active node implementing `component_class`, lowest `node_id` first
    pub async fn resolve_component(&self, component_class: &str) -> Result<ComponentResolution> {
        let result = self.load_owner(component_class).await;
        self.metrics
            .record_query("resolve_component", outcome_label(&result));
        result
    }

    async fn summarize(&self, node: &Node) -> Result<NodeSummary> {
        let components = self.store.get_components(&node.node_id).await?;
        let metadata = self.metadata(node, &components).await;
        Ok(NodeSummary {
            components_count: components.len(),
            metadata,
        })
    }

    async fn load_detail(&self, node_id: &str) -> Result<NodeDetail> {
        let node = self
            .store
            .get_node(node_id)
            .await?
            .ok_or_else(|| Error::NodeNotFound {
                node_id: node_id.to_string(),
            })?;
        let components = self.store.get_components(node_id).await?;
        let metadata = self.metadata(&node, &components).await;

        Ok(NodeDetail {
            node: metadata,
            components,
        })
    }

    async fn load_owner(&self, component_class: &str) -> Result<ComponentResolution> {
        let owned = self
            .store
            .resolve_component(component_class)
            .await?
            .ok_or_else(|| Error::ComponentNotFound {
                component_class: component_class.to_string(),
            })?;
        let metadata = self.metadata(&owned.node, &owned.components).await;

        debug!(
            component_class = %component_class,
            node_id = %owned.node.node_id,
            "Resolved component owner"
        );

        Ok(ComponentResolution {
            node: metadata,
            components: owned.components,
            module_path: owned.module_path,
        })
    }

    async fn metadata(&self, node: &Node, components: &ComponentMap) -> NodeMetadata {
        let api_url = self
            .resolver
            .resolve(node.api_url.as_deref(), &node.node_id)
            .await;
        NodeMetadata::from_node(node, api_url, components)
    }
}

fn outcome_label<T>(result: &Result<T>) -> &'static str {
    match result {
        Ok(_) => "ok",
        Err(e) if e.is_not_found() => "not_found",
        Err(_) => "error",
    }
}
