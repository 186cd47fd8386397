//! Response views assembled by the query service

use crate::domain::model::{ComponentMap, DeploymentLocation, Node};
use serde::{Deserialize, Serialize};

/// Node metadata as presented to callers, with the resolved `api_url`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeMetadata {
    pub node_id: String,
    pub name: String,
    pub description: String,
    pub source_code_location: Option<String>,
    pub docker_image: Option<String>,
    pub deployment_location: DeploymentLocation,
    pub api_url: Option<String>,
    pub ip_address: Option<String>,
    pub status: String,
    pub category: String,
    pub supported_components: Vec<String>,
}

impl NodeMetadata {
    pub fn from_node(node: &Node, api_url: Option<String>, components: &ComponentMap) -> Self {
        Self {
            node_id: node.node_id.clone(),
            name: node.name.clone(),
            description: node.description.clone(),
            source_code_location: node.source_code_location.clone(),
            docker_image: node.docker_image.clone(),
            deployment_location: node.deployment_location,
            api_url,
            ip_address: node.ip_address.clone(),
            status: node.status.clone(),
            category: node.category.clone(),
            supported_components: components.keys().cloned().collect(),
        }
    }
}

/// One entry of the node listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSummary {
    pub metadata: NodeMetadata,
    pub components_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeList {
    pub nodes: Vec<NodeSummary>,
    pub total_nodes: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDetail {
    pub node: NodeMetadata,
    pub components: ComponentMap,
}

/// Owner of a component class
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentResolution {
    pub node: NodeMetadata,
    pub components: ComponentMap,
    pub module_path: String,
}
