//! Registry data model
//!
//! `Node` and its component mapping as stored by the registry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Status value of nodes visible to listing and reverse lookup
pub const STATUS_ACTIVE: &str = "active";

/// Status value used when explicitly retiring a node
pub const STATUS_INACTIVE: &str = "inactive";

/// `component_class -> module_path`, ordered by component class
pub type ComponentMap = BTreeMap<String, String>;

// =============================================================================
// Deployment Location
// =============================================================================

/// Where a node is deployed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentLocation {
    #[default]
    Local,
    Cloud,
    K8s,
}

impl DeploymentLocation {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentLocation::Local => "local",
            DeploymentLocation::Cloud => "cloud",
            DeploymentLocation::K8s => "k8s",
        }
    }
}

impl std::fmt::Display for DeploymentLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DeploymentLocation {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "local" => Ok(DeploymentLocation::Local),
            "cloud" => Ok(DeploymentLocation::Cloud),
            "k8s" => Ok(DeploymentLocation::K8s),
            other => Err(format!(
                "invalid deployment_location '{}': expected local, cloud or k8s",
                other
            )),
        }
    }
}

// =============================================================================
// Node
// =============================================================================

/// One executor capable of running components
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    /// Primary key, immutable once assigned
    pub node_id: String,
    pub name: String,
    pub description: String,
    pub source_code_location: Option<String>,
    pub docker_image: Option<String>,
    pub deployment_location: DeploymentLocation,
    /// Stored as declared; resolved at read time
    pub api_url: Option<String>,
    pub ip_address: Option<String>,
    pub status: String,
    pub category: String,
    pub repository_url: Option<String>,
    pub commit: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    /// Full declaration document as ingested
    pub raw_declaration: serde_json::Value,
}

impl Node {
    /// Create a node with default metadata
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            name: String::new(),
            description: String::new(),
            source_code_location: None,
            docker_image: None,
            deployment_location: DeploymentLocation::default(),
            api_url: None,
            ip_address: None,
            status: STATUS_ACTIVE.to_string(),
            category: String::new(),
            repository_url: None,
            commit: None,
            created_at: None,
            updated_at: None,
            raw_declaration: serde_json::Value::Null,
        }
    }

    /// Only active nodes are listed and reverse-lookup eligible
    #[inline]
    pub fn is_active(&self) -> bool {
        self.status == STATUS_ACTIVE
    }
}

/// Result of a reverse lookup in the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentOwner {
    pub node_id: String,
    pub module_path: String,
}

/// Owning node of a component class together with its whole mapping set,
/// read from a single snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnedComponent {
    pub node: Node,
    pub components: ComponentMap,
    pub module_path: String,
}
