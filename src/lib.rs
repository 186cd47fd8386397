//! Executor Node Registry
//!
//! Catalog of executor nodes and the component classes each one can run.
//! Declarations are ingested from per-node JSON documents into an embedded
//! store, then served read-only: list nodes, fetch one node with its
//! component map, or find the node that implements a given component class.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   ┌─────────────────┐   ┌──────────────┐
//! │  Harvester   │──▶│  assets/nodes/  │──▶│  Bootstrap   │
//! │ (checkouts)  │   │   *.json        │   │  (ingest)    │
//! └──────────────┘   └─────────────────┘   └──────┬───────┘
//!                                                 │
//!                                          ┌──────▼───────┐
//!                                          │  NodeStore   │
//!                                          │   (redb)     │
//!                                          └──────┬───────┘
//!                                                 │
//!                       ┌──────────────────┐ ┌────▼─────────┐
//!                       │ AddressResolver  │─│   Registry   │──▶ REST API
//!                       │ (read-time only) │ │   Service    │
//!                       └──────────────────┘ └──────────────┘
//! ```
//!
//! # Modules
//!
//! - [`domain`]: Node model and the store / execution-context traits
//! - [`store`]: redb-backed node store
//! - [`ingest`]: Declaration parsing, bootstrap and harvesting
//! - [`resolver`]: Read-time address resolution
//! - [`query`]: Read operations and response views
//! - [`api`]: REST router and server
//! - [`metrics`]: Prometheus metrics
//! - [`error`]: Error types and handling

pub mod api;
pub mod domain;
pub mod error;
pub mod ingest;
pub mod metrics;
pub mod query;
pub mod resolver;
pub mod store;

// Re-export commonly used types
pub use api::{ApiServer, ApiServerConfig, RestRouter};

pub use domain::model::{
    ComponentMap, ComponentOwner, DeploymentLocation, Node, OwnedComponent, STATUS_ACTIVE,
    STATUS_INACTIVE,
};
pub use domain::ports::{ExecutionContext, NodeStore};

pub use error::{Error, ErrorKind, Result};

pub use ingest::{
    Bootstrapper, ComponentMapLocator, HarvestConfig, HarvestReport, Harvester, IngestConfig,
    IngestSummary, ItemOutcome, RegistryEvent,
};

pub use metrics::RegistryMetrics;

pub use query::{ComponentResolution, NodeDetail, NodeList, NodeMetadata, RegistryService};

pub use resolver::{AddressResolver, ContainerMode, ResolverConfig, ServiceAliases};

pub use store::RedbNodeStore;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
