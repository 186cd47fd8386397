//! Registry Metrics
//!
//! Prometheus counters and gauges for ingestion and query traffic. Each
//! `RegistryMetrics` owns its own `prometheus::Registry` so that several
//! instances (tests, benches) never collide on registration.

use crate::error::{Error, Result};
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use std::sync::Arc;

/// Metrics exported by the registry service
pub struct RegistryMetrics {
    registry: Registry,
    /// Nodes written by ingestion
    pub nodes_ingested: IntCounter,
    /// Rejected ingestion items by error label
    pub ingest_failures: IntCounterVec,
    /// Query outcomes by operation and outcome
    pub queries: IntCounterVec,
    /// Active nodes seen by the last list operation
    pub active_nodes: IntGauge,
}

impl std::fmt::Debug for RegistryMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryMetrics")
            .field("nodes_ingested", &self.nodes_ingested.get())
            .field("active_nodes", &self.active_nodes.get())
            .finish()
    }
}

impl RegistryMetrics {
    /// Create and register all metrics
    pub fn new() -> Result<Arc<Self>> {
        let registry = Registry::new_custom(Some("executor_registry".into()), None)
            .map_err(metrics_err)?;

        let nodes_ingested = IntCounter::new(
            "nodes_ingested_total",
            "Total number of node declarations written to the store",
        )
        .map_err(metrics_err)?;
        let ingest_failures = IntCounterVec::new(
            Opts::new(
                "ingest_failures_total",
                "Declarations rejected during ingestion",
            ),
            &["kind"],
        )
        .map_err(metrics_err)?;
        let queries = IntCounterVec::new(
            Opts::new("queries_total", "Query operations by outcome"),
            &["operation", "outcome"],
        )
        .map_err(metrics_err)?;
        let active_nodes = IntGauge::new(
            "active_nodes",
            "Number of active nodes returned by the last listing",
        )
        .map_err(metrics_err)?;

        registry
            .register(Box::new(nodes_ingested.clone()))
            .map_err(metrics_err)?;
        registry
            .register(Box::new(ingest_failures.clone()))
            .map_err(metrics_err)?;
        registry
            .register(Box::new(queries.clone()))
            .map_err(metrics_err)?;
        registry
            .register(Box::new(active_nodes.clone()))
            .map_err(metrics_err)?;

        Ok(Arc::new(Self {
            registry,
            nodes_ingested,
            ingest_failures,
            queries,
            active_nodes,
        }))
    }

    /// Record a query outcome
    pub fn record_query(&self, operation: &str, outcome: &str) {
        self.queries.with_label_values(&[operation, outcome]).inc();
    }

    /// Render all metrics in the Prometheus text format
    pub fn encode(&self) -> Result<(String, Vec<u8>)> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(metrics_err)?;
        Ok((encoder.format_type().to_string(), buffer))
    }
}

fn metrics_err(e: prometheus::Error) -> Error {
    Error::Internal(format!("metrics: {}", e))
}
