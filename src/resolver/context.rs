//! Execution Contexts
//!
//! Implementations of [`ExecutionContext`] that decide whether the registry
//! runs inside a container network: an environment/filesystem marker, a
//! bounded DNS probe of the service name, a combinator and a fixed answer.

use crate::domain::ports::ExecutionContext;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Environment variable that forces the containerized answer
pub const CONTAINERIZED_ENV: &str = "REGISTRY_CONTAINERIZED";

/// Marker file created by the docker runtime
pub const DOCKER_MARKER: &str = "/.dockerenv";

// =============================================================================
// Static Context
// =============================================================================

/// Fixed answer, for explicit configuration and tests
#[derive(Debug, Clone, Copy)]
pub struct StaticContext(pub bool);

#[async_trait]
impl ExecutionContext for StaticContext {
    fn name(&self) -> &'static str {
        "static"
    }

    async fn is_containerized(&self, _service_name: &str) -> bool {
        self.0
    }
}

// =============================================================================
// Marker Context
// =============================================================================

/// Containerized when an environment flag is truthy or a marker file exists
#[derive(Debug, Clone)]
pub struct MarkerContext {
    env_var: Option<String>,
    marker_paths: Vec<PathBuf>,
}

impl Default for MarkerContext {
    fn default() -> Self {
        Self {
            env_var: Some(CONTAINERIZED_ENV.to_string()),
            marker_paths: vec![PathBuf::from(DOCKER_MARKER)],
        }
    }
}

impl MarkerContext {
    pub fn new(env_var: Option<String>, marker_paths: Vec<PathBuf>) -> Self {
        Self {
            env_var,
            marker_paths,
        }
    }

    fn env_flag(&self) -> bool {
        self.env_var
            .as_deref()
            .and_then(|name| std::env::var(name).ok())
            .map(|value| is_truthy(&value))
            .unwrap_or(false)
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

#[async_trait]
impl ExecutionContext for MarkerContext {
    fn name(&self) -> &'static str {
        "marker"
    }

    async fn is_containerized(&self, _service_name: &str) -> bool {
        self.env_flag() || self.marker_paths.iter().any(|p| p.exists())
    }
}

// =============================================================================
// DNS Probe Context
// =============================================================================

/// Containerized when the service name resolves, probed under a timeout.
///
/// Answers are cached per service name for `cache_ttl`.
#[derive(Debug)]
pub struct DnsProbeContext {
    timeout: Duration,
    cache_ttl: Duration,
    cache: Mutex<HashMap<String, (bool, Instant)>>,
}

impl DnsProbeContext {
    pub fn new(timeout: Duration, cache_ttl: Duration) -> Self {
        Self {
            timeout,
            cache_ttl,
            cache: Mutex::new(HashMap::new()),
        }
    }

    fn cached(&self, service_name: &str) -> Option<bool> {
        let cache = self.cache.lock();
        cache
            .get(service_name)
            .filter(|(_, at)| at.elapsed() < self.cache_ttl)
            .map(|(answer, _)| *answer)
    }

    async fn probe(&self, service_name: &str) -> bool {
        let lookup = tokio::net::lookup_host(format!("{}:0", service_name));
        match tokio::time::timeout(self.timeout, lookup).await {
            Ok(Ok(mut addrs)) => addrs.next().is_some(),
            Ok(Err(e)) => {
                debug!(service = %service_name, error = %e, "Service name did not resolve");
                false
            }
            Err(_) => {
                debug!(service = %service_name, timeout = ?self.timeout, "Service name probe timed out");
                false
            }
        }
    }
}

impl Default for DnsProbeContext {
    fn default() -> Self {
        Self::new(Duration::from_millis(250), Duration::from_secs(60))
    }
}

#[async_trait]
impl ExecutionContext for DnsProbeContext {
    fn name(&self) -> &'static str {
        "dns-probe"
    }

    async fn is_containerized(&self, service_name: &str) -> bool {
        if service_name.is_empty() {
            return false;
        }
        if let Some(answer) = self.cached(service_name) {
            return answer;
        }
        let answer = self.probe(service_name).await;
        self.cache
            .lock()
            .insert(service_name.to_string(), (answer, Instant::now()));
        answer
    }
}

// =============================================================================
// Any Context
// =============================================================================

/// Containerized when any inner context says so, checked in order
pub struct AnyContext {
    contexts: Vec<Arc<dyn ExecutionContext>>,
}

impl AnyContext {
    pub fn new(contexts: Vec<Arc<dyn ExecutionContext>>) -> Self {
        Self { contexts }
    }

    /// Marker first, then the DNS probe
    pub fn auto(probe_timeout: Duration) -> Self {
        Self::new(vec![
            Arc::new(MarkerContext::default()),
            Arc::new(DnsProbeContext::new(probe_timeout, Duration::from_secs(60))),
        ])
    }
}

#[async_trait]
impl ExecutionContext for AnyContext {
    fn name(&self) -> &'static str {
        "any"
    }

    async fn is_containerized(&self, service_name: &str) -> bool {
        for context in &self.contexts {
            if context.is_containerized(service_name).await {
                debug!(context = context.name(), service = %service_name, "Containerized context detected");
                return true;
            }
        }
        false
    }
}
