//! REST API Handlers
//!
//! Read endpoints over the registry plus an admin hook that re-runs
//! ingestion.

use crate::error::Error;
use crate::ingest::Bootstrapper;
use crate::query::RegistryService;
use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info};

/// Service name reported by the descriptor and health endpoints
pub const SERVICE_NAME: &str = "droq-node-registry";

// =============================================================================
// Response Types
// =============================================================================

/// Service descriptor returned by `GET /`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceInfoResponse {
    pub service: String,
    pub version: String,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
}

/// One skipped declaration in a refresh
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshFailure {
    pub origin: String,
    pub error: String,
    pub message: String,
}

/// Result of `POST /api/v1/admin/refresh`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshResponse {
    pub ingested: usize,
    pub failed: usize,
    pub failures: Vec<RefreshFailure>,
}

/// API error response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiErrorResponse {
    pub error: String,
    pub message: String,
}

impl ApiErrorResponse {
    /// Not-found maps to 404, every other failure to 500
    fn respond(e: &Error) -> Response {
        let status = if e.is_not_found() {
            StatusCode::NOT_FOUND
        } else {
            error!("Request failed: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        };
        (
            status,
            Json(ApiErrorResponse {
                error: e.label().into(),
                message: e.to_string(),
            }),
        )
            .into_response()
    }
}

// =============================================================================
// REST Router
// =============================================================================

/// REST API router builder
pub struct RestRouter {
    service: Arc<RegistryService>,
    bootstrapper: Arc<Bootstrapper>,
}

impl RestRouter {
    /// Create a new REST router
    pub fn new(service: Arc<RegistryService>, bootstrapper: Arc<Bootstrapper>) -> Self {
        Self {
            service,
            bootstrapper,
        }
    }

    /// Build the Axum router
    pub fn build(self) -> Router {
        let state = AppState {
            service: self.service,
            bootstrapper: self.bootstrapper,
        };

        Router::new()
            .route("/", get(service_info))
            .route("/health", get(health_check))
            // Node endpoints
            .route("/api/v1/nodes", get(list_nodes))
            .route("/api/v1/nodes/:node_id", get(get_node))
            // Reverse lookup
            .route(
                "/api/v1/components/:component_class/node",
                get(get_node_by_component),
            )
            // Admin
            .route("/api/v1/admin/refresh", post(refresh))
            .with_state(state)
    }
}

/// Shared application state
#[derive(Clone)]
struct AppState {
    service: Arc<RegistryService>,
    bootstrapper: Arc<Bootstrapper>,
}

// =============================================================================
// Handlers
// =============================================================================

async fn service_info() -> impl IntoResponse {
    Json(ServiceInfoResponse {
        service: SERVICE_NAME.into(),
        version: crate::VERSION.into(),
        description: "Registry mapping executor nodes to the component classes they run".into(),
    })
}

/// Health check
async fn health_check() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "healthy".into(),
            service: SERVICE_NAME.into(),
        }),
    )
}

/// List all active nodes
async fn list_nodes(State(state): State<AppState>) -> Response {
    match state.service.list_nodes().await {
        Ok(list) => (StatusCode::OK, Json(list)).into_response(),
        Err(e) => ApiErrorResponse::respond(&e),
    }
}

/// Get one node with its component map
async fn get_node(State(state): State<AppState>, Path(node_id): Path<String>) -> Response {
    match state.service.get_node(&node_id).await {
        Ok(detail) => (StatusCode::OK, Json(detail)).into_response(),
        Err(e) => {
            debug!(node_id = %node_id, "Node lookup failed: {}", e);
            ApiErrorResponse::respond(&e)
        }
    }
}

/// Find the node implementing a component class
async fn get_node_by_component(
    State(state): State<AppState>,
    Path(component_class): Path<String>,
) -> Response {
    match state.service.resolve_component(&component_class).await {
        Ok(resolution) => (StatusCode::OK, Json(resolution)).into_response(),
        Err(e) => {
            debug!(component_class = %component_class, "Component lookup failed: {}", e);
            ApiErrorResponse::respond(&e)
        }
    }
}

/// Re-run ingestion from the assets directory
async fn refresh(State(state): State<AppState>) -> Response {
    info!("Registry refresh requested");
    match state.bootstrapper.bootstrap().await {
        Ok(summary) => {
            let failures = summary
                .failures()
                .map(|(origin, e)| RefreshFailure {
                    origin: origin.to_string(),
                    error: e.label().into(),
                    message: e.to_string(),
                })
                .collect();
            (
                StatusCode::OK,
                Json(RefreshResponse {
                    ingested: summary.ingested_count(),
                    failed: summary.failed_count(),
                    failures,
                }),
            )
                .into_response()
        }
        Err(e) => ApiErrorResponse::respond(&e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::{ComponentMap, Node};
    use crate::domain::ports::NodeStore;
    use crate::ingest::{ComponentMapLocator, IngestConfig};
    use crate::metrics::RegistryMetrics;
    use crate::resolver::{AddressResolver, ServiceAliases, StaticContext};
    use crate::store::RedbNodeStore;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    struct Fixture {
        router: Router,
        store: Arc<dyn NodeStore>,
        _assets: tempfile::TempDir,
    }

    fn fixture() -> Fixture {
        let assets = tempfile::tempdir().unwrap();
        let store: Arc<dyn NodeStore> = Arc::new(RedbNodeStore::open_in_memory().unwrap());
        let metrics = RegistryMetrics::new().unwrap();
        let resolver = AddressResolver::new(ServiceAliases::default(), Arc::new(StaticContext(false)));
        let service = Arc::new(RegistryService::new(store.clone(), resolver, metrics.clone()));
        let config = IngestConfig {
            assets_dir: assets.path().to_path_buf(),
            ..Default::default()
        };
        let bootstrapper = Bootstrapper::new(
            config,
            store.clone(),
            ComponentMapLocator::new(assets.path(), assets.path()),
            metrics,
        );

        Fixture {
            router: RestRouter::new(service, bootstrapper).build(),
            store,
            _assets: assets,
        }
    }

    async fn call(router: &Router, method: &str, uri: &str) -> (StatusCode, serde_json::Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap();
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    async fn seed(store: &Arc<dyn NodeStore>) {
        let mut components = ComponentMap::new();
        components.insert("TextSplitter".into(), "lfx.components.split".into());
        components.insert("Embedder".into(), "lfx.components.embed".into());
        let mut node = Node::new("lfx-node");
        node.api_url = Some("http://localhost:8000".into());
        store.apply_node(&node, &components).await.unwrap();
    }

    #[tokio::test]
    async fn test_health_and_descriptor() {
        let f = fixture();
        let (status, body) = call(&f.router, "GET", "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");

        let (status, body) = call(&f.router, "GET", "/").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["version"], crate::VERSION);
    }

    #[tokio::test]
    async fn test_list_and_get_node() {
        let f = fixture();
        seed(&f.store).await;

        let (status, body) = call(&f.router, "GET", "/api/v1/nodes").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total_nodes"], 1);
        assert_eq!(body["nodes"][0]["components_count"], 2);
        assert_eq!(body["nodes"][0]["metadata"]["deployment_location"], "local");

        let (status, body) = call(&f.router, "GET", "/api/v1/nodes/lfx-node").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["components"]["Embedder"], "lfx.components.embed");
        assert_eq!(body["node"]["api_url"], "http://localhost:8000");
    }

    #[tokio::test]
    async fn test_unknown_node_is_404() {
        let f = fixture();
        let (status, body) = call(&f.router, "GET", "/api/v1/nodes/nope").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "not_found");
    }

    #[tokio::test]
    async fn test_component_lookup() {
        let f = fixture();
        seed(&f.store).await;

        let (status, body) =
            call(&f.router, "GET", "/api/v1/components/TextSplitter/node").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["node"]["node_id"], "lfx-node");
        assert_eq!(body["module_path"], "lfx.components.split");

        let (status, _) = call(&f.router, "GET", "/api/v1/components/Missing/node").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_refresh_reports_counts() {
        let f = fixture();
        let assets = f._assets.path();
        std::fs::write(
            assets.join("alpha.json"),
            r#"{"node_id": "alpha", "components": {"A": "alpha.a"}}"#,
        )
        .unwrap();
        std::fs::write(assets.join("broken.json"), "{not json").unwrap();

        let (status, body) = call(&f.router, "POST", "/api/v1/admin/refresh").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ingested"], 1);
        assert_eq!(body["failed"], 1);
        assert_eq!(body["failures"][0]["error"], "malformed_input");

        let (status, _) = call(&f.router, "GET", "/api/v1/components/A/node").await;
        assert_eq!(status, StatusCode::OK);
    }
}
