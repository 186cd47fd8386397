//! API Server
//!
//! Serves the REST router with request tracing, CORS and graceful shutdown.

use super::rest::RestRouter;
use crate::error::{Error, Result};
use crate::ingest::Bootstrapper;
use crate::query::RegistryService;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::broadcast;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

// =============================================================================
// Server Configuration
// =============================================================================

/// Configuration for the API server
#[derive(Debug, Clone)]
pub struct ApiServerConfig {
    /// REST API bind address
    pub rest_addr: SocketAddr,
}

impl Default for ApiServerConfig {
    fn default() -> Self {
        Self {
            rest_addr: SocketAddr::from(([0, 0, 0, 0], 8002)),
        }
    }
}

// =============================================================================
// API Server
// =============================================================================

/// HTTP front of the registry
pub struct ApiServer {
    config: ApiServerConfig,
    service: Arc<RegistryService>,
    bootstrapper: Arc<Bootstrapper>,
    shutdown_tx: broadcast::Sender<()>,
}

impl ApiServer {
    /// Create a new API server
    pub fn new(
        config: ApiServerConfig,
        service: Arc<RegistryService>,
        bootstrapper: Arc<Bootstrapper>,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            config,
            service,
            bootstrapper,
            shutdown_tx,
        }
    }

    /// Full application router, layers included
    pub fn router(&self) -> axum::Router {
        RestRouter::new(self.service.clone(), self.bootstrapper.clone())
            .build()
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
    }

    /// Serve until `shutdown` is called
    pub async fn run(&self) -> Result<()> {
        let addr = self.config.rest_addr;
        let app = self.router();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| Error::Internal(format!("Failed to bind REST server: {}", e)))?;

        info!("REST API listening on {}", addr);

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
                info!("REST server shutting down");
            })
            .await
            .map_err(|e| Error::Internal(format!("REST server error: {}", e)))?;

        Ok(())
    }

    /// Trigger graceful shutdown
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }
}
