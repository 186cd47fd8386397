//! Executor Node Registry service
//!
//! `serve` (default) opens the store, ingests every declaration from the
//! assets directory and serves the REST API. `harvest` collects `node.json`
//! files from node checkouts into the assets directory.

use clap::{Parser, Subcommand};
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use executor_registry::{
    ApiServer, ApiServerConfig, Bootstrapper, ComponentMapLocator, ContainerMode, Error,
    HarvestConfig, Harvester, IngestConfig, NodeStore, RedbNodeStore, RegistryMetrics,
    RegistryService, ResolverConfig, Result, ServiceAliases,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Executor Node Registry - maps component classes to the nodes that run them
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Registry root directory
    #[arg(long, env = "REGISTRY_ROOT", default_value = ".", global = true)]
    registry_root: PathBuf,

    /// Store file; relative paths are resolved against the registry root
    #[arg(long, env = "REGISTRY_DB_PATH", default_value = "registry.redb", global = true)]
    db_path: PathBuf,

    /// Declaration directory (default: <registry-root>/assets/nodes)
    #[arg(long, env = "REGISTRY_ASSETS_DIR", global = true)]
    assets_dir: Option<PathBuf>,

    /// REST API bind host
    #[arg(long, env = "HOST", default_value = "0.0.0.0", global = true)]
    host: String,

    /// REST API bind port
    #[arg(long, env = "PORT", default_value_t = 8002, global = true)]
    port: u16,

    /// Metrics server bind address
    #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:9102", global = true)]
    metrics_addr: String,

    /// Provider name; the default node category is `<provider>-core`
    #[arg(long, env = "REGISTRY_PROVIDER", default_value = "droq", global = true)]
    provider: String,

    /// How to detect a container network for api_url rewriting
    #[arg(long, env = "CONTAINER_MODE", value_enum, default_value_t = ContainerMode::Auto, global = true)]
    container_mode: ContainerMode,

    /// Service name overrides as node=service
    #[arg(long = "service-alias", env = "SERVICE_ALIASES", value_delimiter = ',', global = true)]
    service_aliases: Vec<String>,

    /// Timeout of the service-name probe in milliseconds
    #[arg(long, env = "PROBE_TIMEOUT_MS", default_value_t = 250, global = true)]
    probe_timeout_ms: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info", global = true)]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON", global = true)]
    log_json: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Ingest declarations and serve the REST API
    Serve,
    /// Collect node.json files from node checkouts into the assets directory
    Harvest {
        /// Directory with one checkout per node (default: <registry-root>/nodes)
        #[arg(long)]
        checkouts_dir: Option<PathBuf>,
        /// Output directory (default: the assets directory)
        #[arg(long)]
        staging_dir: Option<PathBuf>,
    },
}

impl Args {
    fn assets_dir(&self) -> PathBuf {
        self.assets_dir
            .clone()
            .unwrap_or_else(|| self.registry_root.join("assets").join("nodes"))
    }

    fn db_path(&self) -> PathBuf {
        if self.db_path.is_absolute() {
            self.db_path.clone()
        } else {
            self.registry_root.join(&self.db_path)
        }
    }

    fn rest_addr(&self) -> Result<SocketAddr> {
        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|e| Error::Configuration(format!("Invalid host '{}': {}", self.host, e)))?;
        Ok(SocketAddr::new(ip, self.port))
    }

    fn resolver_config(&self) -> Result<ResolverConfig> {
        Ok(ResolverConfig {
            mode: self.container_mode,
            aliases: ServiceAliases::parse(&self.service_aliases)?,
            probe_timeout: Duration::from_millis(self.probe_timeout_ms),
        })
    }
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args)?;

    match &args.command {
        None | Some(Command::Serve) => serve(&args).await,
        Some(Command::Harvest {
            checkouts_dir,
            staging_dir,
        }) => harvest(&args, checkouts_dir.as_deref(), staging_dir.as_deref()),
    }
}

async fn serve(args: &Args) -> Result<()> {
    info!("Starting Executor Node Registry");
    info!("  Version: {}", executor_registry::VERSION);
    info!("  Registry root: {}", args.registry_root.display());
    info!("  Store: {}", args.db_path().display());
    info!("  Assets: {}", args.assets_dir().display());
    info!("  Container mode: {:?}", args.container_mode);

    let rest_addr = args.rest_addr()?;
    let resolver_config = args.resolver_config()?;
    if !resolver_config.aliases.is_empty() {
        info!("  Service aliases: {}", resolver_config.aliases.len());
    }

    let store: Arc<dyn NodeStore> = match RedbNodeStore::open(&args.db_path()) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            error!("Cannot open registry store, aborting: {}", e);
            return Err(e);
        }
    };

    let metrics = RegistryMetrics::new()?;

    // Bootstrap from declarations
    let ingest_config = IngestConfig {
        assets_dir: args.assets_dir(),
        provider: args.provider.clone(),
        ..Default::default()
    };
    let locator = ComponentMapLocator::new(&args.registry_root, std::env::current_dir()?);
    let bootstrapper = Bootstrapper::new(ingest_config, store.clone(), locator, metrics.clone());

    let summary = bootstrapper.bootstrap().await?;
    info!(
        ingested = summary.ingested_count(),
        failed = summary.failed_count(),
        "Registry bootstrap complete"
    );
    debug!(nodes = ?summary.ingested_ids(), "Nodes ingested at startup");

    // Start metrics server
    let metrics_addr = args.metrics_addr.clone();
    let server_metrics = metrics.clone();
    tokio::spawn(async move {
        if let Err(e) = run_metrics_server(&metrics_addr, server_metrics).await {
            error!("Metrics server error: {}", e);
        }
    });

    let service = Arc::new(RegistryService::new(
        store,
        resolver_config.build(),
        metrics,
    ));
    let api_server = Arc::new(ApiServer::new(
        ApiServerConfig { rest_addr },
        service,
        bootstrapper,
    ));

    let server = api_server.clone();
    let mut handle = tokio::spawn(async move { server.run().await });

    tokio::select! {
        result = &mut handle => {
            return result
                .map_err(|e| Error::Internal(format!("API server task failed: {}", e)))?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
            api_server.shutdown();
        }
    }

    handle
        .await
        .map_err(|e| Error::Internal(format!("API server task failed: {}", e)))??;

    info!("Registry shutdown complete");
    Ok(())
}

fn harvest(args: &Args, checkouts_dir: Option<&Path>, staging_dir: Option<&Path>) -> Result<()> {
    let mut config = HarvestConfig::new(&args.registry_root);
    config.staging_dir = args.assets_dir();
    if let Some(dir) = checkouts_dir {
        config.checkouts_dir = dir.to_path_buf();
    }
    if let Some(dir) = staging_dir {
        config.staging_dir = dir.to_path_buf();
    }

    info!(
        "Harvesting declarations from {} into {}",
        config.checkouts_dir.display(),
        config.staging_dir.display()
    );
    let report = Harvester::new(config).run()?;

    for conflict in &report.conflicts {
        warn!(
            node_id = %conflict.node_id,
            "Checkouts '{}' and '{}' declare the same node_id",
            conflict.first_checkout,
            conflict.checkout
        );
    }
    info!(
        "Extracted {} declarations ({} conflicts, {} skipped)",
        report.extracted.len(),
        report.conflicts.len(),
        report.failures.len()
    );
    Ok(())
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) -> Result<()> {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => "trace",
        "debug" => "debug",
        "warn" => "warn",
        "error" => "error",
        _ => "info",
    };

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(format!("{},hyper=warn,tower=warn,axum=info", level)))
        .map_err(|e| Error::Configuration(format!("Invalid log filter: {}", e)))?;

    let result = if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .try_init()
    };
    result.map_err(|e| Error::Internal(format!("Failed to initialize logging: {}", e)))
}

// =============================================================================
// Metrics Server
// =============================================================================

async fn run_metrics_server(addr: &str, metrics: Arc<RegistryMetrics>) -> Result<()> {
    use hyper::header::{HeaderValue, CONTENT_TYPE};
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{Body, Request, Response, Server, StatusCode};

    let make_svc = make_service_fn(move |_conn| {
        let metrics = metrics.clone();
        async move {
            Ok::<_, std::convert::Infallible>(service_fn(move |req: Request<Body>| {
                let metrics = metrics.clone();
                async move {
                    let mut response = Response::new(Body::empty());
                    if req.uri().path() != "/metrics" {
                        *response.status_mut() = StatusCode::NOT_FOUND;
                        *response.body_mut() = Body::from("not found");
                    } else {
                        match metrics.encode() {
                            Ok((content_type, buffer)) => {
                                if let Ok(value) = HeaderValue::from_str(&content_type) {
                                    response.headers_mut().insert(CONTENT_TYPE, value);
                                }
                                *response.body_mut() = Body::from(buffer);
                            }
                            Err(e) => {
                                *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
                                *response.body_mut() = Body::from(e.to_string());
                            }
                        }
                    }
                    Ok::<_, std::convert::Infallible>(response)
                }
            }))
        }
    });

    let addr: SocketAddr = addr
        .parse()
        .map_err(|e| Error::Configuration(format!("Invalid metrics server address: {}", e)))?;

    info!("Metrics server listening on {}", addr);
    Server::bind(&addr)
        .serve(make_svc)
        .await
        .map_err(|e| Error::Internal(format!("Metrics server error: {}", e)))?;

    Ok(())
}
