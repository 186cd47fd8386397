//! Registry Bootstrap
//!
//! Loads every declaration document from the assets directory into the
//! store. The pass is best-effort per item: a bad document is recorded in
//! the summary and the rest of the batch carries on. Each node's record and
//! component set are written in a single transaction, so a failed item
//! leaves the previous data for that node untouched.

use crate::domain::model::ComponentMap;
use crate::domain::ports::NodeStore;
use crate::error::{Error, Result};
use crate::ingest::declaration::{
    parse_declaration, ComponentSource, Declaration, DeclarationDefaults, DeclarationSource,
};
use crate::ingest::events::RegistryEvent;
use crate::ingest::locator::ComponentMapLocator;
use crate::metrics::RegistryMetrics;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the ingestion pipeline
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Directory holding one declaration file per node
    pub assets_dir: PathBuf,
    /// File pattern inside `assets_dir`
    pub pattern: String,
    /// Provider name; the default category is `<provider>-core`
    pub provider: String,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            assets_dir: PathBuf::from("assets/nodes"),
            pattern: "*.json".to_string(),
            provider: "droq".to_string(),
        }
    }
}

impl IngestConfig {
    pub fn default_category(&self) -> String {
        format!("{}-core", self.provider)
    }
}

// =============================================================================
// Outcomes
// =============================================================================

/// Result of ingesting one declaration
#[derive(Debug)]
pub enum ItemOutcome {
    Ingested {
        origin: String,
        node_id: String,
        component_count: usize,
    },
    Failed {
        origin: String,
        error: Error,
    },
}

impl ItemOutcome {
    pub fn origin(&self) -> &str {
        match self {
            ItemOutcome::Ingested { origin, .. } | ItemOutcome::Failed { origin, .. } => origin,
        }
    }

    pub fn is_ingested(&self) -> bool {
        matches!(self, ItemOutcome::Ingested { .. })
    }
}

/// Aggregated outcome of one ingestion pass, in input order
#[derive(Debug, Default)]
pub struct IngestSummary {
    pub outcomes: Vec<ItemOutcome>,
}

impl IngestSummary {
    pub fn ingested_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_ingested()).count()
    }

    pub fn failed_count(&self) -> usize {
        self.outcomes.len() - self.ingested_count()
    }

    /// Node ids written during the pass
    pub fn ingested_ids(&self) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter_map(|o| match o {
                ItemOutcome::Ingested { node_id, .. } => Some(node_id.as_str()),
                ItemOutcome::Failed { .. } => None,
            })
            .collect()
    }

    /// `(origin, error)` of every skipped item
    pub fn failures(&self) -> impl Iterator<Item = (&str, &Error)> {
        self.outcomes.iter().filter_map(|o| match o {
            ItemOutcome::Failed { origin, error } => Some((origin.as_str(), error)),
            ItemOutcome::Ingested { .. } => None,
        })
    }
}

// =============================================================================
// Identity Conflicts
// =============================================================================

/// Pick one declaration per `node_id`.
///
/// Within a group the canonical file (stem equals node_id) wins; otherwise
/// the first by origin. Losers come back as `DuplicateIdentity` failures.
/// Both lists keep the input index of every item.
pub fn resolve_identity_conflicts(
    declarations: Vec<(usize, Declaration)>,
) -> (Vec<(usize, Declaration)>, Vec<(usize, Error)>) {
    let mut groups: BTreeMap<String, Vec<(usize, Declaration)>> = BTreeMap::new();
    for (index, decl) in declarations {
        groups
            .entry(decl.node_id().to_string())
            .or_default()
            .push((index, decl));
    }

    let mut winners = Vec::new();
    let mut losers = Vec::new();

    for (node_id, mut group) in groups {
        group.sort_by(|a, b| a.1.origin.cmp(&b.1.origin).then(a.0.cmp(&b.0)));
        let chosen = group
            .iter()
            .position(|(_, d)| d.is_canonical())
            .unwrap_or(0);

        for (pos, (index, decl)) in group.into_iter().enumerate() {
            if pos == chosen {
                winners.push((index, decl));
            } else {
                warn!(
                    node_id = %node_id,
                    origin = %decl.origin,
                    "Duplicate node identity in batch, keeping the preferred declaration"
                );
                losers.push((
                    index,
                    Error::DuplicateIdentity {
                        node_id: node_id.clone(),
                        origin: decl.origin,
                    },
                ));
            }
        }
    }

    winners.sort_by_key(|(index, _)| *index);
    (winners, losers)
}

// =============================================================================
// Discovery
// =============================================================================

/// Files in `assets_dir` matching `pattern`, sorted. Blocking.
fn discover_files(assets_dir: &Path, pattern: &str) -> Result<Vec<PathBuf>> {
    if !assets_dir.is_dir() {
        warn!(dir = %assets_dir.display(), "Assets directory not found");
        return Ok(Vec::new());
    }

    let pattern = assets_dir.join(pattern);
    let pattern = pattern.to_string_lossy();
    let entries = glob::glob(&pattern)
        .map_err(|e| Error::Configuration(format!("invalid asset pattern {}: {}", pattern, e)))?;

    let mut files = Vec::new();
    for entry in entries {
        match entry {
            Ok(path) if path.is_file() => files.push(path),
            Ok(_) => {}
            Err(e) => warn!("Unreadable asset entry: {}", e),
        }
    }
    files.sort();
    Ok(files)
}

// =============================================================================
// Bootstrapper
// =============================================================================

/// Drives ingestion of declaration documents into a [`NodeStore`]
pub struct Bootstrapper {
    config: IngestConfig,
    store: Arc<dyn NodeStore>,
    locator: ComponentMapLocator,
    metrics: Arc<RegistryMetrics>,
    event_sender: broadcast::Sender<RegistryEvent>,
    /// Serializes whole passes
    pass_lock: Mutex<()>,
}

impl Bootstrapper {
    /// Create a new bootstrapper
    pub fn new(
        config: IngestConfig,
        store: Arc<dyn NodeStore>,
        locator: ComponentMapLocator,
        metrics: Arc<RegistryMetrics>,
    ) -> Arc<Self> {
        let (event_sender, _) = broadcast::channel(1024);
        Arc::new(Self {
            config,
            store,
            locator,
            metrics,
            event_sender,
            pass_lock: Mutex::new(()),
        })
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    /// Get an event receiver
    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.event_sender.subscribe()
    }

    /// Declaration files in the assets directory, sorted by path
    pub async fn discover(&self) -> Result<Vec<PathBuf>> {
        let assets_dir = self.config.assets_dir.clone();
        let pattern = self.config.pattern.clone();
        tokio::task::spawn_blocking(move || discover_files(&assets_dir, &pattern))
            .await
            .map_err(|e| Error::Internal(format!("discovery task failed: {}", e)))?
    }

    /// Ingest every declaration file found in the assets directory
    pub async fn bootstrap(&self) -> Result<IngestSummary> {
        let files = self.discover().await?;
        if files.is_empty() {
            warn!(dir = %self.config.assets_dir.display(), "No declaration files found");
        } else {
            info!(
                "Bootstrapping registry from {} node declaration files",
                files.len()
            );
        }
        Ok(self.ingest_files(&files).await)
    }

    /// Read and ingest the given declaration files
    pub async fn ingest_files(&self, paths: &[PathBuf]) -> IngestSummary {
        let mut sources = Vec::with_capacity(paths.len());
        let mut read_failures = Vec::new();

        for path in paths {
            match DeclarationSource::read(path).await {
                Ok(source) => sources.push(source),
                Err(error) => read_failures.push((path.display().to_string(), error)),
            }
        }

        // Unreadable files are reported after the readable ones
        let mut summary = self.ingest(sources).await;
        for (origin, error) in read_failures {
            self.reject(&origin, &error);
            summary.outcomes.push(ItemOutcome::Failed { origin, error });
        }
        summary
    }

    /// Ingest a batch of declaration documents
    pub async fn ingest(&self, sources: Vec<DeclarationSource>) -> IngestSummary {
        let _pass = self.pass_lock.lock().await;

        let defaults = DeclarationDefaults {
            category: self.config.default_category(),
        };
        let mut slots: Vec<Option<ItemOutcome>> = Vec::with_capacity(sources.len());
        slots.resize_with(sources.len(), || None);

        let mut parsed = Vec::new();
        for (index, source) in sources.iter().enumerate() {
            match parse_declaration(source, &defaults) {
                Ok(decl) => parsed.push((index, decl)),
                Err(error) => {
                    self.reject(&source.origin, &error);
                    slots[index] = Some(ItemOutcome::Failed {
                        origin: source.origin.clone(),
                        error,
                    });
                }
            }
        }

        let (winners, losers) = resolve_identity_conflicts(parsed);
        for (index, error) in losers {
            let origin = sources[index].origin.clone();
            self.reject(&origin, &error);
            slots[index] = Some(ItemOutcome::Failed { origin, error });
        }

        for (index, decl) in winners {
            slots[index] = Some(self.ingest_one(decl).await);
        }

        let summary = IngestSummary {
            outcomes: slots.into_iter().flatten().collect(),
        };

        info!(
            ingested = summary.ingested_count(),
            failed = summary.failed_count(),
            "Registry bootstrap completed"
        );
        let _ = self.event_sender.send(RegistryEvent::RefreshCompleted {
            ingested: summary.ingested_count() as u32,
            failed: summary.failed_count() as u32,
        });
        summary
    }

    async fn ingest_one(&self, decl: Declaration) -> ItemOutcome {
        let components = self.resolve_components(&decl).await;
        let node_id = decl.node.node_id.clone();

        match self.store.apply_node(&decl.node, &components).await {
            Ok(()) => {
                info!(
                    node_id = %node_id,
                    count = components.len(),
                    "Ingested node declaration"
                );
                self.metrics.nodes_ingested.inc();
                let _ = self.event_sender.send(RegistryEvent::NodeIngested {
                    node_id: node_id.clone(),
                    origin: decl.origin.clone(),
                    component_count: components.len() as u32,
                });
                ItemOutcome::Ingested {
                    origin: decl.origin,
                    node_id,
                    component_count: components.len(),
                }
            }
            Err(error) => {
                self.reject(&decl.origin, &error);
                ItemOutcome::Failed {
                    origin: decl.origin,
                    error,
                }
            }
        }
    }

    /// Inline map, else the external document, else empty
    async fn resolve_components(&self, decl: &Declaration) -> ComponentMap {
        match &decl.components {
            ComponentSource::Inline(map) => {
                debug!(node_id = %decl.node_id(), count = map.len(), "Using inline components");
                map.clone()
            }
            ComponentSource::External(path) => match self.locator.load(path).await {
                Ok(map) => map,
                Err(e) => {
                    warn!(
                        node_id = %decl.node_id(),
                        error = %e,
                        "Component map unavailable, registering node without components"
                    );
                    self.metrics
                        .ingest_failures
                        .with_label_values(&[e.label()])
                        .inc();
                    ComponentMap::new()
                }
            },
            ComponentSource::Absent => {
                warn!(
                    node_id = %decl.node_id(),
                    "No components or components_json_path declared"
                );
                ComponentMap::new()
            }
        }
    }

    fn reject(&self, origin: &str, error: &Error) {
        warn!(origin = %origin, error = %error, "Skipping node declaration");
        self.metrics
            .ingest_failures
            .with_label_values(&[error.label()])
            .inc();
        let _ = self.event_sender.send(RegistryEvent::ItemRejected {
            origin: origin.to_string(),
            kind: error.label().to_string(),
            reason: error.to_string(),
        });
    }
}
