//! Declaration Harvester
//!
//! Collects `node.json` from each node checkout and writes it into the
//! staging directory the bootstrapper reads. When two checkouts declare the
//! same identity, the later one (by directory name) is written under the
//! checkout's directory name instead and a warning is logged; ingestion then
//! prefers the canonical `<node_id>.json` file. A file name is never written
//! twice in one run: when the preferred name is taken the declaration goes to
//! `<checkout>-<node_id>.json`.

use crate::error::{Error, Result};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Component, Path, PathBuf};
use tracing::{error, info, warn};

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the harvester
#[derive(Debug, Clone)]
pub struct HarvestConfig {
    /// Root that `source_code_location` is made relative to
    pub registry_root: PathBuf,
    /// Directory containing one checkout per node
    pub checkouts_dir: PathBuf,
    /// Output directory (the bootstrapper's assets dir)
    pub staging_dir: PathBuf,
    /// Declaration file name inside each checkout
    pub manifest_name: String,
}

impl HarvestConfig {
    pub fn new(registry_root: impl Into<PathBuf>) -> Self {
        let registry_root = registry_root.into();
        Self {
            checkouts_dir: registry_root.join("nodes"),
            staging_dir: registry_root.join("assets").join("nodes"),
            registry_root,
            manifest_name: "node.json".to_string(),
        }
    }
}

// =============================================================================
// Report
// =============================================================================

/// A declaration written to the staging directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarvestedNode {
    pub node_id: String,
    pub checkout: String,
    pub output: PathBuf,
}

/// Two checkouts declaring the same identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityConflict {
    pub node_id: String,
    /// Checkout that kept the canonical file name
    pub first_checkout: String,
    /// Checkout written under its directory name
    pub checkout: String,
}

/// Outcome of a harvest run
#[derive(Debug, Default)]
pub struct HarvestReport {
    pub extracted: Vec<HarvestedNode>,
    pub conflicts: Vec<IdentityConflict>,
    /// `(checkout, reason)` for skipped checkouts
    pub failures: Vec<(String, String)>,
}

// =============================================================================
// Staging Names
// =============================================================================

/// File names handed out during one run
#[derive(Debug, Default)]
struct StagingNames {
    /// node_id -> checkout that claimed it first
    owners: BTreeMap<String, String>,
    /// Stems already written
    stems: BTreeSet<String>,
}

impl StagingNames {
    /// First free stem among `candidates`, marked as taken
    fn claim(&mut self, candidates: [String; 2]) -> Option<String> {
        let stem = candidates.into_iter().find(|s| !self.stems.contains(s))?;
        self.stems.insert(stem.clone());
        Some(stem)
    }
}

/// True when `stem` names a single entry inside a directory
fn is_plain_file_stem(stem: &str) -> bool {
    if stem.contains(|c: char| c == '/' || c == '\\') {
        return false;
    }
    let mut components = Path::new(stem).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(name)), None) if name == stem
    )
}

// =============================================================================
// Harvester
// =============================================================================

/// Extracts per-node declarations from checkouts
pub struct Harvester {
    config: HarvestConfig,
}

impl Harvester {
    pub fn new(config: HarvestConfig) -> Self {
        Self { config }
    }

    /// Run one harvest, replacing the staging directory's declarations
    pub fn run(&self) -> Result<HarvestReport> {
        let checkouts_dir = &self.config.checkouts_dir;
        if !checkouts_dir.is_dir() {
            return Err(Error::Configuration(format!(
                "checkouts directory not found: {} (are submodules initialized?)",
                checkouts_dir.display()
            )));
        }

        fs::create_dir_all(&self.config.staging_dir)?;
        self.clear_staging()?;

        let mut checkouts: Vec<PathBuf> = fs::read_dir(checkouts_dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_dir())
            .collect();
        checkouts.sort();
        info!(
            "Found {} checkout directories in {}",
            checkouts.len(),
            checkouts_dir.display()
        );

        let mut report = HarvestReport::default();
        let mut names = StagingNames::default();

        for checkout in checkouts {
            let checkout_name = checkout
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();

            match self.harvest_one(&checkout, &checkout_name, &mut names, &mut report) {
                Ok(()) => {}
                Err(e) => {
                    error!(checkout = %checkout_name, error = %e, "Failed to harvest checkout");
                    report.failures.push((checkout_name, e.to_string()));
                }
            }
        }

        info!(
            extracted = report.extracted.len(),
            conflicts = report.conflicts.len(),
            failed = report.failures.len(),
            "Harvest complete"
        );
        Ok(report)
    }

    fn harvest_one(
        &self,
        checkout: &Path,
        checkout_name: &str,
        names: &mut StagingNames,
        report: &mut HarvestReport,
    ) -> Result<()> {
        let manifest = checkout.join(&self.config.manifest_name);
        if !manifest.is_file() {
            warn!(checkout = %checkout_name, "No {} found", self.config.manifest_name);
            return Ok(());
        }

        let origin = manifest.display().to_string();
        let content = fs::read(&manifest)?;
        let mut declaration: serde_json::Value =
            serde_json::from_slice(&content).map_err(|e| Error::MalformedDeclaration {
                origin: origin.clone(),
                reason: format!("invalid JSON: {}", e),
            })?;

        let node_id = declaration
            .get("node_id")
            .and_then(|v| v.as_str())
            .filter(|id| !id.trim().is_empty())
            .map(str::to_string)
            .ok_or_else(|| Error::MalformedDeclaration {
                origin: origin.clone(),
                reason: "missing node_id".into(),
            })?;

        if !is_plain_file_stem(&node_id) {
            return Err(Error::MalformedDeclaration {
                origin,
                reason: format!("node_id '{}' is not usable as a file name", node_id),
            });
        }

        let Some(object) = declaration.as_object_mut() else {
            return Err(Error::MalformedDeclaration {
                origin,
                reason: "declaration is not a JSON object".into(),
            });
        };
        object.insert(
            "source_code_location".into(),
            serde_json::Value::String(self.source_location(checkout)),
        );

        let fallback = format!("{}-{}", checkout_name, node_id);
        let first_checkout = names.owners.get(&node_id).cloned();
        let preferred = match &first_checkout {
            Some(_) => checkout_name.to_string(),
            None => node_id.clone(),
        };
        let file_stem = names
            .claim([preferred, fallback])
            .ok_or_else(|| Error::MalformedDeclaration {
                origin,
                reason: format!("no free file name for node_id '{}'", node_id),
            })?;

        match first_checkout {
            Some(first) => {
                warn!(
                    node_id = %node_id,
                    first_checkout = %first,
                    checkout = %checkout_name,
                    file = %file_stem,
                    "Node ID conflict, writing under a checkout-derived file name"
                );
                report.conflicts.push(IdentityConflict {
                    node_id: node_id.clone(),
                    first_checkout: first,
                    checkout: checkout_name.to_string(),
                });
            }
            None => {
                names.owners.insert(node_id.clone(), checkout_name.to_string());
            }
        }

        let output = self.config.staging_dir.join(format!("{}.json", file_stem));
        fs::write(&output, serde_json::to_vec_pretty(&declaration)?)?;
        info!(node_id = %node_id, checkout = %checkout_name, output = %output.display(), "Extracted declaration");

        report.extracted.push(HarvestedNode {
            node_id,
            checkout: checkout_name.to_string(),
            output,
        });
        Ok(())
    }

    /// Checkout path relative to the registry root, or as-is when outside it
    fn source_location(&self, checkout: &Path) -> String {
        checkout
            .strip_prefix(&self.config.registry_root)
            .unwrap_or(checkout)
            .display()
            .to_string()
    }

    fn clear_staging(&self) -> Result<()> {
        let pattern = self.config.staging_dir.join("*.json");
        let entries = glob::glob(&pattern.to_string_lossy())
            .map_err(|e| Error::Configuration(format!("invalid staging path: {}", e)))?;
        for path in entries.flatten() {
            fs::remove_file(&path)?;
        }
        Ok(())
    }
}
