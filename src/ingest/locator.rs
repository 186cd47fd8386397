//! Component Map Locator
//!
//! Resolves a declaration's `components_json_path` against an ordered list
//! of base-path candidates and loads the first one that exists.

use crate::domain::model::ComponentMap;
use crate::error::{Error, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

// =============================================================================
// Path Candidates
// =============================================================================

/// One base-path strategy, tried in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathCandidate {
    /// The path as given, only when it is absolute
    Absolute,
    /// Relative to the registry's own root
    RegistryRoot(PathBuf),
    /// Relative to the directory containing the registry root
    ParentRoot(PathBuf),
    /// Relative to the working directory
    WorkingDir(PathBuf),
}

impl PathCandidate {
    /// Candidate path for `raw`, if this strategy applies to it
    pub fn apply(&self, raw: &Path) -> Option<PathBuf> {
        match self {
            PathCandidate::Absolute => raw.is_absolute().then(|| raw.to_path_buf()),
            PathCandidate::RegistryRoot(base)
            | PathCandidate::ParentRoot(base)
            | PathCandidate::WorkingDir(base) => {
                (!raw.is_absolute()).then(|| base.join(raw))
            }
        }
    }
}

// =============================================================================
// Locator
// =============================================================================

/// Ordered chain of path candidates for external component maps
#[derive(Debug, Clone)]
pub struct ComponentMapLocator {
    candidates: Vec<PathCandidate>,
}

impl ComponentMapLocator {
    /// Standard chain: absolute, registry root, its parent, working directory
    pub fn new(registry_root: impl Into<PathBuf>, working_dir: impl Into<PathBuf>) -> Self {
        let registry_root = registry_root.into();
        let mut candidates = vec![
            PathCandidate::Absolute,
            PathCandidate::RegistryRoot(registry_root.clone()),
        ];
        if let Some(parent) = registry_root.parent() {
            if !parent.as_os_str().is_empty() {
                candidates.push(PathCandidate::ParentRoot(parent.to_path_buf()));
            }
        }
        candidates.push(PathCandidate::WorkingDir(working_dir.into()));
        Self { candidates }
    }

    pub fn candidates(&self) -> &[PathCandidate] {
        &self.candidates
    }

    /// Candidate paths for `raw`, generated lazily in priority order
    pub fn candidate_paths<'a>(&'a self, raw: &'a Path) -> impl Iterator<Item = PathBuf> + 'a {
        self.candidates.iter().filter_map(move |c| c.apply(raw))
    }

    /// First existing candidate for `raw`
    pub async fn locate(&self, raw: &str) -> Result<PathBuf> {
        let raw_path = Path::new(raw);
        for candidate in self.candidate_paths(raw_path) {
            if tokio::fs::try_exists(&candidate).await.unwrap_or(false) {
                debug!(path = %candidate.display(), "Resolved component map");
                return Ok(candidate);
            }
        }
        Err(Error::UnresolvedReference {
            path: raw.to_string(),
            tried: self
                .candidate_paths(raw_path)
                .map(|p| p.display().to_string())
                .collect(),
        })
    }

    /// Locate and parse an external component map
    pub async fn load(&self, raw: &str) -> Result<ComponentMap> {
        let path = self.locate(raw).await?;
        let content = tokio::fs::read(&path).await?;
        let map: ComponentMap =
            serde_json::from_slice(&content).map_err(|e| Error::MalformedDeclaration {
                origin: path.display().to_string(),
                reason: format!("invalid component map: {}", e),
            })?;
        info!(path = %path.display(), count = map.len(), "Loaded component map");
        Ok(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::fs;

    #[test]
    fn test_chain_order() {
        let locator = ComponentMapLocator::new("/srv/droq/registry", "/work");
        assert_eq!(
            locator.candidates(),
            &[
                PathCandidate::Absolute,
                PathCandidate::RegistryRoot("/srv/droq/registry".into()),
                PathCandidate::ParentRoot("/srv/droq".into()),
                PathCandidate::WorkingDir("/work".into()),
            ]
        );

        let relative: Vec<PathBuf> = locator
            .candidate_paths(Path::new("nodes/a/components.json"))
            .collect();
        assert_eq!(
            relative,
            vec![
                PathBuf::from("/srv/droq/registry/nodes/a/components.json"),
                PathBuf::from("/srv/droq/nodes/a/components.json"),
                PathBuf::from("/work/nodes/a/components.json"),
            ]
        );

        let absolute: Vec<PathBuf> = locator
            .candidate_paths(Path::new("/abs/components.json"))
            .collect();
        assert_eq!(absolute, vec![PathBuf::from("/abs/components.json")]);
    }

    #[tokio::test]
    async fn test_first_existing_candidate_wins() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("registry");
        fs::create_dir_all(root.join("maps")).unwrap();
        fs::create_dir_all(dir.path().join("maps")).unwrap();
        fs::write(root.join("maps/c.json"), "{}").unwrap();
        fs::write(dir.path().join("maps/c.json"), "{}").unwrap();

        let locator = ComponentMapLocator::new(&root, dir.path().join("cwd"));
        assert_eq!(
            locator.locate("maps/c.json").await.unwrap(),
            root.join("maps/c.json")
        );

        // Only the parent has it
        fs::remove_file(root.join("maps/c.json")).unwrap();
        assert_eq!(
            locator.locate("maps/c.json").await.unwrap(),
            dir.path().join("maps/c.json")
        );
    }

    #[tokio::test]
    async fn test_unresolved_reports_all_tried_paths() {
        let dir = tempfile::tempdir().unwrap();
        let locator = ComponentMapLocator::new(dir.path().join("registry"), dir.path());

        let result = locator.locate("missing/components.json").await;
        assert_matches!(
            result,
            Err(Error::UnresolvedReference { ref tried, .. }) if tried.len() == 3
        );
    }

    #[tokio::test]
    async fn test_load_parses_map() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("components.json");
        fs::write(&path, r#"{"A": "pkg.a", "B": "pkg.b"}"#).unwrap();

        let locator = ComponentMapLocator::new(dir.path(), dir.path());
        let map = locator.load(path.to_str().unwrap()).await.unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(map["B"], "pkg.b");

        fs::write(&path, "[]").unwrap();
        assert_matches!(
            locator.load(path.to_str().unwrap()).await,
            Err(Error::MalformedDeclaration { .. })
        );
    }
}
