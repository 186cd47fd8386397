//! Declaration Documents
//!
//! Parses and validates one per-node declaration document into a `Node`
//! plus the location of its component map.

use crate::domain::model::{ComponentMap, DeploymentLocation, Node, STATUS_ACTIVE};
use crate::error::{Error, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::Deserialize;
use std::path::Path;
use tracing::warn;

// =============================================================================
// Declaration Source
// =============================================================================

/// Raw bytes of one declaration plus where they came from
#[derive(Debug, Clone)]
pub struct DeclarationSource {
    /// Human-readable origin, usually the file path
    pub origin: String,
    /// File stem, used to recognise canonical `<node_id>.json` files
    pub stem: Option<String>,
    pub content: Vec<u8>,
}

impl DeclarationSource {
    /// Build a source from in-memory content
    pub fn new(origin: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            origin: origin.into(),
            stem: None,
            content: content.into(),
        }
    }

    /// Set the file stem explicitly
    pub fn with_stem(mut self, stem: impl Into<String>) -> Self {
        self.stem = Some(stem.into());
        self
    }

    /// Read a declaration file
    pub async fn read(path: &Path) -> Result<Self> {
        let content = tokio::fs::read(path).await?;
        Ok(Self {
            origin: path.display().to_string(),
            stem: path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned()),
            content,
        })
    }
}

// =============================================================================
// Parsed Declaration
// =============================================================================

/// Where a node's component map comes from
#[derive(Debug, Clone, PartialEq)]
pub enum ComponentSource {
    /// `components` given inline
    Inline(ComponentMap),
    /// `components_json_path` pointer to an external document
    External(String),
    /// Neither given
    Absent,
}

/// A validated declaration ready for ingestion
#[derive(Debug, Clone)]
pub struct Declaration {
    pub origin: String,
    pub stem: Option<String>,
    pub node: Node,
    pub components: ComponentSource,
}

impl Declaration {
    pub fn node_id(&self) -> &str {
        &self.node.node_id
    }

    /// True when the file is named after the identity it declares
    pub fn is_canonical(&self) -> bool {
        self.stem.as_deref() == Some(self.node.node_id.as_str())
    }
}

/// Values applied when a declaration omits them
#[derive(Debug, Clone)]
pub struct DeclarationDefaults {
    pub category: String,
}

#[derive(Debug, Deserialize)]
struct DeclarationFields {
    node_id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    source_code_location: Option<String>,
    #[serde(default)]
    docker_image: Option<String>,
    #[serde(default)]
    deployment_location: Option<String>,
    #[serde(default)]
    api_url: Option<String>,
    #[serde(default)]
    ip_address: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    components: Option<ComponentMap>,
    #[serde(default)]
    components_json_path: Option<String>,
    #[serde(default)]
    repository_url: Option<String>,
    #[serde(default)]
    commit: Option<String>,
    #[serde(default)]
    created_at: Option<String>,
    #[serde(default)]
    updated_at: Option<String>,
}

fn malformed(origin: &str, reason: impl Into<String>) -> Error {
    Error::MalformedDeclaration {
        origin: origin.to_string(),
        reason: reason.into(),
    }
}

/// Parse and validate one declaration
pub fn parse_declaration(
    source: &DeclarationSource,
    defaults: &DeclarationDefaults,
) -> Result<Declaration> {
    let origin = source.origin.as_str();

    let raw: serde_json::Value = serde_json::from_slice(&source.content)
        .map_err(|e| malformed(origin, format!("invalid JSON: {}", e)))?;

    let Some(object) = raw.as_object() else {
        return Err(malformed(origin, "declaration is not a JSON object"));
    };

    match object.get("node_id") {
        Some(serde_json::Value::String(id)) if !id.trim().is_empty() => {}
        Some(serde_json::Value::String(_)) => return Err(malformed(origin, "node_id is empty")),
        Some(_) => return Err(malformed(origin, "node_id is not a string")),
        None => return Err(malformed(origin, "missing node_id")),
    }

    let fields: DeclarationFields =
        serde_json::from_value(raw.clone()).map_err(|e| malformed(origin, e.to_string()))?;

    let deployment_location = match fields.deployment_location.as_deref() {
        None => DeploymentLocation::default(),
        Some(value) => value
            .parse::<DeploymentLocation>()
            .map_err(|reason| malformed(origin, reason))?,
    };

    let components = match (fields.components, fields.components_json_path) {
        (Some(map), _) => ComponentSource::Inline(map),
        (None, Some(path)) => ComponentSource::External(path),
        (None, None) => ComponentSource::Absent,
    };

    let node = Node {
        created_at: parse_timestamp(origin, "created_at", fields.created_at.as_deref()),
        updated_at: parse_timestamp(origin, "updated_at", fields.updated_at.as_deref()),
        node_id: fields.node_id,
        name: fields.name.unwrap_or_default(),
        description: fields.description.unwrap_or_default(),
        source_code_location: fields.source_code_location,
        docker_image: fields.docker_image,
        deployment_location,
        api_url: fields.api_url,
        ip_address: fields.ip_address,
        status: fields.status.unwrap_or_else(|| STATUS_ACTIVE.to_string()),
        category: fields
            .category
            .unwrap_or_else(|| defaults.category.clone()),
        repository_url: fields.repository_url,
        commit: fields.commit,
        raw_declaration: raw,
    };

    Ok(Declaration {
        origin: source.origin.clone(),
        stem: source.stem.clone(),
        node,
        components,
    })
}

/// Parse an ISO-8601 timestamp; unparsable values are dropped
fn parse_timestamp(origin: &str, field: &str, value: Option<&str>) -> Option<DateTime<Utc>> {
    let value = value?;
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Some(ts.with_timezone(&Utc));
    }
    // Timestamps without an offset are taken as UTC
    if let Ok(naive) = NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(naive.and_utc());
    }
    // Date-only values are midnight UTC
    if let Some(midnight) = NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
    {
        return Some(midnight.and_utc());
    }
    warn!(origin = %origin, field = %field, value = %value, "Ignoring unparsable timestamp");
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn defaults() -> DeclarationDefaults {
        DeclarationDefaults {
            category: "droq-core".into(),
        }
    }

    fn parse(json: &str) -> Result<Declaration> {
        parse_declaration(&DeclarationSource::new("test.json", json), &defaults())
    }

    #[test]
    fn test_parse_full_declaration() {
        let decl = parse(
            r#"{
                "node_id": "lfx-runtime",
                "name": "LFX Runtime",
                "description": "Runs LFX components",
                "docker_image": "droq/lfx:1.0",
                "deployment_location": "k8s",
                "api_url": "http://localhost:8000",
                "category": "custom",
                "components": {"TextInput": "lfx.components.input.TextInput"},
                "commit": "abc123",
                "created_at": "2025-01-02T03:04:05Z",
                "future_field": {"kept": true}
            }"#,
        )
        .unwrap();

        assert_eq!(decl.node_id(), "lfx-runtime");
        assert_eq!(decl.node.deployment_location, DeploymentLocation::K8s);
        assert_eq!(decl.node.status, STATUS_ACTIVE);
        assert_eq!(decl.node.category, "custom");
        assert_eq!(decl.node.commit.as_deref(), Some("abc123"));
        assert!(decl.node.created_at.is_some());
        assert_eq!(decl.node.raw_declaration["future_field"]["kept"], true);
        assert_matches!(decl.components, ComponentSource::Inline(ref map) if map.len() == 1);
    }

    #[test]
    fn test_defaults_applied() {
        let decl = parse(r#"{"node_id": "bare"}"#).unwrap();

        assert_eq!(decl.node.name, "");
        assert_eq!(decl.node.status, "active");
        assert_eq!(decl.node.category, "droq-core");
        assert_eq!(decl.node.deployment_location, DeploymentLocation::Local);
        assert_eq!(decl.components, ComponentSource::Absent);
    }

    #[test]
    fn test_inline_map_preferred_over_pointer() {
        let decl = parse(
            r#"{"node_id": "n", "components": {}, "components_json_path": "x/components.json"}"#,
        )
        .unwrap();
        assert_eq!(decl.components, ComponentSource::Inline(ComponentMap::new()));

        let decl = parse(r#"{"node_id": "n", "components_json_path": "x/components.json"}"#)
            .unwrap();
        assert_eq!(
            decl.components,
            ComponentSource::External("x/components.json".into())
        );
    }

    #[test]
    fn test_duplicate_component_keys_last_wins() {
        let decl = parse(r#"{"node_id": "n", "components": {"A": "first", "A": "second"}}"#)
            .unwrap();
        let ComponentSource::Inline(map) = decl.components else {
            panic!("expected inline components");
        };
        assert_eq!(map.len(), 1);
        assert_eq!(map["A"], "second");
    }

    #[test]
    fn test_rejects_malformed_documents() {
        assert_matches!(parse("{not json"), Err(Error::MalformedDeclaration { .. }));
        assert_matches!(parse("[1, 2]"), Err(Error::MalformedDeclaration { .. }));
        assert_matches!(
            parse(r#"{"name": "no id"}"#),
            Err(Error::MalformedDeclaration { reason, .. }) if reason == "missing node_id"
        );
        assert_matches!(parse(r#"{"node_id": "  "}"#), Err(Error::MalformedDeclaration { .. }));
        assert_matches!(parse(r#"{"node_id": 7}"#), Err(Error::MalformedDeclaration { .. }));
        assert_matches!(
            parse(r#"{"node_id": "n", "deployment_location": "mars"}"#),
            Err(Error::MalformedDeclaration { .. })
        );
        assert_matches!(
            parse(r#"{"node_id": "n", "components": {"A": 1}}"#),
            Err(Error::MalformedDeclaration { .. })
        );
    }

    #[test]
    fn test_bad_timestamp_is_dropped() {
        let decl = parse(
            r#"{"node_id": "n", "created_at": "yesterday", "updated_at": "2025-03-01T10:00:00.250"}"#,
        )
        .unwrap();
        assert!(decl.node.created_at.is_none());
        assert!(decl.node.updated_at.is_some());
    }

    #[test]
    fn test_date_only_timestamp_is_midnight_utc() {
        let decl = parse(r#"{"node_id": "n", "created_at": "2025-01-02", "updated_at": "2025-13-40"}"#)
            .unwrap();
        assert_eq!(
            decl.node.created_at.map(|ts| ts.to_rfc3339()).as_deref(),
            Some("2025-01-02T00:00:00+00:00")
        );
        assert!(decl.node.updated_at.is_none());
    }

    #[test]
    fn test_canonical_stem() {
        let source = DeclarationSource::new("assets/nodes/n.json", r#"{"node_id": "n"}"#)
            .with_stem("n");
        let decl = parse_declaration(&source, &defaults()).unwrap();
        assert!(decl.is_canonical());

        let source = DeclarationSource::new("assets/nodes/other.json", r#"{"node_id": "n"}"#)
            .with_stem("other");
        let decl = parse_declaration(&source, &defaults()).unwrap();
        assert!(!decl.is_canonical());
    }
}
