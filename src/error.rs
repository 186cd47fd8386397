//! Error types for the Executor Registry
//!
//! Provides structured error types for the store, ingestion pipeline,
//! query service and address resolver.

use thiserror::Error;

/// Unified error type for the registry
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    // =========================================================================
    // Storage Errors
    // =========================================================================
    #[error("Failed to open registry store: {0}")]
    StorageOpen(String),

    #[error("Store transaction error: {0}")]
    StorageTransaction(String),

    #[error("Store table error: {0}")]
    StorageTable(String),

    #[error("Store read error: {0}")]
    StorageRead(String),

    #[error("Store write error: {0}")]
    StorageWrite(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    // =========================================================================
    // Ingestion Errors
    // =========================================================================
    #[error("Malformed declaration {origin}: {reason}")]
    MalformedDeclaration { origin: String, reason: String },

    #[error("Duplicate identity {node_id} in {origin}")]
    DuplicateIdentity { node_id: String, origin: String },

    #[error("Component map not found: {path} (tried {tried:?})")]
    UnresolvedReference { path: String, tried: Vec<String> },

    // =========================================================================
    // Query Errors
    // =========================================================================
    #[error("Node '{node_id}' not found in registry")]
    NodeNotFound { node_id: String },

    #[error("Component '{component_class}' not found in any executor node")]
    ComponentNotFound { component_class: String },

    // =========================================================================
    // Address Resolution Errors
    // =========================================================================
    #[error("Address resolution failed: {0}")]
    AddressResolution(String),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    // =========================================================================
    // Parse / IO Errors
    // =========================================================================
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Coarse error classification used by callers to decide how to react
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad structured data or missing identity; skip the item
    MalformedInput,
    /// Component-map pointer resolved nowhere; degrade to an empty map
    UnresolvedReference,
    /// Unknown node or component; surfaced as an explicit not-found
    NotFound,
    /// Name-resolution probe or URL rewrite failed; fall back to the raw value
    TransientResolution,
    /// Storage engine failure
    Storage,
    /// Everything else
    Internal,
}

impl Error {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::MalformedDeclaration { .. }
            | Error::DuplicateIdentity { .. }
            | Error::JsonParse(_) => ErrorKind::MalformedInput,

            Error::UnresolvedReference { .. } => ErrorKind::UnresolvedReference,

            Error::NodeNotFound { .. } | Error::ComponentNotFound { .. } => ErrorKind::NotFound,

            Error::AddressResolution(_) | Error::UrlParse(_) => ErrorKind::TransientResolution,

            Error::StorageOpen(_)
            | Error::StorageTransaction(_)
            | Error::StorageTable(_)
            | Error::StorageRead(_)
            | Error::StorageWrite(_)
            | Error::Serialization(_) => ErrorKind::Storage,

            Error::Internal(_) | Error::Configuration(_) | Error::Io(_) => ErrorKind::Internal,
        }
    }

    /// Check if this error is a not-found result rather than a failure
    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    /// Check if this error is transient
    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::TransientResolution
    }

    /// Startup must abort on these: no query can be served without a schema
    pub fn is_fatal_at_startup(&self) -> bool {
        matches!(
            self,
            Error::StorageOpen(_) | Error::StorageTable(_) | Error::Configuration(_)
        )
    }

    /// Short snake_case label, used for metrics and API error bodies
    pub fn label(&self) -> &'static str {
        match self.kind() {
            ErrorKind::MalformedInput => match self {
                Error::DuplicateIdentity { .. } => "duplicate_identity",
                _ => "malformed_input",
            },
            ErrorKind::UnresolvedReference => "unresolved_reference",
            ErrorKind::NotFound => "not_found",
            ErrorKind::TransientResolution => "transient_resolution",
            ErrorKind::Storage => "storage_error",
            ErrorKind::Internal => "internal_error",
        }
    }
}

/// Result type alias for the registry
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        let err = Error::MalformedDeclaration {
            origin: "a.json".into(),
            reason: "missing node_id".into(),
        };
        assert_eq!(err.kind(), ErrorKind::MalformedInput);
        assert_eq!(err.label(), "malformed_input");

        let err = Error::DuplicateIdentity {
            node_id: "n".into(),
            origin: "b.json".into(),
        };
        assert_eq!(err.kind(), ErrorKind::MalformedInput);
        assert_eq!(err.label(), "duplicate_identity");

        let err = Error::NodeNotFound {
            node_id: "ghost".into(),
        };
        assert!(err.is_not_found());
        assert!(!err.is_transient());
        assert_eq!(err.to_string(), "Node 'ghost' not found in registry");
    }

    #[test]
    fn test_fatal_at_startup() {
        assert!(Error::StorageOpen("locked".into()).is_fatal_at_startup());
        assert!(!Error::StorageRead("eof".into()).is_fatal_at_startup());
        assert!(!Error::ComponentNotFound {
            component_class: "X".into()
        }
        .is_fatal_at_startup());
    }

    #[test]
    fn test_transient() {
        let err = Error::AddressResolution("probe timed out".into());
        assert!(err.is_transient());
        assert_eq!(err.kind(), ErrorKind::TransientResolution);
    }
}
