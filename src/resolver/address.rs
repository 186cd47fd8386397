//! Address Resolver
//!
//! Rewrites a node's declared `api_url` at read time so it is reachable from
//! where the registry runs. Stored data is never touched.

use crate::domain::ports::ExecutionContext;
use crate::error::{Error, Result};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};
use url::{Host, Url};

// =============================================================================
// Service Aliases
// =============================================================================

/// Maps node identities onto runtime service names
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceAliases {
    aliases: BTreeMap<String, String>,
}

impl ServiceAliases {
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            aliases: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Parse `node=service` entries
    pub fn parse<S: AsRef<str>>(entries: &[S]) -> Result<Self> {
        let mut aliases = BTreeMap::new();
        for entry in entries {
            let entry = entry.as_ref().trim();
            if entry.is_empty() {
                continue;
            }
            let (node_id, service) = entry
                .split_once('=')
                .map(|(n, s)| (n.trim(), s.trim()))
                .filter(|(n, s)| !n.is_empty() && !s.is_empty())
                .ok_or_else(|| {
                    Error::Configuration(format!(
                        "invalid service alias '{}', expected node=service",
                        entry
                    ))
                })?;
            aliases.insert(node_id.to_string(), service.to_string());
        }
        Ok(Self { aliases })
    }

    /// Service name for a node; unknown ids map to themselves
    pub fn canonical<'a>(&'a self, node_id: &'a str) -> &'a str {
        self.aliases
            .get(node_id)
            .map(String::as_str)
            .unwrap_or(node_id)
    }

    pub fn len(&self) -> usize {
        self.aliases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.aliases.is_empty()
    }
}

// =============================================================================
// Resolver
// =============================================================================

/// Derives the effective endpoint for a node
#[derive(Clone)]
pub struct AddressResolver {
    aliases: ServiceAliases,
    context: Arc<dyn ExecutionContext>,
}

impl AddressResolver {
    pub fn new(aliases: ServiceAliases, context: Arc<dyn ExecutionContext>) -> Self {
        Self { aliases, context }
    }

    /// Effective URL for a declared `api_url`.
    ///
    /// Loopback hosts are replaced by the node's service name when running
    /// containerized; anything else is returned as declared.
    pub async fn resolve(&self, declared: Option<&str>, node_id: &str) -> Option<String> {
        let declared = declared?;
        match self.rewrite(declared, node_id).await {
            Ok(Some(resolved)) => {
                debug!(node_id = %node_id, from = %declared, to = %resolved, "Resolved api_url for container network");
                Some(resolved)
            }
            Ok(None) => Some(declared.to_string()),
            Err(e) => {
                warn!(
                    node_id = %node_id,
                    api_url = %declared,
                    kind = e.label(),
                    error = %e,
                    "Could not resolve api_url, returning it unchanged"
                );
                Some(declared.to_string())
            }
        }
    }

    /// Rewritten URL, or `None` when the declared one applies as is
    async fn rewrite(&self, declared: &str, node_id: &str) -> Result<Option<String>> {
        if declared.is_empty() {
            return Ok(None);
        }

        let url = Url::parse(declared)?;
        if !is_loopback(&url) {
            return Ok(None);
        }

        let service = self.aliases.canonical(node_id);
        if !self.context.is_containerized(service).await {
            return Ok(None);
        }
        rewrite_host(declared, &url, service).map(Some)
    }
}

impl std::fmt::Debug for AddressResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AddressResolver")
            .field("aliases", &self.aliases)
            .field("context", &self.context.name())
            .finish()
    }
}

/// `localhost`, `127.0.0.0/8` or `::1`
pub fn is_loopback(url: &Url) -> bool {
    match url.host() {
        Some(Host::Domain(domain)) => domain.eq_ignore_ascii_case("localhost"),
        Some(Host::Ipv4(ip)) => ip.is_loopback(),
        Some(Host::Ipv6(ip)) => ip.is_loopback(),
        None => false,
    }
}

/// Replace the host of `original` with `service`, keeping every other byte
fn rewrite_host(original: &str, parsed: &Url, service: &str) -> Result<String> {
    let invalid = |e: url::ParseError| {
        Error::AddressResolution(format!("'{}' is not a valid host: {}", service, e))
    };

    if let Some((start, end)) = host_span(original) {
        let mut rewritten = String::with_capacity(original.len() + service.len());
        rewritten.push_str(&original[..start]);
        rewritten.push_str(service);
        rewritten.push_str(&original[end..]);
        Url::parse(&rewritten).map_err(invalid)?;
        return Ok(rewritten);
    }

    let mut url = parsed.clone();
    url.set_host(Some(service)).map_err(invalid)?;
    Ok(url.to_string())
}

/// Byte range of the host inside a `scheme://[userinfo@]host[:port]...` string
fn host_span(url: &str) -> Option<(usize, usize)> {
    let authority_start = url.find("://")? + 3;
    let rest = &url[authority_start..];
    let authority_len = rest.find(|c: char| matches!(c, '/' | '?' | '#')).unwrap_or(rest.len());
    let authority = &rest[..authority_len];

    let host_offset = authority.rfind('@').map(|i| i + 1).unwrap_or(0);
    let host_part = &authority[host_offset..];
    let host_len = if host_part.starts_with('[') {
        host_part.find(']')? + 1
    } else {
        host_part.find(':').unwrap_or(host_part.len())
    };
    if host_len == 0 {
        return None;
    }

    let start = authority_start + host_offset;
    Some((start, start + host_len))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::context::StaticContext;
    use assert_matches::assert_matches;

    fn resolver(containerized: bool) -> AddressResolver {
        AddressResolver::new(
            ServiceAliases::from_pairs([("foo-node", "foo")]),
            Arc::new(StaticContext(containerized)),
        )
    }

    #[tokio::test]
    async fn test_rewrites_loopback_when_containerized() {
        let resolved = resolver(true)
            .resolve(Some("http://localhost:8000"), "foo-node")
            .await;
        assert_eq!(resolved.as_deref(), Some("http://foo:8000"));
    }

    #[tokio::test]
    async fn test_unchanged_outside_container() {
        let resolved = resolver(false)
            .resolve(Some("http://localhost:8000"), "foo-node")
            .await;
        assert_eq!(resolved.as_deref(), Some("http://localhost:8000"));
    }

    #[tokio::test]
    async fn test_preserves_path_query_and_userinfo() {
        let r = resolver(true);
        assert_eq!(
            r.resolve(Some("https://user:pw@127.0.0.1:9000/api/v1?x=1#top"), "bar")
                .await
                .as_deref(),
            Some("https://user:pw@bar:9000/api/v1?x=1#top")
        );
        assert_eq!(
            r.resolve(Some("http://[::1]:8080/run"), "foo-node")
                .await
                .as_deref(),
            Some("http://foo:8080/run")
        );
        assert_eq!(
            r.resolve(Some("http://LOCALHOST"), "foo-node").await.as_deref(),
            Some("http://foo")
        );
    }

    #[tokio::test]
    async fn test_non_loopback_and_unparsable_unchanged() {
        let r = resolver(true);
        assert_eq!(
            r.resolve(Some("http://10.0.0.5:8000"), "foo-node")
                .await
                .as_deref(),
            Some("http://10.0.0.5:8000")
        );
        assert_eq!(
            r.resolve(Some("not a url"), "foo-node").await.as_deref(),
            Some("not a url")
        );
        assert_eq!(r.resolve(None, "foo-node").await, None);
    }

    #[tokio::test]
    async fn test_invalid_service_name_keeps_declared_url() {
        let r = AddressResolver::new(
            ServiceAliases::from_pairs([("foo-node", "bad host")]),
            Arc::new(StaticContext(true)),
        );
        assert_eq!(
            r.resolve(Some("http://localhost:8000"), "foo-node")
                .await
                .as_deref(),
            Some("http://localhost:8000")
        );

        let url = Url::parse("http://localhost:8000").unwrap();
        assert_matches!(
            rewrite_host("http://localhost:8000", &url, "bad host"),
            Err(Error::AddressResolution(_))
        );
    }

    #[tokio::test]
    async fn test_url_without_authority_marker_uses_parsed_form() {
        let resolved = resolver(true)
            .resolve(Some("http:localhost:8000"), "foo-node")
            .await;
        assert_eq!(resolved.as_deref(), Some("http://foo:8000/"));
    }

    #[test]
    fn test_alias_parsing() {
        let aliases = ServiceAliases::parse(&["foo-node=foo", " bar = baz ", ""]).unwrap();
        assert_eq!(aliases.len(), 2);
        assert!(!aliases.is_empty());
        assert!(ServiceAliases::default().is_empty());
        assert_eq!(aliases.canonical("foo-node"), "foo");
        assert_eq!(aliases.canonical("bar"), "baz");
        assert_eq!(aliases.canonical("other"), "other");

        assert_matches!(
            ServiceAliases::parse(&["missing-separator"]),
            Err(Error::Configuration(_))
        );
        assert_matches!(ServiceAliases::parse(&["=foo"]), Err(Error::Configuration(_)));
    }

    #[test]
    fn test_host_span() {
        assert_eq!(host_span("http://localhost:8000"), Some((7, 16)));
        assert_eq!(host_span("http://a@b/c"), Some((9, 10)));
        assert_eq!(host_span("mailto:x"), None);
    }
}
