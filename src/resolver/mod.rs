//! Address Resolution
//!
//! Read-time rewriting of node endpoints for the environment the registry
//! runs in.

pub mod address;
pub mod context;

pub use address::*;
pub use context::*;

use crate::domain::ports::ExecutionContext;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// How the execution context is determined
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum ContainerMode {
    /// Marker file/env flag, then a DNS probe of the service name
    #[default]
    Auto,
    Always,
    Never,
}

impl FromStr for ContainerMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(ContainerMode::Auto),
            "always" => Ok(ContainerMode::Always),
            "never" => Ok(ContainerMode::Never),
            other => Err(format!("unknown container mode: {}", other)),
        }
    }
}

/// Configuration for the address resolver
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    pub mode: ContainerMode,
    pub aliases: ServiceAliases,
    pub probe_timeout: Duration,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            mode: ContainerMode::Auto,
            aliases: ServiceAliases::default(),
            probe_timeout: Duration::from_millis(250),
        }
    }
}

impl ResolverConfig {
    pub fn build(&self) -> AddressResolver {
        let context: Arc<dyn ExecutionContext> = match self.mode {
            ContainerMode::Auto => Arc::new(AnyContext::auto(self.probe_timeout)),
            ContainerMode::Always => Arc::new(StaticContext(true)),
            ContainerMode::Never => Arc::new(StaticContext(false)),
        };
        AddressResolver::new(self.aliases.clone(), context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_container_mode_parse() {
        assert_eq!("auto".parse::<ContainerMode>(), Ok(ContainerMode::Auto));
        assert_eq!("NEVER".parse::<ContainerMode>(), Ok(ContainerMode::Never));
        assert!("sometimes".parse::<ContainerMode>().is_err());
    }

    #[tokio::test]
    async fn test_build_forced_modes() {
        let config = ResolverConfig {
            mode: ContainerMode::Always,
            aliases: ServiceAliases::from_pairs([("foo-node", "foo")]),
            ..Default::default()
        };
        let resolved = config
            .build()
            .resolve(Some("http://localhost:8000"), "foo-node")
            .await;
        assert_eq!(resolved.as_deref(), Some("http://foo:8000"));

        let never = ResolverConfig {
            mode: ContainerMode::Never,
            ..Default::default()
        };
        let resolved = never
            .build()
            .resolve(Some("http://localhost:8000"), "foo-node")
            .await;
        assert_eq!(resolved.as_deref(), Some("http://localhost:8000"));
    }
}
