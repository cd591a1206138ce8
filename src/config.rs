//! Configuration loading and validation.
//!
//! Holds the full model of user-facing settings: upstream resolver,
//! blocklist sources, filtering scope, per-app rules and tunnel parameters.

use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{ConfigError, Result};

/// Main configuration for the hfilter DNS firewall.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Upstream DNS resolver address (e.g., "8.8.8.8:53").
    #[serde(deserialize_with = "deserialize_socket_addr")]
    pub upstream_resolver: SocketAddr,

    /// Seconds to wait for an upstream reply before dropping a query.
    #[serde(default = "default_forward_timeout")]
    pub forward_timeout_secs: u64,

    /// Number of concurrent forwarding workers.
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,

    /// Size of the tunnel read buffer in bytes.
    #[serde(default = "default_read_buffer_size")]
    pub read_buffer_size: usize,

    /// Directory for the compiled blocklist cache and raw source copies.
    /// If None, a per-user cache directory is used.
    pub cache_dir: Option<PathBuf>,

    /// What a blocked query is answered with.
    #[serde(default)]
    pub block_policy: BlockPolicy,

    /// Which traffic the tunnel captures and filters.
    #[serde(default)]
    pub scope: FilteringScope,

    /// Blocklist sources. When empty, the built-in defaults are used.
    #[serde(default)]
    pub sources: Vec<Source>,

    /// Per-application rule sets, used when scope is `apps` or `both`.
    #[serde(default)]
    pub app_rules: Vec<AppRule>,

    /// Virtual interface parameters.
    #[serde(default)]
    pub tunnel: TunnelSettings,
}

/// Response synthesized for a blocked domain.
///
/// `Nxdomain` is the default: it tells the client the name does not exist,
/// which clients do not cache as a usable address. `SyntheticAddress`
/// answers with `0.0.0.0`, which some resolvers cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockPolicy {
    #[default]
    Nxdomain,
    SyntheticAddress,
}

/// Which traffic is admitted into the tunnel and filtered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilteringScope {
    /// All device DNS traffic is filtered against the global snapshot.
    #[default]
    Global,
    /// Only traffic from configured application identifiers is captured.
    Apps,
    /// Global filtering plus per-app rules layered on top.
    Both,
}

/// Where a source definition came from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceOrigin {
    BuiltIn,
    #[default]
    User,
}

/// A remote blocklist source.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Source {
    /// Display label, also used as the source's identifier.
    pub name: String,

    /// Remote text resource in hosts, Adblock or bare-domain syntax.
    pub url: String,

    /// Disabled sources are kept in the list but never fetched or merged.
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default)]
    pub origin: SourceOrigin,
}

/// A per-application rule set.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AppRule {
    /// Display label for the rule set.
    pub name: String,

    /// Application identifiers this rule applies to.
    pub apps: Vec<String>,

    /// Domains blocked for these applications.
    #[serde(default)]
    pub blocked_domains: Vec<String>,

    /// Domains explicitly allowed; wins over blocked and over the global snapshot.
    #[serde(default)]
    pub allowed_domains: Vec<String>,

    /// When set, all traffic from these applications is captured and dropped.
    #[serde(default)]
    pub block_internet: bool,

    #[serde(default = "default_true")]
    pub enabled: bool,
}

/// Virtual interface parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TunnelSettings {
    /// Private local address assigned to the interface.
    #[serde(default = "default_tunnel_address")]
    pub address: Ipv4Addr,

    /// Prefix length for the interface address.
    #[serde(default = "default_tunnel_prefix")]
    pub prefix_len: u8,

    /// DNS servers whose traffic is routed into the tunnel.
    #[serde(default = "default_dns_servers")]
    pub dns_servers: Vec<Ipv4Addr>,

    /// Interface name hint (platform permitting).
    #[serde(default = "default_tunnel_name")]
    pub name: String,
}

impl Default for TunnelSettings {
    fn default() -> Self {
        Self {
            address: default_tunnel_address(),
            prefix_len: default_tunnel_prefix(),
            dns_servers: default_dns_servers(),
            name: default_tunnel_name(),
        }
    }
}

/// Built-in sources used when the configuration lists none.
#[must_use]
pub fn default_sources() -> Vec<Source> {
    vec![
        Source {
            name: "StevenBlack Hosts".to_string(),
            url: "https://raw.githubusercontent.com/StevenBlack/hosts/master/hosts".to_string(),
            enabled: true,
            origin: SourceOrigin::BuiltIn,
        },
        Source {
            name: "HaGeZi Ultimate".to_string(),
            url: "https://cdn.jsdelivr.net/gh/hagezi/dns-blocklists@latest/adblock/ultimate.txt"
                .to_string(),
            enabled: true,
            origin: SourceOrigin::BuiltIn,
        },
    ]
}

const fn default_forward_timeout() -> u64 {
    5
}

const fn default_worker_count() -> usize {
    10
}

const fn default_read_buffer_size() -> usize {
    32767
}

const fn default_true() -> bool {
    true
}

const fn default_tunnel_address() -> Ipv4Addr {
    Ipv4Addr::new(10, 0, 0, 1)
}

const fn default_tunnel_prefix() -> u8 {
    24
}

fn default_dns_servers() -> Vec<Ipv4Addr> {
    vec![
        Ipv4Addr::new(8, 8, 8, 8),
        Ipv4Addr::new(8, 8, 4, 4),
        Ipv4Addr::new(1, 1, 1, 1),
    ]
}

fn default_tunnel_name() -> String {
    "hfilter0".to_string()
}

fn deserialize_socket_addr<'de, D>(deserializer: D) -> std::result::Result<SocketAddr, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    s.parse().map_err(serde::de::Error::custom)
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadFile)?;
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    /// Configured sources, or the built-in defaults when none are listed.
    #[must_use]
    pub fn effective_sources(&self) -> Vec<Source> {
        if self.sources.is_empty() {
            default_sources()
        } else {
            self.sources.clone()
        }
    }

    /// Directory for blocklist caches, resolved against the user cache dir.
    #[must_use]
    pub fn blocklist_cache_dir(&self) -> PathBuf {
        self.cache_dir.clone().unwrap_or_else(|| {
            dirs::cache_dir().map_or_else(
                || PathBuf::from("./cache/blocklists"),
                |p| p.join("hfilter").join("blocklists"),
            )
        })
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<()> {
        if self.forward_timeout_secs == 0 {
            return Err(ConfigError::Validation("forward_timeout_secs must be > 0".into()).into());
        }

        if self.worker_count == 0 {
            return Err(ConfigError::Validation("worker_count must be > 0".into()).into());
        }

        // Must hold at least one full IPv4+UDP datagram with a DNS payload.
        if self.read_buffer_size < 576 {
            return Err(ConfigError::Validation("read_buffer_size must be >= 576".into()).into());
        }

        if self.tunnel.prefix_len > 32 {
            return Err(ConfigError::Validation("tunnel.prefix_len must be <= 32".into()).into());
        }

        if self.tunnel.dns_servers.is_empty() {
            return Err(
                ConfigError::Validation("tunnel.dns_servers must not be empty".into()).into(),
            );
        }

        let mut seen = std::collections::HashSet::new();
        for source in &self.sources {
            if source.name.is_empty() {
                return Err(ConfigError::Validation("source name cannot be empty".into()).into());
            }
            if !seen.insert(source.name.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "duplicate source name: {:?}",
                    source.name
                ))
                .into());
            }
            if !source.url.starts_with("http://") && !source.url.starts_with("https://") {
                return Err(ConfigError::Validation(format!(
                    "source {:?} has invalid URL: {:?}",
                    source.name, source.url
                ))
                .into());
            }
        }

        for rule in &self.app_rules {
            if rule.apps.is_empty() {
                return Err(ConfigError::Validation(format!(
                    "app rule {:?} lists no applications",
                    rule.name
                ))
                .into());
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_config() {
        let toml = r#"
            upstream_resolver = "8.8.8.8:53"
        "#;

        let config = Config::parse(toml).unwrap();
        assert_eq!(config.upstream_resolver.to_string(), "8.8.8.8:53");
        assert_eq!(config.forward_timeout_secs, 5);
        assert_eq!(config.worker_count, 10);
        assert_eq!(config.scope, FilteringScope::Global);
        assert_eq!(config.block_policy, BlockPolicy::Nxdomain);
        assert!(config.sources.is_empty());
    }

    #[test]
    fn test_empty_sources_fall_back_to_builtins() {
        let toml = r#"
            upstream_resolver = "8.8.8.8:53"
        "#;

        let config = Config::parse(toml).unwrap();
        let sources = config.effective_sources();
        assert_eq!(sources.len(), 2);
        assert!(sources.iter().all(|s| s.origin == SourceOrigin::BuiltIn));
        assert!(sources.iter().all(|s| s.enabled));
    }

    #[test]
    fn test_parse_sources_and_rules() {
        let toml = r#"
            upstream_resolver = "1.1.1.1:53"
            scope = "both"
            block_policy = "synthetic_address"

            [[sources]]
            name = "custom"
            url = "https://example.com/hosts.txt"

            [[app_rules]]
            name = "browser"
            apps = ["org.example.browser"]
            blocked_domains = ["ads.example.com"]
            allowed_domains = ["cdn.example.com"]
            block_internet = false
        "#;

        let config = Config::parse(toml).unwrap();
        assert_eq!(config.scope, FilteringScope::Both);
        assert_eq!(config.block_policy, BlockPolicy::SyntheticAddress);
        assert_eq!(config.sources.len(), 1);
        assert_eq!(config.effective_sources().len(), 1);
        assert_eq!(config.app_rules.len(), 1);
        assert!(config.app_rules[0].enabled);
        assert!(!config.app_rules[0].block_internet);
    }

    #[test]
    fn test_tunnel_defaults() {
        let toml = r#"
            upstream_resolver = "8.8.8.8:53"
        "#;

        let config = Config::parse(toml).unwrap();
        assert_eq!(config.tunnel.address, Ipv4Addr::new(10, 0, 0, 1));
        assert_eq!(config.tunnel.prefix_len, 24);
        assert_eq!(config.tunnel.dns_servers.len(), 3);
        assert_eq!(config.tunnel.name, "hfilter0");
    }

    #[test]
    fn test_invalid_resolver_address() {
        let toml = r#"
            upstream_resolver = "not-an-address"
        "#;

        assert!(Config::parse(toml).is_err());
    }

    #[test]
    fn test_zero_worker_count_rejected() {
        let toml = r#"
            upstream_resolver = "8.8.8.8:53"
            worker_count = 0
        "#;

        assert!(Config::parse(toml).is_err());
    }

    #[test]
    fn test_small_read_buffer_rejected() {
        let toml = r#"
            upstream_resolver = "8.8.8.8:53"
            read_buffer_size = 100
        "#;

        assert!(Config::parse(toml).is_err());
    }

    #[test]
    fn test_duplicate_source_name_rejected() {
        let toml = r#"
            upstream_resolver = "8.8.8.8:53"

            [[sources]]
            name = "dup"
            url = "https://a.example.com/list"

            [[sources]]
            name = "dup"
            url = "https://b.example.com/list"
        "#;

        assert!(Config::parse(toml).is_err());
    }

    #[test]
    fn test_non_http_source_url_rejected() {
        let toml = r#"
            upstream_resolver = "8.8.8.8:53"

            [[sources]]
            name = "bad"
            url = "ftp://example.com/list"
        "#;

        assert!(Config::parse(toml).is_err());
    }

    #[test]
    fn test_app_rule_without_apps_rejected() {
        let toml = r#"
            upstream_resolver = "8.8.8.8:53"

            [[app_rules]]
            name = "empty"
            apps = []
        "#;

        assert!(Config::parse(toml).is_err());
    }

    #[test]
    fn test_unknown_field_rejected() {
        let toml = r#"
            upstream_resolver = "8.8.8.8:53"
            unknown_field = "value"
        "#;

        assert!(Config::parse(toml).is_err());
    }
}
