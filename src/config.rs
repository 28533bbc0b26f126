use crate::error::ConfigError;
use crate::handler::{Fallthrough, Zones, normalize_zone};
use crate::store::RedisConfig;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

const ENV_PREFIX: &str = "REDZONE_";

/// Longest timeout accepted for any store or upstream operation
const MAX_TIMEOUT_SECS: u64 = 300;

/// Record store backend
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StoreKind {
    #[default]
    Redis,
    /// In-process store, optionally seeded from a JSON file
    Memory,
}

impl FromStr for StoreKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "redis" => Ok(StoreKind::Redis),
            "memory" | "local" => Ok(StoreKind::Memory),
            other => Err(ConfigError::ParseError(format!(
                "Unknown store kind: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DnsConfig {
    /// Address the UDP and TCP listeners bind to
    pub bind_addr: SocketAddr,

    /// Zones answered from the store, as lower-case FQDNs
    pub zones: Vec<String>,

    /// NotFound answers handed on to the upstream instead of answered
    pub fallthrough: Fallthrough,

    /// Which record store to use
    pub store: StoreKind,

    /// Redis connection settings (used when `store` is `Redis`)
    pub redis: RedisConfig,

    /// Namespace prepended to every store key, without trailing separators
    pub key_prefix: String,

    /// JSON seed for the memory store
    pub seed_file: Option<String>,

    /// Resolvers for out-of-zone CNAME targets and unanswered queries
    pub upstream_servers: Vec<SocketAddr>,

    /// Timeout for one upstream exchange
    pub upstream_timeout: Duration,

    /// Max number of concurrent DNS queries to handle
    pub max_concurrent_queries: usize,
}

impl Default for DnsConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 1053)),
            zones: vec![".".to_string()],
            fallthrough: Fallthrough::Disabled,
            store: StoreKind::Redis,
            redis: RedisConfig::default(),
            key_prefix: String::new(),
            seed_file: None,
            upstream_servers: vec![
                SocketAddr::from(([1, 1, 1, 1], 53)),
                SocketAddr::from(([8, 8, 8, 8], 53)),
            ],
            upstream_timeout: Duration::from_secs(5),
            max_concurrent_queries: 10000,
        }
    }
}

impl DnsConfig {
    /// Create a DnsConfig from `REDZONE_*` environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    /// Build the configuration from a variable lookup keyed by the suffix
    /// after `REDZONE_`.
    pub fn from_vars<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |suffix: &str| lookup(&format!("{}{}", ENV_PREFIX, suffix));
        let mut config = Self::default();

        if let Some(bind_addr) = var("BIND_ADDR") {
            config.bind_addr = bind_addr
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidBindAddress(bind_addr))?;
        }

        if let Some(zones) = var("ZONES") {
            config.zones = parse_zones(&zones);
        }

        if let Some(fallthrough) = var("FALLTHROUGH") {
            let zones = parse_zones(&fallthrough);
            config.fallthrough = if zones.is_empty() {
                Fallthrough::All
            } else {
                Fallthrough::Zones(Zones::new(zones))
            };
        }

        if let Some(store) = var("STORE") {
            config.store = store.parse()?;
        }

        if let Some(addresses) = var("REDIS_ADDRESSES") {
            config.redis.addresses = split_list(&addresses);
        }

        config.redis.username = var("REDIS_USERNAME").filter(|s| !s.is_empty());
        config.redis.password = var("REDIS_PASSWORD").filter(|s| !s.is_empty());

        if let Some(db) = var("REDIS_DB") {
            config.redis.db = db
                .trim()
                .parse::<i64>()
                .map_err(|_| ConfigError::ParseError(format!("Invalid Redis database: {}", db)))?;
        }

        if let Some(tls) = var("REDIS_TLS") {
            config.redis.tls = parse_bool(&tls, false);
        }
        config.redis.tls_ca = var("REDIS_TLS_CA").filter(|s| !s.is_empty());
        config.redis.tls_cert = var("REDIS_TLS_CERT").filter(|s| !s.is_empty());
        config.redis.tls_key = var("REDIS_TLS_KEY").filter(|s| !s.is_empty());

        if let Some(timeout) = var("CONNECT_TIMEOUT") {
            config.redis.connect_timeout = parse_timeout(&timeout)?;
        }
        if let Some(timeout) = var("READ_TIMEOUT") {
            config.redis.read_timeout = parse_timeout(&timeout)?;
        }

        if let Some(prefix) = var("KEY_PREFIX") {
            config.key_prefix = normalize_prefix(&prefix);
        }

        config.seed_file = var("SEED_FILE").filter(|s| !s.is_empty());

        if let Some(upstream_servers) = var("UPSTREAM_SERVERS") {
            config.upstream_servers = parse_servers(&upstream_servers)?;
        }

        if let Some(timeout_str) = var("UPSTREAM_TIMEOUT") {
            let timeout = parse_timeout(&timeout_str)?;
            if timeout.is_zero() {
                return Err(ConfigError::InvalidTimeout(
                    "Upstream timeout must be greater than 0".to_string(),
                ));
            }
            config.upstream_timeout = timeout;
        }

        if let Some(max_concurrent) = var("MAX_CONCURRENT_QUERIES") {
            config.max_concurrent_queries = max_concurrent.trim().parse::<usize>().map_err(|_| {
                ConfigError::ParseError(format!(
                    "Invalid max concurrent queries: {}",
                    max_concurrent
                ))
            })?;
        }

        config.validate()?;

        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.zones.is_empty() {
            return Err(ConfigError::InvalidZone(
                "At least one zone must be configured".to_string(),
            ));
        }

        if self.max_concurrent_queries == 0 {
            return Err(ConfigError::ParseError(
                "Max concurrent queries must be greater than 0".to_string(),
            ));
        }

        for timeout in [
            self.upstream_timeout,
            self.redis.connect_timeout,
            self.redis.read_timeout,
        ] {
            if timeout.as_secs() > MAX_TIMEOUT_SECS {
                return Err(ConfigError::InvalidTimeout(format!(
                    "Timeout too large (max {} seconds)",
                    MAX_TIMEOUT_SECS
                )));
            }
        }

        self.redis.validate()
    }

    pub fn zone_set(&self) -> Zones {
        Zones::new(&self.zones)
    }
}

/// Trailing separators are dropped so `app:` and `app` name the same namespace.
pub fn normalize_prefix(prefix: &str) -> String {
    prefix.trim().trim_end_matches(':').to_string()
}

fn split_list(s: &str) -> Vec<String> {
    s.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_zones(s: &str) -> Vec<String> {
    split_list(s).iter().map(|z| normalize_zone(z)).collect()
}

/// An empty list is allowed and disables delegation.
fn parse_servers(s: &str) -> Result<Vec<SocketAddr>, ConfigError> {
    split_list(s)
        .into_iter()
        .map(|server| {
            server
                .parse::<SocketAddr>()
                .map_err(|_| ConfigError::InvalidUpstreamServer(server))
        })
        .collect()
}

fn parse_timeout(s: &str) -> Result<Duration, ConfigError> {
    s.trim()
        .parse::<u64>()
        .map(Duration::from_secs)
        .map_err(|_| ConfigError::InvalidTimeout(s.to_string()))
}

/// Parse a boolean from a string, with a default value for invalid input
fn parse_bool(s: &str, default: bool) -> bool {
    match s.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => true,
        "false" | "0" | "no" | "off" => false,
        _ => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(vars: &[(&str, &str)]) -> Result<DnsConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        DnsConfig::from_vars(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = DnsConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.zones, vec!["."]);
        assert_eq!(config.fallthrough, Fallthrough::Disabled);
    }

    #[test]
    fn test_env_overrides() {
        let config = config_from(&[
            ("REDZONE_BIND_ADDR", "0.0.0.0:53"),
            ("REDZONE_ZONES", "Example.com, example.org."),
            ("REDZONE_KEY_PREFIX", "dns::"),
            ("REDZONE_REDIS_ADDRESSES", "10.0.0.1:6379,10.0.0.2:6379"),
            ("REDZONE_REDIS_DB", "3"),
            ("REDZONE_UPSTREAM_SERVERS", "9.9.9.9:53"),
            ("REDZONE_STORE", "memory"),
        ])
        .unwrap();

        assert_eq!(config.bind_addr, "0.0.0.0:53".parse().unwrap());
        assert_eq!(config.zones, vec!["example.com.", "example.org."]);
        assert_eq!(config.key_prefix, "dns");
        assert_eq!(config.redis.addresses.len(), 2);
        assert_eq!(config.redis.db, 3);
        assert_eq!(config.upstream_servers, vec!["9.9.9.9:53".parse().unwrap()]);
        assert_eq!(config.store, StoreKind::Memory);
    }

    #[test]
    fn test_fallthrough_variants() {
        let config = config_from(&[("REDZONE_FALLTHROUGH", "")]).unwrap();
        assert_eq!(config.fallthrough, Fallthrough::All);

        let config = config_from(&[("REDZONE_FALLTHROUGH", "example.com")]).unwrap();
        assert!(config.fallthrough.through("a.example.com."));
        assert!(!config.fallthrough.through("a.example.net."));
    }

    #[test]
    fn test_empty_upstream_list_is_allowed() {
        let config = config_from(&[("REDZONE_UPSTREAM_SERVERS", "")]).unwrap();
        assert!(config.upstream_servers.is_empty());
    }

    #[test]
    fn test_invalid_values() {
        assert!(matches!(
            config_from(&[("REDZONE_BIND_ADDR", "nowhere")]),
            Err(ConfigError::InvalidBindAddress(_))
        ));
        assert!(matches!(
            config_from(&[("REDZONE_UPSTREAM_SERVERS", "1.1.1.1")]),
            Err(ConfigError::InvalidUpstreamServer(_))
        ));
        assert!(matches!(
            config_from(&[("REDZONE_UPSTREAM_TIMEOUT", "0")]),
            Err(ConfigError::InvalidTimeout(_))
        ));
        assert!(matches!(
            config_from(&[("REDZONE_READ_TIMEOUT", "301")]),
            Err(ConfigError::InvalidTimeout(_))
        ));
        assert!(config_from(&[("REDZONE_ZONES", " , ")]).is_err());
        assert!(config_from(&[("REDZONE_MAX_CONCURRENT_QUERIES", "0")]).is_err());
        assert!(config_from(&[("REDZONE_STORE", "etcd")]).is_err());
        assert!(matches!(
            config_from(&[("REDZONE_REDIS_TLS_KEY", "client.key"), ("REDZONE_REDIS_TLS", "on")]),
            Err(ConfigError::Tls(_))
        ));
    }

    #[test]
    fn test_normalize_prefix() {
        assert_eq!(normalize_prefix("app:"), "app");
        assert_eq!(normalize_prefix("app"), "app");
        assert_eq!(normalize_prefix(":::"), "");
    }

    #[test]
    fn test_parse_bool() {
        assert!(parse_bool("true", false));
        assert!(parse_bool("YES", false));
        assert!(parse_bool("on", false));
        assert!(!parse_bool("0", true));
        assert!(!parse_bool("off", true));
        assert!(parse_bool("invalid", true));
        assert!(!parse_bool("invalid", false));
    }
}
