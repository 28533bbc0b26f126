use super::RecordStore;
use crate::error::{ConfigError, StoreError};
use async_trait::async_trait;
use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use redis::{AsyncCommands, ClientTlsConfig, IntoConnectionInfo, TlsCertificates};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Redis connection settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedisConfig {
    /// `host:port` entries, tried in order when connecting
    pub addresses: Vec<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub db: i64,
    /// Connect with `rediss://`
    pub tls: bool,
    /// PEM root certificate replacing the bundled roots
    pub tls_ca: Option<String>,
    /// PEM client certificate and key for mutual TLS
    pub tls_cert: Option<String>,
    pub tls_key: Option<String>,
    /// Zero leaves the client library default in place
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    /// Connection attempts over the whole address list
    pub max_retries: u32,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            addresses: vec!["127.0.0.1:6379".to_string()],
            username: None,
            password: None,
            db: 0,
            tls: false,
            tls_ca: None,
            tls_cert: None,
            tls_key: None,
            connect_timeout: Duration::from_secs(5),
            read_timeout: Duration::from_secs(3),
            max_retries: 3,
        }
    }
}

impl RedisConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.addresses.is_empty() {
            return Err(ConfigError::InvalidStoreAddress(
                "No store addresses provided".to_string(),
            ));
        }
        for address in &self.addresses {
            let valid = address
                .rsplit_once(':')
                .map(|(host, port)| !host.is_empty() && port.parse::<u16>().is_ok())
                .unwrap_or(false);
            if !valid {
                return Err(ConfigError::InvalidStoreAddress(address.clone()));
            }
        }
        if self.tls_cert.is_some() != self.tls_key.is_some() {
            return Err(ConfigError::Tls(
                "Client certificate and key must be given together".to_string(),
            ));
        }
        if (self.tls_ca.is_some() || self.tls_cert.is_some()) && !self.tls {
            return Err(ConfigError::Tls(
                "Certificate files given but TLS is disabled".to_string(),
            ));
        }
        Ok(())
    }

    fn url(&self, address: &str) -> String {
        let scheme = if self.tls { "rediss" } else { "redis" };
        format!("{}://{}/{}", scheme, address, self.db)
    }

    fn tls_certificates(&self) -> Result<Option<TlsCertificates>, StoreError> {
        if self.tls_ca.is_none() && self.tls_cert.is_none() {
            return Ok(None);
        }
        let client_tls = match (&self.tls_cert, &self.tls_key) {
            (Some(cert), Some(key)) => Some(ClientTlsConfig {
                client_cert: read_pem(cert)?,
                client_key: read_pem(key)?,
            }),
            _ => None,
        };
        let root_cert = self.tls_ca.as_deref().map(read_pem).transpose()?;
        Ok(Some(TlsCertificates {
            client_tls,
            root_cert,
        }))
    }

    fn client(&self, address: &str) -> Result<redis::Client, StoreError> {
        let mut info = self.url(address).into_connection_info()?;
        info.redis.username = self.username.clone();
        info.redis.password = self.password.clone();

        let client = match self.tls_certificates()? {
            Some(certs) => redis::Client::build_with_tls(info, certs)?,
            None => redis::Client::open(info)?,
        };
        Ok(client)
    }

    fn manager_config(&self) -> ConnectionManagerConfig {
        let mut config = ConnectionManagerConfig::new();
        if !self.connect_timeout.is_zero() {
            config = config.set_connection_timeout(self.connect_timeout);
        }
        if !self.read_timeout.is_zero() {
            config = config.set_response_timeout(self.read_timeout);
        }
        config
    }
}

fn read_pem(path: &str) -> Result<Vec<u8>, StoreError> {
    std::fs::read(path).map_err(|e| StoreError::Backend(format!("Failed to read {}: {}", path, e)))
}

/// Record store backed by Redis hashes (`HGET key field`)
pub struct RedisStore {
    client: ConnectionManager,
}

impl RedisStore {
    /// Connect to the first reachable address, cycling through the list up
    /// to `max_retries` times.
    pub async fn connect(config: &RedisConfig) -> Result<Self, StoreError> {
        let mut last_error = StoreError::Backend("No store addresses configured".to_string());

        for attempt in 1..=config.max_retries.max(1) {
            for address in &config.addresses {
                match Self::connect_one(config, address).await {
                    Ok(store) => {
                        info!("Connected to Redis at {}", address);
                        return Ok(store);
                    }
                    Err(e) => {
                        warn!(
                            "Failed to connect to Redis at {} (attempt {}/{}): {}",
                            address, attempt, config.max_retries, e
                        );
                        last_error = e;
                    }
                }
            }
            if attempt < config.max_retries {
                tokio::time::sleep(Duration::from_secs(attempt as u64)).await;
            }
        }

        Err(last_error)
    }

    async fn connect_one(config: &RedisConfig, address: &str) -> Result<Self, StoreError> {
        let client = config.client(address)?;
        let connection_manager =
            ConnectionManager::new_with_config(client, config.manager_config()).await?;
        Ok(Self {
            client: connection_manager,
        })
    }

    /// Ping Redis to check connectivity
    pub async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.client.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}

#[async_trait]
impl RecordStore for RedisStore {
    async fn get(&self, key: &str, field: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.client.clone();
        let value: Option<String> = conn.hget(key, field).await?;
        if value.is_none() {
            debug!("Redis miss: HGET {} {}", key, field);
        }
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(RedisConfig::default().validate().is_ok());
    }

    #[test]
    fn test_invalid_addresses() {
        for address in ["localhost", ":6379", "host:port", "host:70000"] {
            let config = RedisConfig {
                addresses: vec![address.to_string()],
                ..Default::default()
            };
            assert!(config.validate().is_err(), "{} should be rejected", address);
        }
        let config = RedisConfig {
            addresses: vec![],
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_client_cert_requires_key() {
        let config = RedisConfig {
            tls: true,
            tls_cert: Some("client.pem".to_string()),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Tls(_))));
    }

    #[test]
    fn test_url_scheme_follows_tls() {
        let mut config = RedisConfig {
            db: 2,
            ..Default::default()
        };
        assert_eq!(config.url("10.0.0.1:6379"), "redis://10.0.0.1:6379/2");
        config.tls = true;
        assert_eq!(config.url("10.0.0.1:6380"), "rediss://10.0.0.1:6380/2");
    }
}
