use thiserror::Error;

use crate::dns::ParseError;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid bind address: {0}")]
    InvalidBindAddress(String),

    #[error("Invalid zone: {0}")]
    InvalidZone(String),

    #[error("Invalid store address: {0}")]
    InvalidStoreAddress(String),

    #[error("Invalid upstream server: {0}")]
    InvalidUpstreamServer(String),

    #[error("Invalid timeout: {0}")]
    InvalidTimeout(String),

    #[error("Configuration parse error: {0}")]
    ParseError(String),

    #[error("TLS configuration error: {0}")]
    Tls(String),
}

/// Failure talking to the record store. A missing record is not an error.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Store backend error: {0}")]
    Backend(String),

    #[error("Store operation timed out")]
    Timeout,
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_timeout() {
            StoreError::Timeout
        } else {
            StoreError::Backend(err.to_string())
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UpstreamError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Upstream query timed out")]
    Timeout,

    #[error("Malformed upstream response: {0}")]
    Parse(#[from] ParseError),

    #[error("No upstream servers configured")]
    NoServers,

    #[error("Upstream answered with rcode {0}")]
    Rcode(u8),
}

impl From<std::io::Error> for UpstreamError {
    fn from(err: std::io::Error) -> Self {
        UpstreamError::Io(err.to_string())
    }
}

/// Outcome kinds of the resolution engine other than success
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error("key not found")]
    NotFound,

    #[error("Malformed stored record: {0}")]
    Decode(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Upstream(#[from] UpstreamError),
}

impl ResolveError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ResolveError::NotFound)
    }
}

impl From<serde_json::Error> for ResolveError {
    fn from(err: serde_json::Error) -> Self {
        ResolveError::Decode(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ResolveError>;
