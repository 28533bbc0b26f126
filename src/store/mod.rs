pub mod keys;
pub mod local_backend;
pub mod redis_backend;

pub use local_backend::LocalStore;
pub use redis_backend::{RedisConfig, RedisStore};

use crate::error::StoreError;
use async_trait::async_trait;

/// Read access to the hash-per-name record store
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Fetch `field` of the hash at `key`; `Ok(None)` when either is absent.
    async fn get(&self, key: &str, field: &str) -> Result<Option<String>, StoreError>;
}
