use super::RecordStore;
use crate::error::StoreError;
use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::path::Path;
use tracing::{debug, info};

/// In-process record store with the same key/field layout as Redis
#[derive(Debug, Default)]
pub struct LocalStore {
    entries: DashMap<(String, String), String>,
}

impl LocalStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, key: impl Into<String>, field: impl Into<String>, value: impl Into<String>) {
        self.entries.insert((key.into(), field.into()), value.into());
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Load `{ "<key>": { "<TYPE>": <value> } }`. JSON string values are
    /// stored verbatim, anything else is stored as its JSON text.
    pub fn from_json(json: &str) -> Result<Self, StoreError> {
        let root: serde_json::Map<String, Value> = serde_json::from_str(json)
            .map_err(|e| StoreError::Backend(format!("Invalid seed data: {}", e)))?;

        let store = Self::new();
        for (key, fields) in root {
            let Value::Object(fields) = fields else {
                return Err(StoreError::Backend(format!(
                    "Seed entry for {} is not an object",
                    key
                )));
            };
            for (field, value) in fields {
                let raw = match value {
                    Value::String(s) => s,
                    other => other.to_string(),
                };
                store.insert(key.clone(), field, raw);
            }
        }
        Ok(store)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            StoreError::Backend(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let store = Self::from_json(&json)?;
        info!(
            "Loaded {} record fields from {}",
            store.len(),
            path.display()
        );
        Ok(store)
    }
}

#[async_trait]
impl RecordStore for LocalStore {
    async fn get(&self, key: &str, field: &str) -> Result<Option<String>, StoreError> {
        let value = self
            .entries
            .get(&(key.to_string(), field.to_string()))
            .map(|entry| entry.value().clone());
        if value.is_none() {
            debug!("Local store miss: {} {}", key, field);
        }
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_get_distinguishes_fields() {
        let store = LocalStore::new();
        store.insert("com:example:www", "A", r#"[{"ip":"192.0.2.1"}]"#);

        assert!(store.get("com:example:www", "A").await.unwrap().is_some());
        assert_eq!(store.get("com:example:www", "AAAA").await.unwrap(), None);
        assert_eq!(store.get("com:example", "A").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_seed_from_json() {
        let store = LocalStore::from_json(
            r#"{
                "com:example:www": {
                    "A": [{"ttl": 300, "ip": "192.0.2.1"}],
                    "TXT": "[{\"text\":\"hello\"}]"
                }
            }"#,
        )
        .unwrap();

        assert_eq!(store.len(), 2);
        let a: Value =
            serde_json::from_str(&store.get("com:example:www", "A").await.unwrap().unwrap())
                .unwrap();
        assert_eq!(a, serde_json::json!([{"ttl": 300, "ip": "192.0.2.1"}]));
        assert_eq!(
            store.get("com:example:www", "TXT").await.unwrap().unwrap(),
            r#"[{"text":"hello"}]"#
        );
    }

    #[tokio::test]
    async fn test_seed_from_file() {
        use std::io::Write;

        let mut seed = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            seed,
            r#"{{"com:example": {{"SOA": {{"ns": "ns1.example.com.", "minTTL": 60}}}}}}"#
        )
        .unwrap();

        let store = LocalStore::from_file(seed.path()).unwrap();
        assert_eq!(store.len(), 1);
        assert!(store.get("com:example", "SOA").await.unwrap().is_some());

        assert!(LocalStore::from_file("/nonexistent/seed.json").is_err());
    }

    #[test]
    fn test_seed_rejects_non_object_entries() {
        assert!(LocalStore::from_json(r#"{"com:example": 5}"#).is_err());
        assert!(LocalStore::from_json("[]").is_err());
    }
}
