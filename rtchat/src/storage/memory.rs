//! In-memory key-value store.

use async_trait::async_trait;
use std::{collections::HashMap, sync::RwLock};

use super::traits::KeyValueStore;
use crate::error::Result;

/// Volatile store, useful for tests and ephemeral sessions.
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let data = self.data.read().unwrap_or_else(|e| e.into_inner());
        Ok(data.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut data = self.data.write().unwrap_or_else(|e| e.into_inner());
        data.insert(key.to_owned(), value.to_owned());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_overwrites() {
        let store = MemoryStore::new();
        assert_eq!(store.get("lastRead_u1_c1").await.unwrap(), None);

        store.set("lastRead_u1_c1", "1").await.unwrap();
        store.set("lastRead_u1_c1", "2").await.unwrap();
        assert_eq!(store.get("lastRead_u1_c1").await.unwrap(), Some("2".to_owned()));
        assert_eq!(store.get("lastRead_u2_c1").await.unwrap(), None);
    }
}
