//! Local key-value storage trait definitions.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{Error, Result};

/// Client-local durable key-value storage.
#[async_trait]
pub trait KeyValueStore: Send + Sync + std::fmt::Debug {
    /// Get a value by key.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Set a value.
    async fn set(&self, key: &str, value: &str) -> Result<()>;
}

/// Extension trait for key-value storage with typed operations.
#[async_trait]
pub trait KeyValueStoreExt: KeyValueStore {
    /// Get an RFC 3339 timestamp.
    async fn get_timestamp(&self, key: &str) -> Result<Option<DateTime<Utc>>> {
        match self.get(key).await? {
            Some(raw) => DateTime::parse_from_rfc3339(&raw)
                .map(|t| Some(t.with_timezone(&Utc)))
                .map_err(|e| Error::Storage(format!("bad timestamp under {}: {}", key, e))),
            None => Ok(None),
        }
    }

    /// Store a timestamp as an RFC 3339 string.
    async fn set_timestamp(&self, key: &str, at: DateTime<Utc>) -> Result<()> {
        self.set(key, &at.to_rfc3339()).await
    }
}

// Blanket implementation
impl<T: KeyValueStore + ?Sized> KeyValueStoreExt for T {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use chrono::TimeZone;

    #[tokio::test]
    async fn test_store_ext_timestamp() {
        let store = MemoryStore::new();
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();

        store.set_timestamp("lastRead_u1_c1", at).await.unwrap();
        assert_eq!(store.get_timestamp("lastRead_u1_c1").await.unwrap(), Some(at));
        assert_eq!(store.get_timestamp("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_corrupt_timestamp_is_storage_error() {
        let store = MemoryStore::new();
        store.set("k", "not-a-date").await.unwrap();

        let err = store.get_timestamp("k").await.unwrap_err();
        assert!(matches!(err, Error::Storage(_)));
    }
}
