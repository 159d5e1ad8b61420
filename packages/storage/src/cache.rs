//! Cache tier: fast key/value storage for chunks still being written.

use std::collections::HashMap;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::RwLock;

use crate::StorageError;

#[async_trait]
pub trait CacheTier: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, StorageError>;

    async fn set(&self, key: &str, value: Bytes) -> Result<(), StorageError>;

    /// Length of the stored value, if any.
    async fn size(&self, key: &str) -> Result<Option<usize>, StorageError>;

    /// Returns whether a value was removed.
    async fn delete(&self, key: &str) -> Result<bool, StorageError>;
}

/// Process-local cache tier.
#[derive(Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<String, Bytes>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheTier for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, StorageError> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Bytes) -> Result<(), StorageError> {
        self.entries.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn size(&self, key: &str) -> Result<Option<usize>, StorageError> {
        Ok(self.entries.read().await.get(key).map(Bytes::len))
    }

    async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.entries.write().await.remove(key).is_some())
    }
}
