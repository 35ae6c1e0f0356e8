//! In-memory storage backend.

use crate::{StorageError, StorageResult};
use super::StorageBackend;
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;

/// In-memory storage backend. Contents are lost when dropped.
pub struct InMemoryBackend {
    data: DashMap<String, Bytes>,
}

impl InMemoryBackend {
    /// Creates a new in-memory backend.
    #[must_use]
    pub fn new() -> Self {
        Self {
            data: DashMap::new(),
        }
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StorageBackend for InMemoryBackend {
    fn name(&self) -> &str {
        "memory"
    }

    async fn put(&self, key: &str, data: Bytes) -> StorageResult<()> {
        self.data.insert(key.to_string(), data);
        Ok(())
    }

    async fn get(&self, key: &str) -> StorageResult<Bytes> {
        self.data
            .get(key)
            .map(|obj| obj.value().clone())
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }
}
