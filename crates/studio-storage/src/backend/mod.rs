//! Storage backend trait and implementations.

pub mod memory;
pub mod filesystem;

use crate::StorageResult;
use async_trait::async_trait;
use bytes::Bytes;

/// Blob storage keyed by object name.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Returns the backend name.
    fn name(&self) -> &str;

    /// Stores data at the given key, replacing any previous object.
    async fn put(&self, key: &str, data: Bytes) -> StorageResult<()>;

    /// Retrieves data by key.
    async fn get(&self, key: &str) -> StorageResult<Bytes>;
}
