//! Filesystem storage backend.

use crate::{StorageError, StorageResult};
use super::StorageBackend;
use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

const TEMP_SUFFIX: &str = ".tmp";

/// Filesystem storage backend. Each key is one file under the root.
pub struct FilesystemBackend {
    root: PathBuf,
}

impl FilesystemBackend {
    /// Creates a backend, creating the root directory if needed.
    pub async fn new(root: impl AsRef<Path>) -> StorageResult<Self> {
        let root = root.as_ref().to_path_buf();

        if !root.exists() {
            fs::create_dir_all(&root).await?;
        }
        if !root.is_dir() {
            return Err(StorageError::Configuration(format!(
                "{} is not a directory",
                root.display()
            )));
        }

        Ok(Self { root })
    }

    /// Returns the root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolves a key to a file path. Keys are plain file names.
    fn key_to_path(&self, key: &str) -> StorageResult<PathBuf> {
        if key.is_empty()
            || key.contains("..")
            || key.contains('/')
            || key.contains('\\')
            || key.ends_with(TEMP_SUFFIX)
        {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(key))
    }
}

#[async_trait]
impl StorageBackend for FilesystemBackend {
    fn name(&self) -> &str {
        "filesystem"
    }

    async fn put(&self, key: &str, data: Bytes) -> StorageResult<()> {
        let path = self.key_to_path(key)?;

        // Each write gets its own temp file, then renames over the target.
        let temp_path = self
            .root
            .join(format!("{}.{}{}", key, Uuid::new_v4().simple(), TEMP_SUFFIX));
        if let Err(e) = write_synced(&temp_path, &data).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(e);
        }
        if let Err(e) = fs::rename(&temp_path, &path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(e.into());
        }

        tracing::trace!(key = %key, bytes = data.len(), "Object written");
        Ok(())
    }

    async fn get(&self, key: &str) -> StorageResult<Bytes> {
        let path = self.key_to_path(key)?;

        match fs::read(&path).await {
            Ok(buffer) => Ok(Bytes::from(buffer)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(key.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

async fn write_synced(path: &Path, data: &[u8]) -> StorageResult<()> {
    let mut file = fs::File::create(path).await?;
    file.write_all(data).await?;
    file.sync_all().await?;
    Ok(())
}
