//! Content-addressed blob storage with interchangeable backends.
//!
//! Every artifact payload and every operator/artifact metadata record is a
//! blob at a deterministic path (see [`paths`]). Backends are expected to be
//! concurrency-safe at the object level; the engine treats transient IO
//! failures as System failures.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::models::StorageConfig;

pub mod file;
pub mod gcs;
pub mod paths;
pub mod s3;
pub(crate) mod sigv4;

pub use file::FileStorage;
pub use gcs::GcsStorage;
pub use s3::S3Storage;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("object not found at path {0}")]
    NotFound(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("remote storage error: {0}")]
    Remote(String),
}

impl From<reqwest::Error> for StorageError {
    fn from(err: reqwest::Error) -> Self {
        StorageError::Remote(err.to_string())
    }
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Get/Put/Exists/Delete of opaque byte blobs at string-typed paths.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn get(&self, path: &str) -> StorageResult<Vec<u8>>;
    async fn put(&self, path: &str, content: &[u8]) -> StorageResult<()>;
    async fn exists(&self, path: &str) -> bool;
    /// Idempotent; deleting a missing path is not an error.
    async fn delete(&self, path: &str) -> StorageResult<()>;
}

/// Build the backend named by a DAG's storage config.
pub fn from_config(config: &StorageConfig) -> Arc<dyn Storage> {
    match config {
        StorageConfig::File { directory } => Arc::new(FileStorage::new(directory)),
        StorageConfig::S3 {
            region,
            bucket,
            root_dir,
            access_key_id,
            secret_access_key,
        } => Arc::new(S3Storage::new(
            region,
            bucket,
            root_dir,
            access_key_id.clone().unwrap_or_default(),
            secret_access_key.clone().unwrap_or_default(),
        )),
        StorageConfig::Gcs {
            bucket,
            access_token,
        } => Arc::new(GcsStorage::new(bucket, access_token)),
    }
}

/// In-memory backend used by tests and previews that never touch disk.
#[derive(Default)]
pub struct MemoryStorage {
    blobs: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every stored path, for test assertions about sweeps.
    pub async fn paths(&self) -> Vec<String> {
        self.blobs.read().await.keys().cloned().collect()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn get(&self, path: &str) -> StorageResult<Vec<u8>> {
        self.blobs
            .read()
            .await
            .get(path)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(path.to_string()))
    }

    async fn put(&self, path: &str, content: &[u8]) -> StorageResult<()> {
        self.blobs
            .write()
            .await
            .insert(path.to_string(), content.to_vec());
        Ok(())
    }

    async fn exists(&self, path: &str) -> bool {
        self.blobs.read().await.contains_key(path)
    }

    async fn delete(&self, path: &str) -> StorageResult<()> {
        self.blobs.write().await.remove(path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_round_trip() {
        let storage = MemoryStorage::new();
        storage.put("content-abc", b"payload").await.unwrap();
        assert!(storage.exists("content-abc").await);
        assert_eq!(storage.get("content-abc").await.unwrap(), b"payload");

        storage.delete("content-abc").await.unwrap();
        assert!(!storage.exists("content-abc").await);
        // Deleting again is a no-op, not an error.
        storage.delete("content-abc").await.unwrap();
        assert!(matches!(
            storage.get("content-abc").await,
            Err(StorageError::NotFound(_))
        ));
    }
}
