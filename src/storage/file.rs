//! Local filesystem storage backend.

use async_trait::async_trait;
use std::path::PathBuf;
use tokio::fs;

use super::{Storage, StorageError, StorageResult};

pub struct FileStorage {
    root: PathBuf,
}

impl FileStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, path: &str) -> PathBuf {
        self.root.join(path)
    }
}

#[async_trait]
impl Storage for FileStorage {
    async fn get(&self, path: &str) -> StorageResult<Vec<u8>> {
        match fs::read(self.resolve(path)).await {
            Ok(bytes) => Ok(bytes),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(path.to_string()))
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn put(&self, path: &str, content: &[u8]) -> StorageResult<()> {
        let target = self.resolve(path);
        // Run-suffixed paths nest one level below the root.
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(target, content).await?;
        Ok(())
    }

    async fn exists(&self, path: &str) -> bool {
        fs::try_exists(self.resolve(path)).await.unwrap_or(false)
    }

    async fn delete(&self, path: &str) -> StorageResult<()> {
        match fs::remove_file(self.resolve(path)).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path());

        storage.put("metadata-xyz", b"{}").await.unwrap();
        assert!(storage.exists("metadata-xyz").await);
        assert_eq!(storage.get("metadata-xyz").await.unwrap(), b"{}");

        storage.delete("metadata-xyz").await.unwrap();
        storage.delete("metadata-xyz").await.unwrap();
        assert!(matches!(
            storage.get("metadata-xyz").await,
            Err(StorageError::NotFound(_))
        ));
    }
}
