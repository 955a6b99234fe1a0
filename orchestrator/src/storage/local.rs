use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWriteExt};
use tracing::warn;

use super::{BlobStorage, StorageError};

/// Filesystem-backed blob storage rooted at a base directory.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    base_dir: PathBuf,
}

impl LocalStorage {
    /// Creates `base_dir` if it does not exist yet.
    pub async fn new(base_dir: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let base_dir = base_dir.into();
        if base_dir.as_os_str().is_empty() || base_dir == Path::new(".") {
            return Err(StorageError::InvalidPath(
                "base directory cannot be empty".to_string(),
            ));
        }
        tokio::fs::create_dir_all(&base_dir).await?;
        let base_dir = tokio::fs::canonicalize(&base_dir).await?;
        Ok(Self { base_dir })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn full_path(&self, key: &str) -> Result<PathBuf, StorageError> {
        if key.trim().is_empty() {
            return Err(StorageError::InvalidPath("path cannot be empty".to_string()));
        }

        let mut full = self.base_dir.clone();
        for component in Path::new(key).components() {
            match component {
                Component::Normal(part) => full.push(part),
                Component::CurDir => {}
                _ => {
                    return Err(StorageError::InvalidPath(format!(
                        "path traversal detected in '{key}'"
                    )))
                }
            }
        }
        if full == self.base_dir {
            return Err(StorageError::InvalidPath(format!("'{key}' names no file")));
        }
        Ok(full)
    }
}

fn not_found_or_io(e: std::io::Error) -> StorageError {
    if e.kind() == std::io::ErrorKind::NotFound {
        StorageError::NotFound
    } else {
        StorageError::Io(e)
    }
}

#[async_trait]
impl BlobStorage for LocalStorage {
    async fn upload(
        &self,
        key: &str,
        reader: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<(), StorageError> {
        let path = self.full_path(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut file = tokio::fs::File::create(&path).await?;
        let written = async {
            tokio::io::copy(reader, &mut file).await?;
            file.flush().await
        }
        .await;

        if let Err(e) = written {
            drop(file);
            if let Err(cleanup) = tokio::fs::remove_file(&path).await {
                warn!(path = %path.display(), error = %cleanup, "failed to remove partial upload");
            }
            return Err(StorageError::Io(e));
        }
        Ok(())
    }

    async fn download(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let path = self.full_path(key)?;
        tokio::fs::read(&path).await.map_err(not_found_or_io)
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let path = self.full_path(key)?;
        tokio::fs::remove_file(&path).await.map_err(not_found_or_io)
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        let path = self.full_path(key)?;
        tokio::fs::try_exists(&path).await.map_err(StorageError::Io)
    }

    async fn get_url(&self, key: &str) -> Result<String, StorageError> {
        let path = self.full_path(key)?;
        if !self.exists(key).await? {
            return Err(StorageError::NotFound);
        }
        Ok(path.to_string_lossy().to_string())
    }
}
