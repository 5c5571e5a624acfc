use crate::{NodefsError, Result, new_id};
use async_trait::async_trait;
use bytes::Bytes;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;

/// Opaque byte storage for file contents.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Stores `data` and returns the path to fetch it by.
    async fn put(&self, data: Bytes) -> Result<String>;

    async fn get(&self, path: &str) -> Result<Option<Bytes>>;

    /// Removing a missing path is not an error.
    async fn delete(&self, path: &str) -> Result<()>;
}

/// Filesystem blob store.
/// Blobs are stored at `{base}/blobs/{blob_id}/{sha256}` and the returned
/// path is `{blob_id}/{sha256}`.
pub struct FsBlobStore {
    base_path: PathBuf,
}

impl FsBlobStore {
    pub fn new(base_path: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(base_path.join("blobs")).map_err(blob_error)?;
        Ok(Self { base_path })
    }

    pub fn base_path(&self) -> &PathBuf {
        &self.base_path
    }

    fn resolve(&self, path: &str) -> Result<(PathBuf, String)> {
        let (blob_id, hash) = split_blob_path(path)?;
        let dir = self.base_path.join("blobs").join(blob_id);
        Ok((dir.join(hash), hash.to_string()))
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put(&self, data: Bytes) -> Result<String> {
        let blob_id = new_id();
        let hash = compute_hash(&data);
        let blob_dir = self.base_path.join("blobs").join(&blob_id);
        fs::create_dir_all(&blob_dir).await.map_err(blob_error)?;

        let blob_path = blob_dir.join(&hash);

        // Write to temporary file first, then rename for atomicity
        let temp_path = blob_path.with_extension("tmp");
        let mut file = fs::File::create(&temp_path).await.map_err(blob_error)?;
        file.write_all(&data).await.map_err(blob_error)?;
        file.sync_all().await.map_err(blob_error)?;
        drop(file);

        fs::rename(&temp_path, &blob_path)
            .await
            .map_err(blob_error)?;

        tracing::debug!("Stored blob {} ({} bytes)", blob_id, data.len());
        Ok(format!("{}/{}", blob_id, hash))
    }

    async fn get(&self, path: &str) -> Result<Option<Bytes>> {
        let (blob_path, hash) = self.resolve(path)?;
        if !blob_path.exists() {
            return Ok(None);
        }

        let data = fs::read(&blob_path).await.map_err(blob_error)?;
        verify_hash(&data, &hash)?;
        Ok(Some(Bytes::from(data)))
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let (blob_path, _) = self.resolve(path)?;
        if blob_path.exists() {
            fs::remove_file(&blob_path).await.map_err(blob_error)?;
        }
        if let Some(dir) = blob_path.parent() {
            if dir.exists() {
                fs::remove_dir_all(dir).await.map_err(blob_error)?;
            }
        }
        Ok(())
    }
}

/// Process-local blob store keyed the same way as `FsBlobStore`.
#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: RwLock<HashMap<String, Bytes>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.blobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.blobs.read().await.is_empty()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, data: Bytes) -> Result<String> {
        let path = format!("{}/{}", new_id(), compute_hash(&data));
        self.blobs.write().await.insert(path.clone(), data);
        Ok(path)
    }

    async fn get(&self, path: &str) -> Result<Option<Bytes>> {
        split_blob_path(path)?;
        Ok(self.blobs.read().await.get(path).cloned())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        split_blob_path(path)?;
        self.blobs.write().await.remove(path);
        Ok(())
    }
}

/// Compute SHA256 hash of data
pub fn compute_hash(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Verify that data matches the expected hash
pub fn verify_hash(data: &[u8], expected_hash: &str) -> Result<()> {
    let actual_hash = compute_hash(data);
    if actual_hash != expected_hash {
        return Err(NodefsError::BlobStore(format!(
            "hash mismatch: expected {}, got {}",
            expected_hash, actual_hash
        )));
    }
    Ok(())
}

fn split_blob_path(path: &str) -> Result<(&str, &str)> {
    let invalid = || NodefsError::BlobStore(format!("invalid blob path: {}", path));

    let (blob_id, hash) = path.split_once('/').ok_or_else(invalid)?;
    let valid_component = |value: &str| {
        !value.is_empty() && value.chars().all(|c| c.is_ascii_alphanumeric())
    };
    if !valid_component(blob_id) || !valid_component(hash) {
        return Err(invalid());
    }
    Ok((blob_id, hash))
}

fn blob_error(error: std::io::Error) -> NodefsError {
    NodefsError::BlobStore(error.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fs_blob_store() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(temp_dir.path().to_path_buf()).unwrap();

        let data = Bytes::from("test data content");
        let path = store.put(data.clone()).await.unwrap();
        assert!(path.ends_with(&compute_hash(&data)));

        let retrieved = store.get(&path).await.unwrap();
        assert_eq!(retrieved, Some(data));

        store.delete(&path).await.unwrap();
        assert_eq!(store.get(&path).await.unwrap(), None);

        // Deleting twice is fine.
        store.delete(&path).await.unwrap();
    }

    #[tokio::test]
    async fn test_fs_blob_store_detects_corruption() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(temp_dir.path().to_path_buf()).unwrap();

        let path = store.put(Bytes::from("original")).await.unwrap();
        let (on_disk, _) = store.resolve(&path).unwrap();
        std::fs::write(&on_disk, b"tampered").unwrap();

        let result = store.get(&path).await;
        assert!(matches!(result, Err(NodefsError::BlobStore(_))));
    }

    #[tokio::test]
    async fn test_blob_paths_are_validated() {
        let store = MemoryBlobStore::new();
        assert!(store.get("../etc/passwd").await.is_err());
        assert!(store.get("no-separator").await.is_err());
        assert_eq!(store.get("abc/def").await.unwrap(), None);

        let path = store.put(Bytes::from_static(b"x")).await.unwrap();
        assert_eq!(store.len().await, 1);
        store.delete(&path).await.unwrap();
        assert!(store.is_empty().await);
    }

    #[test]
    fn test_compute_hash() {
        let data = b"hello world";
        let hash = compute_hash(data);
        assert_eq!(hash.len(), 64); // SHA256 hex string is 64 chars
        assert!(verify_hash(data, &hash).is_ok());
        assert!(verify_hash(b"other", &hash).is_err());
    }
}
