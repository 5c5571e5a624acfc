use super::{BlobStore, FsBlobStore, MemoryBlobStore, MemoryRecordStore, RecordStore, SqliteRecordStore};
use crate::{NodefsError, Result};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
pub struct RecordStoreBuilder {
    backend: Option<String>,
    sqlite_path: Option<PathBuf>,
}

impl RecordStoreBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn backend(mut self, backend: impl Into<String>) -> Self {
        self.backend = Some(backend.into());
        self
    }

    pub fn sqlite_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.sqlite_path = Some(path.into());
        self
    }

    pub fn build(&self) -> Result<Arc<dyn RecordStore>> {
        match resolve_backend(self.backend.as_deref(), "record store")?.as_str() {
            "sqlite" => {
                let path = self.sqlite_path.clone().ok_or_else(|| {
                    NodefsError::Config("sqlite path is required for sqlite backend".to_string())
                })?;
                Ok(Arc::new(SqliteRecordStore::new(path)?))
            }
            "memory" => Ok(Arc::new(MemoryRecordStore::new())),
            other => Err(NodefsError::Config(format!(
                "unsupported record store backend: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct BlobStoreBuilder {
    backend: Option<String>,
    root: Option<PathBuf>,
}

impl BlobStoreBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn backend(mut self, backend: impl Into<String>) -> Self {
        self.backend = Some(backend.into());
        self
    }

    pub fn root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = Some(root.into());
        self
    }

    pub fn build(&self) -> Result<Arc<dyn BlobStore>> {
        match resolve_backend(self.backend.as_deref(), "blob store")?.as_str() {
            "fs" => {
                let root = self.root.clone().ok_or_else(|| {
                    NodefsError::Config("root directory is required for fs backend".to_string())
                })?;
                Ok(Arc::new(FsBlobStore::new(root)?))
            }
            "memory" => Ok(Arc::new(MemoryBlobStore::new())),
            other => Err(NodefsError::Config(format!(
                "unsupported blob store backend: {}",
                other
            ))),
        }
    }
}

fn resolve_backend(backend: Option<&str>, kind: &str) -> Result<String> {
    let backend = backend.unwrap_or_default().trim().to_ascii_lowercase();
    if backend.is_empty() {
        return Err(NodefsError::Config(format!("{} backend cannot be empty", kind)));
    }
    Ok(backend)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_store_builder_requires_backend() {
        let error = RecordStoreBuilder::new().build().err().unwrap();
        assert!(matches!(error, NodefsError::Config(_)));

        let error = RecordStoreBuilder::new().backend("sqlite").build().err().unwrap();
        assert!(error.to_string().contains("sqlite path"));

        let error = RecordStoreBuilder::new().backend("etcd").build().err().unwrap();
        assert!(error.to_string().contains("unsupported"));
    }

    #[test]
    fn test_builders_accept_known_backends() {
        let temp_dir = tempfile::tempdir().unwrap();

        assert!(RecordStoreBuilder::new().backend(" Memory ").build().is_ok());
        assert!(
            RecordStoreBuilder::new()
                .backend("sqlite")
                .sqlite_path(temp_dir.path().join("records.db"))
                .build()
                .is_ok()
        );
        assert!(BlobStoreBuilder::new().backend("memory").build().is_ok());
        assert!(
            BlobStoreBuilder::new()
                .backend("fs")
                .root(temp_dir.path().join("blobs"))
                .build()
                .is_ok()
        );
        assert!(BlobStoreBuilder::new().backend("fs").build().is_err());
    }
}
