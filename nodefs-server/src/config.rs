use nodefs_core::{
    BlobStore, BlobStoreBuilder, DEFAULT_UNIT_BYTES, NodefsError, RebalanceOptions, RecordStore,
    RecordStoreBuilder, Result,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    /// Owner used when a request carries no owner header.
    #[serde(default = "default_owner")]
    pub default_owner: String,
    /// Bytes per storage unit when deriving a file's size from its payload.
    #[serde(default = "default_unit_bytes")]
    pub unit_bytes: u64,
    #[serde(default)]
    pub records: RecordsConfig,
    #[serde(default)]
    pub blobs: BlobsConfig,
    #[serde(default)]
    pub rebalance: RebalanceOptions,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordsConfig {
    #[serde(default = "default_records_backend")]
    pub backend: String,
    #[serde(default)]
    pub sqlite_path: Option<PathBuf>,
}

impl Default for RecordsConfig {
    fn default() -> Self {
        Self {
            backend: default_records_backend(),
            sqlite_path: None,
        }
    }
}

impl RecordsConfig {
    pub fn build(&self) -> Result<Arc<dyn RecordStore>> {
        let mut builder = RecordStoreBuilder::new().backend(self.backend.clone());
        if let Some(path) = &self.sqlite_path {
            builder = builder.sqlite_path(path.clone());
        }
        builder.build()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlobsConfig {
    #[serde(default = "default_blobs_backend")]
    pub backend: String,
    #[serde(default)]
    pub root: Option<PathBuf>,
}

impl Default for BlobsConfig {
    fn default() -> Self {
        Self {
            backend: default_blobs_backend(),
            root: None,
        }
    }
}

impl BlobsConfig {
    pub fn build(&self) -> Result<Arc<dyn BlobStore>> {
        let mut builder = BlobStoreBuilder::new().backend(self.backend.clone());
        if let Some(root) = &self.root {
            builder = builder.root(root.clone());
        }
        builder.build()
    }
}

fn default_bind_addr() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_owner() -> String {
    "local".to_string()
}

fn default_unit_bytes() -> u64 {
    DEFAULT_UNIT_BYTES
}

fn default_records_backend() -> String {
    "memory".to_string()
}

fn default_blobs_backend() -> String {
    "memory".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            default_owner: default_owner(),
            unit_bytes: default_unit_bytes(),
            records: RecordsConfig::default(),
            blobs: BlobsConfig::default(),
            rebalance: RebalanceOptions::default(),
        }
    }
}

impl Config {
    pub fn from_file(path: &str) -> Result<Self> {
        let settings = ::config::Config::builder()
            .add_source(::config::File::with_name(path))
            .add_source(
                ::config::Environment::with_prefix("NODEFS")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()
            .map_err(|e| NodefsError::Config(e.to_string()))?;

        let config: Config = settings
            .try_deserialize()
            .map_err(|e| NodefsError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.default_owner.trim().is_empty() {
            return Err(NodefsError::Config(
                "default_owner cannot be empty".to_string(),
            ));
        }
        if self.unit_bytes == 0 {
            return Err(NodefsError::Config(
                "unit_bytes must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
