//! Storage collaborators for Nodefs
//!
//! Record storage for nodes, files and replicas, and opaque blob storage for
//! file contents. Each has a durable backend and an in-memory one.

pub mod blob_store;
pub mod factory;
pub mod record_store;
pub mod sqlite_store;

pub use blob_store::{BlobStore, FsBlobStore, MemoryBlobStore, compute_hash, verify_hash};
pub use factory::{BlobStoreBuilder, RecordStoreBuilder};
pub use record_store::{MemoryRecordStore, RecordStore, UsageUpdate};
pub use sqlite_store::SqliteRecordStore;
