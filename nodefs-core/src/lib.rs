//! Nodefs Core - a simulated replicated file store
//!
//! Users register storage nodes with a fixed capacity, upload files onto a
//! chosen set of nodes, and toggle nodes online and offline to see which files
//! stay readable. The crate provides:
//! - capacity accounting with atomic reservations
//! - replica placement validation
//! - availability derived from node status on every query
//! - an advisory rebalance planner
//! - SQLite or in-memory records and filesystem or in-memory blobs

pub mod availability;
pub mod error;
pub mod ledger;
pub mod lifecycle;
pub mod model;
pub mod operations;
pub mod placement;
pub mod rebalance;
pub mod storage;

pub use availability::{FileHealth, health, impact_of_taking_offline, is_accessible};
pub use error::{NodefsError, Result};
pub use ledger::CapacityLedger;
pub use lifecycle::{MAX_NODE_CAPACITY, StatusChange};
pub use model::{
    DEFAULT_UNIT_BYTES, FileEntry, FileRecord, Node, NodeStatus, Replica, ReplicaView, Session,
    new_id, storage_units_for,
};
pub use rebalance::{FileMoves, NodeUtilization, RebalanceOptions, RebalanceReport, ReplicaMove};
pub use storage::{
    BlobStore, BlobStoreBuilder, FsBlobStore, MemoryBlobStore, MemoryRecordStore, RecordStore,
    RecordStoreBuilder, SqliteRecordStore, UsageUpdate, compute_hash, verify_hash,
};
