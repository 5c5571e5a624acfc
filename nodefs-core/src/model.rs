use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ulid::Ulid;

use crate::{NodefsError, Result};

/// Default size of one storage unit in bytes.
pub const DEFAULT_UNIT_BYTES: u64 = 1024 * 1024;

pub fn new_id() -> String {
    Ulid::new().to_string()
}

/// Converts a byte length into whole storage units, rounding up.
///
/// Empty payloads still occupy one unit so that every file has a positive size.
pub fn storage_units_for(len: u64, unit_bytes: u64) -> u64 {
    let unit_bytes = unit_bytes.max(1);
    len.div_ceil(unit_bytes).max(1)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Online,
    Offline,
}

impl NodeStatus {
    pub fn is_online(self) -> bool {
        self == NodeStatus::Online
    }

    pub fn as_str(self) -> &'static str {
        match self {
            NodeStatus::Online => "online",
            NodeStatus::Offline => "offline",
        }
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeStatus {
    type Err = NodefsError;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "online" => Ok(NodeStatus::Online),
            "offline" => Ok(NodeStatus::Offline),
            other => Err(NodefsError::InvalidRequest(format!(
                "unknown node status: {}",
                other
            ))),
        }
    }
}

/// A simulated storage unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    pub name: String,
    pub capacity_total: u64,
    pub capacity_used: u64,
    pub status: NodeStatus,
    pub owner: String,
    pub created_at: DateTime<Utc>,
}

impl Node {
    pub fn is_online(&self) -> bool {
        self.status.is_online()
    }
}

/// File metadata. The bytes live in the blob store under `blob_path`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: String,
    pub name: String,
    pub size: u64,
    pub owner: String,
    pub blob_path: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Replica {
    pub id: String,
    pub file_id: String,
    pub node_id: String,
    pub created_at: DateTime<Utc>,
}

/// A replica joined with the current state of the node holding it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaView {
    pub id: String,
    pub node_id: String,
    pub node_name: String,
    pub node_status: NodeStatus,
}

/// A file together with its replica set, as returned by record store listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub file: FileRecord,
    pub replicas: Vec<ReplicaView>,
}

impl FileEntry {
    pub fn id(&self) -> &str {
        &self.file.id
    }

    pub fn replication_factor(&self) -> usize {
        self.replicas.len()
    }

    pub fn has_replica_on(&self, node_id: &str) -> bool {
        self.replicas.iter().any(|replica| replica.node_id == node_id)
    }
}

/// The acting user. Passed explicitly to every operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub owner: String,
}

impl Session {
    pub fn new(owner: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
        }
    }

    pub fn owns_node(&self, node: &Node) -> bool {
        node.owner == self.owner
    }

    pub fn owns_file(&self, file: &FileRecord) -> bool {
        file.owner == self.owner
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_units_round_up() {
        assert_eq!(storage_units_for(0, DEFAULT_UNIT_BYTES), 1);
        assert_eq!(storage_units_for(1, DEFAULT_UNIT_BYTES), 1);
        assert_eq!(storage_units_for(DEFAULT_UNIT_BYTES, DEFAULT_UNIT_BYTES), 1);
        assert_eq!(storage_units_for(DEFAULT_UNIT_BYTES + 1, DEFAULT_UNIT_BYTES), 2);
        assert_eq!(storage_units_for(10, 0), 10);
    }

    #[test]
    fn test_node_status_parse() {
        assert_eq!("Online".parse::<NodeStatus>().unwrap(), NodeStatus::Online);
        assert_eq!(" offline ".parse::<NodeStatus>().unwrap(), NodeStatus::Offline);
        assert!("degraded".parse::<NodeStatus>().is_err());
        assert_eq!(
            serde_json::to_string(&NodeStatus::Offline).unwrap(),
            "\"offline\""
        );
    }
}
