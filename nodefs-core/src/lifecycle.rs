//! Node state transitions and deletion guard.
//!
//! Nodes move between `Online` and `Offline` only on user request. Taking a
//! node offline is never blocked; the guard only reports which files would
//! become unreadable. Deletion is blocked until the node holds no replicas.

use crate::availability;
use crate::{FileEntry, Node, NodeStatus, NodefsError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChange {
    pub node_id: String,
    pub from: NodeStatus,
    pub to: NodeStatus,
    /// Files that lose their last online replica through this change.
    pub affected_files: BTreeSet<String>,
}

impl StatusChange {
    pub fn is_noop(&self) -> bool {
        self.from == self.to
    }

    pub fn has_impact(&self) -> bool {
        !self.affected_files.is_empty()
    }
}

/// Describes moving `node` to `target`, given the files currently stored
/// anywhere in the cluster.
pub fn plan_status_change(node: &Node, target: NodeStatus, files: &[FileEntry]) -> StatusChange {
    let affected_files = if node.status.is_online() && target == NodeStatus::Offline {
        availability::impact_of_taking_offline(
            &node.id,
            availability::files_on_node(files, &node.id),
        )
    } else {
        BTreeSet::new()
    };

    StatusChange {
        node_id: node.id.clone(),
        from: node.status,
        to: target,
        affected_files,
    }
}

/// A node may be deleted only once every replica on it has been removed.
pub fn ensure_deletable(node: &Node, replica_count: usize) -> Result<()> {
    if replica_count > 0 {
        return Err(NodefsError::NodeNotEmpty {
            node_id: node.id.clone(),
            replicas: replica_count,
        });
    }
    Ok(())
}

/// Checks the fields of a node about to be created and returns the trimmed name.
/// Largest capacity a node may declare. Counters are stored as SQLite integers.
pub const MAX_NODE_CAPACITY: u64 = i64::MAX as u64;

pub fn validate_new_node(name: &str, capacity_total: u64) -> Result<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(NodefsError::InvalidRequest(
            "node name is required".to_string(),
        ));
    }
    if capacity_total < 1 {
        return Err(NodefsError::InvalidRequest(
            "node capacity must be at least 1 unit".to_string(),
        ));
    }
    if capacity_total > MAX_NODE_CAPACITY {
        return Err(NodefsError::InvalidRequest(format!(
            "node capacity must be at most {} units",
            MAX_NODE_CAPACITY
        )));
    }
    Ok(name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ReplicaView;
    use crate::storage::record_store::conformance;

    fn on(node: &Node) -> ReplicaView {
        ReplicaView {
            id: format!("r-{}", node.name),
            node_id: node.id.clone(),
            node_name: node.name.clone(),
            node_status: node.status,
        }
    }

    #[test]
    fn test_taking_offline_reports_impact() {
        let a = conformance::node("alice", "a", 10);
        let c = conformance::node("alice", "c", 10);
        let f1 = FileEntry {
            file: conformance::file("alice", "f1", 1),
            replicas: vec![on(&a)],
        };
        let f2 = FileEntry {
            file: conformance::file("alice", "f2", 1),
            replicas: vec![on(&a), on(&c)],
        };

        let change = plan_status_change(&a, NodeStatus::Offline, &[f1.clone(), f2]);
        assert!(!change.is_noop());
        assert!(change.has_impact());
        assert_eq!(change.affected_files, BTreeSet::from([f1.file.id]));
    }

    #[test]
    fn test_bringing_online_and_noop_have_no_impact() {
        let mut a = conformance::node("alice", "a", 10);
        let f = FileEntry {
            file: conformance::file("alice", "f", 1),
            replicas: vec![on(&a)],
        };

        let same = plan_status_change(&a, NodeStatus::Online, &[f.clone()]);
        assert!(same.is_noop());
        assert!(!same.has_impact());

        a.status = NodeStatus::Offline;
        let up = plan_status_change(&a, NodeStatus::Online, &[f.clone()]);
        assert_eq!(up.from, NodeStatus::Offline);
        assert!(!up.has_impact());

        let still_down = plan_status_change(&a, NodeStatus::Offline, &[f]);
        assert!(still_down.is_noop());
        assert!(!still_down.has_impact());
    }

    #[test]
    fn test_delete_guard() {
        let a = conformance::node("alice", "a", 10);
        assert!(matches!(
            ensure_deletable(&a, 2),
            Err(NodefsError::NodeNotEmpty { replicas: 2, .. })
        ));
        assert!(ensure_deletable(&a, 0).is_ok());
    }

    #[test]
    fn test_validate_new_node() {
        assert_eq!(validate_new_node("  edge-1 ", 100).unwrap(), "edge-1");
        assert!(validate_new_node("   ", 100).is_err());
        assert!(validate_new_node("edge-1", 0).is_err());
        assert!(validate_new_node("edge-1", MAX_NODE_CAPACITY).is_ok());
        assert!(matches!(
            validate_new_node("edge-1", MAX_NODE_CAPACITY + 1),
            Err(NodefsError::InvalidRequest(_))
        ));
    }
}
