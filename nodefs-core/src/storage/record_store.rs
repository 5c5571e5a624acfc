use crate::{FileEntry, FileRecord, Node, NodeStatus, NodefsError, Replica, ReplicaView, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

/// Result of a conditional capacity increment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UsageUpdate {
    /// The increment fit and was written. Carries the node after the write.
    Applied(Node),
    /// The increment would exceed `capacity_total`. Nothing was written.
    Rejected(Node),
}

/// Durable storage for nodes, files and replicas.
///
/// Capacity counters are only changed through `try_reserve_usage` and
/// `release_usage`, which backends must apply atomically against the stored
/// value rather than read-modify-write from the caller.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn get_nodes(&self, owner: &str) -> Result<Vec<Node>>;

    async fn get_node(&self, node_id: &str) -> Result<Option<Node>>;

    async fn create_node(&self, node: &Node) -> Result<()>;

    async fn update_node_status(&self, node_id: &str, status: NodeStatus) -> Result<Node>;

    /// `capacity_used += amount` if the result stays within `capacity_total`.
    async fn try_reserve_usage(&self, node_id: &str, amount: u64) -> Result<UsageUpdate>;

    /// `capacity_used = max(0, capacity_used - amount)`.
    async fn release_usage(&self, node_id: &str, amount: u64) -> Result<Node>;

    async fn count_replicas_on_node(&self, node_id: &str) -> Result<usize>;

    /// Fails with `NodeNotEmpty` while replicas still reference the node.
    async fn delete_node(&self, node_id: &str) -> Result<()>;

    async fn get_files(&self, owner: &str) -> Result<Vec<FileEntry>>;

    async fn get_file(&self, file_id: &str) -> Result<Option<FileEntry>>;

    async fn create_file(&self, file: &FileRecord) -> Result<()>;

    /// Removes the file row and any replica rows still pointing at it.
    async fn delete_file(&self, file_id: &str) -> Result<()>;

    /// Fails with `DuplicateReplica` if the node already holds the file.
    async fn create_replica(&self, replica: &Replica) -> Result<()>;

    async fn get_replica(&self, replica_id: &str) -> Result<Option<Replica>>;

    async fn delete_replica(&self, replica_id: &str) -> Result<()>;
}

#[derive(Default)]
struct MemoryTables {
    nodes: BTreeMap<String, Node>,
    files: BTreeMap<String, FileRecord>,
    replicas: BTreeMap<String, Replica>,
}

impl MemoryTables {
    fn entry_for(&self, file: &FileRecord) -> FileEntry {
        let replicas = self
            .replicas
            .values()
            .filter(|replica| replica.file_id == file.id)
            .filter_map(|replica| {
                self.nodes.get(&replica.node_id).map(|node| ReplicaView {
                    id: replica.id.clone(),
                    node_id: node.id.clone(),
                    node_name: node.name.clone(),
                    node_status: node.status,
                })
            })
            .collect();

        FileEntry {
            file: file.clone(),
            replicas,
        }
    }

    fn node_mut(&mut self, node_id: &str) -> Result<&mut Node> {
        self.nodes
            .get_mut(node_id)
            .ok_or_else(|| NodefsError::NodeNotFound(node_id.to_string()))
    }
}

/// Process-local record store. Contents are lost on restart.
#[derive(Default)]
pub struct MemoryRecordStore {
    tables: RwLock<MemoryTables>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn get_nodes(&self, owner: &str) -> Result<Vec<Node>> {
        let tables = self.tables.read().await;
        let mut nodes: Vec<Node> = tables
            .nodes
            .values()
            .filter(|node| node.owner == owner)
            .cloned()
            .collect();
        nodes.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(nodes)
    }

    async fn get_node(&self, node_id: &str) -> Result<Option<Node>> {
        Ok(self.tables.read().await.nodes.get(node_id).cloned())
    }

    async fn create_node(&self, node: &Node) -> Result<()> {
        let mut tables = self.tables.write().await;
        if tables.nodes.contains_key(&node.id) {
            return Err(NodefsError::RecordStore(format!(
                "node {} already exists",
                node.id
            )));
        }
        tables.nodes.insert(node.id.clone(), node.clone());
        Ok(())
    }

    async fn update_node_status(&self, node_id: &str, status: NodeStatus) -> Result<Node> {
        let mut tables = self.tables.write().await;
        let node = tables.node_mut(node_id)?;
        node.status = status;
        Ok(node.clone())
    }

    async fn try_reserve_usage(&self, node_id: &str, amount: u64) -> Result<UsageUpdate> {
        let mut tables = self.tables.write().await;
        let node = tables.node_mut(node_id)?;
        match node.capacity_used.checked_add(amount) {
            Some(used) if used <= node.capacity_total => {
                node.capacity_used = used;
                Ok(UsageUpdate::Applied(node.clone()))
            }
            _ => Ok(UsageUpdate::Rejected(node.clone())),
        }
    }

    async fn release_usage(&self, node_id: &str, amount: u64) -> Result<Node> {
        let mut tables = self.tables.write().await;
        let node = tables.node_mut(node_id)?;
        node.capacity_used = node.capacity_used.saturating_sub(amount);
        Ok(node.clone())
    }

    async fn count_replicas_on_node(&self, node_id: &str) -> Result<usize> {
        let tables = self.tables.read().await;
        Ok(tables
            .replicas
            .values()
            .filter(|replica| replica.node_id == node_id)
            .count())
    }

    async fn delete_node(&self, node_id: &str) -> Result<()> {
        let mut tables = self.tables.write().await;
        if !tables.nodes.contains_key(node_id) {
            return Err(NodefsError::NodeNotFound(node_id.to_string()));
        }

        let replicas = tables
            .replicas
            .values()
            .filter(|replica| replica.node_id == node_id)
            .count();
        if replicas > 0 {
            return Err(NodefsError::NodeNotEmpty {
                node_id: node_id.to_string(),
                replicas,
            });
        }

        tables.nodes.remove(node_id);
        Ok(())
    }

    async fn get_files(&self, owner: &str) -> Result<Vec<FileEntry>> {
        let tables = self.tables.read().await;
        let mut files: Vec<&FileRecord> = tables
            .files
            .values()
            .filter(|file| file.owner == owner)
            .collect();
        files.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(files.into_iter().map(|file| tables.entry_for(file)).collect())
    }

    async fn get_file(&self, file_id: &str) -> Result<Option<FileEntry>> {
        let tables = self.tables.read().await;
        Ok(tables.files.get(file_id).map(|file| tables.entry_for(file)))
    }

    async fn create_file(&self, file: &FileRecord) -> Result<()> {
        let mut tables = self.tables.write().await;
        if tables.files.contains_key(&file.id) {
            return Err(NodefsError::RecordStore(format!(
                "file {} already exists",
                file.id
            )));
        }
        tables.files.insert(file.id.clone(), file.clone());
        Ok(())
    }

    async fn delete_file(&self, file_id: &str) -> Result<()> {
        let mut tables = self.tables.write().await;
        if tables.files.remove(file_id).is_none() {
            return Err(NodefsError::FileNotFound(file_id.to_string()));
        }
        tables.replicas.retain(|_, replica| replica.file_id != file_id);
        Ok(())
    }

    async fn create_replica(&self, replica: &Replica) -> Result<()> {
        let mut tables = self.tables.write().await;
        if !tables.files.contains_key(&replica.file_id) {
            return Err(NodefsError::FileNotFound(replica.file_id.clone()));
        }
        if !tables.nodes.contains_key(&replica.node_id) {
            return Err(NodefsError::NodeNotFound(replica.node_id.clone()));
        }
        let duplicate = tables.replicas.values().any(|existing| {
            existing.file_id == replica.file_id && existing.node_id == replica.node_id
        });
        if duplicate {
            return Err(NodefsError::DuplicateReplica {
                file_id: replica.file_id.clone(),
                node_id: replica.node_id.clone(),
            });
        }
        tables.replicas.insert(replica.id.clone(), replica.clone());
        Ok(())
    }

    async fn get_replica(&self, replica_id: &str) -> Result<Option<Replica>> {
        Ok(self.tables.read().await.replicas.get(replica_id).cloned())
    }

    async fn delete_replica(&self, replica_id: &str) -> Result<()> {
        let mut tables = self.tables.write().await;
        match tables.replicas.remove(replica_id) {
            Some(_) => Ok(()),
            None => Err(NodefsError::ReplicaNotFound(replica_id.to_string())),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_record_store_conformance() {
        let store = MemoryRecordStore::new();
        conformance::run_all(&store).await;
    }
}
