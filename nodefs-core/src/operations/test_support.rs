use crate::storage::{MemoryBlobStore, MemoryRecordStore, RecordStore, UsageUpdate};
use crate::{FileEntry, FileRecord, Node, NodeStatus, NodefsError, Replica, Result, Session};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Memory record store that can be told to fail specific writes.
#[derive(Default)]
pub struct FlakyRecordStore {
    inner: MemoryRecordStore,
    fail_replicas_on: Mutex<HashSet<String>>,
    fail_release: AtomicBool,
}

impl FlakyRecordStore {
    pub fn fail_replicas_on(&self, node_id: &str) {
        self.fail_replicas_on
            .lock()
            .unwrap()
            .insert(node_id.to_string());
    }

    pub fn fail_release(&self, fail: bool) {
        self.fail_release.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl RecordStore for FlakyRecordStore {
    async fn get_nodes(&self, owner: &str) -> Result<Vec<Node>> {
        self.inner.get_nodes(owner).await
    }

    async fn get_node(&self, node_id: &str) -> Result<Option<Node>> {
        self.inner.get_node(node_id).await
    }

    async fn create_node(&self, node: &Node) -> Result<()> {
        self.inner.create_node(node).await
    }

    async fn update_node_status(&self, node_id: &str, status: NodeStatus) -> Result<Node> {
        self.inner.update_node_status(node_id, status).await
    }

    async fn try_reserve_usage(&self, node_id: &str, amount: u64) -> Result<UsageUpdate> {
        self.inner.try_reserve_usage(node_id, amount).await
    }

    async fn release_usage(&self, node_id: &str, amount: u64) -> Result<Node> {
        if self.fail_release.load(Ordering::SeqCst) {
            return Err(NodefsError::RecordStore("release refused".to_string()));
        }
        self.inner.release_usage(node_id, amount).await
    }

    async fn count_replicas_on_node(&self, node_id: &str) -> Result<usize> {
        self.inner.count_replicas_on_node(node_id).await
    }

    async fn delete_node(&self, node_id: &str) -> Result<()> {
        self.inner.delete_node(node_id).await
    }

    async fn get_files(&self, owner: &str) -> Result<Vec<FileEntry>> {
        self.inner.get_files(owner).await
    }

    async fn get_file(&self, file_id: &str) -> Result<Option<FileEntry>> {
        self.inner.get_file(file_id).await
    }

    async fn create_file(&self, file: &FileRecord) -> Result<()> {
        self.inner.create_file(file).await
    }

    async fn delete_file(&self, file_id: &str) -> Result<()> {
        self.inner.delete_file(file_id).await
    }

    async fn create_replica(&self, replica: &Replica) -> Result<()> {
        if self.fail_replicas_on.lock().unwrap().contains(&replica.node_id) {
            return Err(NodefsError::RecordStore(format!(
                "replica write refused on node {}",
                replica.node_id
            )));
        }
        self.inner.create_replica(replica).await
    }

    async fn get_replica(&self, replica_id: &str) -> Result<Option<Replica>> {
        self.inner.get_replica(replica_id).await
    }

    async fn delete_replica(&self, replica_id: &str) -> Result<()> {
        self.inner.delete_replica(replica_id).await
    }
}

pub struct Fixture {
    pub records: Arc<FlakyRecordStore>,
    pub blobs: Arc<MemoryBlobStore>,
    pub session: Session,
}

impl Fixture {
    pub fn new() -> Self {
        Self {
            records: Arc::new(FlakyRecordStore::default()),
            blobs: Arc::new(MemoryBlobStore::new()),
            session: Session::new("alice"),
        }
    }

    pub async fn node(&self, name: &str, total: u64) -> Node {
        let node = crate::storage::record_store::conformance::node(&self.session.owner, name, total);
        self.records.create_node(&node).await.unwrap();
        node
    }

    pub async fn reload(&self, node: &Node) -> Node {
        self.records.get_node(&node.id).await.unwrap().unwrap()
    }
}
