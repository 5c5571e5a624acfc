use crate::operations::lookup::require_owned_file;
use crate::operations::replica_commit::commit_replica;
use crate::placement;
use crate::storage::RecordStore;
use crate::{CapacityLedger, FileRecord, Replica, Result, Session};
use std::sync::Arc;

#[derive(Clone)]
pub struct AddReplicaOperation {
    records: Arc<dyn RecordStore>,
    ledger: CapacityLedger,
}

#[derive(Debug, Clone)]
pub struct AddReplicaOperationRequest {
    pub session: Session,
    pub file_id: String,
    pub node_id: String,
}

#[derive(Debug, Clone)]
pub struct AddReplicaOperationResult {
    pub file: FileRecord,
    pub replica: Replica,
}

impl AddReplicaOperation {
    pub fn new(records: Arc<dyn RecordStore>) -> Self {
        let ledger = CapacityLedger::new(records.clone());
        Self { records, ledger }
    }

    /// Places one more replica of an existing file. The file's bytes are
    /// shared, so only the node's capacity is charged.
    pub async fn run(&self, request: AddReplicaOperationRequest) -> Result<AddReplicaOperationResult> {
        let AddReplicaOperationRequest {
            session,
            file_id,
            node_id,
        } = request;

        let entry = require_owned_file(self.records.as_ref(), &session, &file_id).await?;
        let nodes = self.records.get_nodes(&session.owner).await?;
        let node = placement::validate_additional(&entry, &node_id, &nodes)?;

        let replica = commit_replica(self.records.as_ref(), &self.ledger, &entry.file, &node)
            .await
            .map_err(|failure| failure.error)?;

        tracing::info!(
            "Added replica {} of {} on node {}",
            replica.id,
            entry.file.id,
            node.id
        );

        Ok(AddReplicaOperationResult {
            file: entry.file,
            replica,
        })
    }
}
