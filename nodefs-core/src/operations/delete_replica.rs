use crate::operations::OperationWarning;
use crate::operations::lookup::owned_file;
use crate::operations::replica_commit::remove_replica;
use crate::storage::RecordStore;
use crate::{CapacityLedger, NodefsError, Replica, Result, Session};
use std::sync::Arc;

#[derive(Clone)]
pub struct DeleteReplicaOperation {
    records: Arc<dyn RecordStore>,
    ledger: CapacityLedger,
}

#[derive(Debug, Clone)]
pub struct DeleteReplicaOperationRequest {
    pub session: Session,
    pub replica_id: String,
}

#[derive(Debug, Clone)]
pub struct DeleteReplicaOperationResult {
    pub replica: Replica,
    pub released: u64,
    pub warnings: Vec<OperationWarning>,
}

impl DeleteReplicaOperation {
    pub fn new(records: Arc<dyn RecordStore>) -> Self {
        let ledger = CapacityLedger::new(records.clone());
        Self { records, ledger }
    }

    /// Removes one replica and gives its capacity back to the node.
    ///
    /// A file may be left with no replicas; it stays listed but unreadable.
    pub async fn run(&self, request: DeleteReplicaOperationRequest) -> Result<DeleteReplicaOperationResult> {
        let DeleteReplicaOperationRequest {
            session,
            replica_id,
        } = request;

        let not_found = || NodefsError::ReplicaNotFound(replica_id.clone());
        let replica = self
            .records
            .get_replica(&replica_id)
            .await?
            .ok_or_else(not_found)?;
        let entry = owned_file(self.records.as_ref(), &session, &replica.file_id)
            .await?
            .ok_or_else(not_found)?;

        let size = entry.file.size;
        let warning = remove_replica(
            self.records.as_ref(),
            &self.ledger,
            &replica.id,
            &replica.node_id,
            size,
        )
        .await?;

        tracing::info!(
            "Deleted replica {} of {} from node {}",
            replica.id,
            replica.file_id,
            replica.node_id
        );

        Ok(DeleteReplicaOperationResult {
            replica,
            released: size,
            warnings: warning.into_iter().collect(),
        })
    }
}
