use crate::operations::OperationWarning;
use crate::storage::RecordStore;
use crate::{CapacityLedger, FileRecord, Node, NodefsError, Replica, new_id};
use chrono::Utc;

/// A replica write that did not happen.
#[derive(Debug)]
pub(crate) struct CommitFailure {
    pub error: NodefsError,
    pub warning: Option<OperationWarning>,
}

/// Reserves capacity on `node` and then records the replica.
///
/// If the record cannot be written the reservation is released again. When
/// that release fails too, the returned error says so and the failure is also
/// handed back as a warning.
pub(crate) async fn commit_replica(
    records: &dyn RecordStore,
    ledger: &CapacityLedger,
    file: &FileRecord,
    node: &Node,
) -> Result<Replica, CommitFailure> {
    ledger
        .reserve(node, file.size)
        .await
        .map_err(|error| CommitFailure {
            error,
            warning: None,
        })?;

    let replica = Replica {
        id: new_id(),
        file_id: file.id.clone(),
        node_id: node.id.clone(),
        created_at: Utc::now(),
    };

    let error = match records.create_replica(&replica).await {
        Ok(()) => return Ok(replica),
        Err(error) => error,
    };

    tracing::warn!(
        "Replica record for file {} on node {} failed, releasing {} units: {}",
        file.id,
        node.id,
        file.size,
        error
    );

    match ledger.release(&node.id, file.size).await {
        Ok(_) => Err(CommitFailure {
            error,
            warning: None,
        }),
        Err(release_error) => {
            tracing::error!(
                "Compensating release of {} units on node {} failed: {}",
                file.size,
                node.id,
                release_error
            );
            Err(CommitFailure {
                error: NodefsError::RecordStore(format!(
                    "{}; releasing {} units on node {} also failed: {}",
                    error, file.size, node.id, release_error
                )),
                warning: Some(OperationWarning::CompensationFailed {
                    node_id: node.id.clone(),
                    amount: file.size,
                    reason: release_error.to_string(),
                }),
            })
        }
    }
}

/// Deletes the replica row and then releases its capacity.
///
/// A failed row deletion is an error and leaves usage untouched. A failed
/// release after the row is gone is reported as a warning.
pub(crate) async fn remove_replica(
    records: &dyn RecordStore,
    ledger: &CapacityLedger,
    replica_id: &str,
    node_id: &str,
    size: u64,
) -> crate::Result<Option<OperationWarning>> {
    records.delete_replica(replica_id).await?;

    match ledger.release(node_id, size).await {
        Ok(_) => Ok(None),
        Err(error) => {
            tracing::error!(
                "Replica {} removed but releasing {} units on node {} failed: {}",
                replica_id,
                size,
                node_id,
                error
            );
            Ok(Some(OperationWarning::CapacityReleaseFailed {
                node_id: node_id.to_string(),
                amount: size,
                reason: error.to_string(),
            }))
        }
    }
}
