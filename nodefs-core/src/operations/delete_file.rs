use crate::operations::OperationWarning;
use crate::operations::lookup::require_owned_file;
use crate::operations::replica_commit::remove_replica;
use crate::storage::{BlobStore, RecordStore};
use crate::{CapacityLedger, FileRecord, Result, Session};
use std::sync::Arc;

#[derive(Clone)]
pub struct DeleteFileOperation {
    records: Arc<dyn RecordStore>,
    blobs: Arc<dyn BlobStore>,
    ledger: CapacityLedger,
}

#[derive(Debug, Clone)]
pub struct DeleteFileOperationRequest {
    pub session: Session,
    pub file_id: String,
}

#[derive(Debug, Clone)]
pub struct DeleteFileOperationResult {
    pub file: FileRecord,
    pub replicas_removed: usize,
    pub warnings: Vec<OperationWarning>,
}

impl DeleteFileOperation {
    pub fn new(records: Arc<dyn RecordStore>, blobs: Arc<dyn BlobStore>) -> Self {
        let ledger = CapacityLedger::new(records.clone());
        Self {
            records,
            blobs,
            ledger,
        }
    }

    /// Removes every replica (releasing capacity on each node), then the file
    /// record, then the blob. A blob that cannot be removed is only a warning.
    pub async fn run(&self, request: DeleteFileOperationRequest) -> Result<DeleteFileOperationResult> {
        let DeleteFileOperationRequest { session, file_id } = request;

        let entry = require_owned_file(self.records.as_ref(), &session, &file_id).await?;
        let mut warnings = Vec::new();

        for replica in &entry.replicas {
            let warning = remove_replica(
                self.records.as_ref(),
                &self.ledger,
                &replica.id,
                &replica.node_id,
                entry.file.size,
            )
            .await?;
            warnings.extend(warning);
        }

        self.records.delete_file(&entry.file.id).await?;

        if let Err(error) = self.blobs.delete(&entry.file.blob_path).await {
            tracing::warn!(
                "Failed to remove blob {} of deleted file {}: {}",
                entry.file.blob_path,
                entry.file.id,
                error
            );
            warnings.push(OperationWarning::BlobCleanupFailed {
                path: entry.file.blob_path.clone(),
                reason: error.to_string(),
            });
        }

        tracing::info!(
            "Deleted file {} ({}) and {} replica(s)",
            entry.file.name,
            entry.file.id,
            entry.replicas.len()
        );

        Ok(DeleteFileOperationResult {
            replicas_removed: entry.replicas.len(),
            file: entry.file,
            warnings,
        })
    }
}
