use crate::operations::OperationWarning;
use crate::operations::replica_commit::{CommitFailure, commit_replica};
use crate::placement;
use crate::storage::{BlobStore, RecordStore};
use crate::{
    CapacityLedger, DEFAULT_UNIT_BYTES, FileRecord, NodefsError, Replica, Result, Session, new_id,
    storage_units_for,
};
use bytes::Bytes;
use chrono::Utc;
use futures_util::future::join_all;
use serde::Serialize;
use std::sync::Arc;

#[derive(Clone)]
pub struct UploadFileOperation {
    records: Arc<dyn RecordStore>,
    blobs: Arc<dyn BlobStore>,
    ledger: CapacityLedger,
    unit_bytes: u64,
}

#[derive(Debug, Clone)]
pub struct UploadFileOperationRequest {
    pub session: Session,
    pub name: String,
    pub data: Bytes,
    /// Size in storage units. Derived from the payload length when absent.
    pub size: Option<u64>,
    pub target_node_ids: Vec<String>,
}

/// A target node that did not end up holding a replica.
#[derive(Debug, Clone, Serialize)]
pub struct PlacementFailure {
    pub node_id: String,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct UploadFileOperationResult {
    pub file: FileRecord,
    pub replicas: Vec<Replica>,
    pub failures: Vec<PlacementFailure>,
    pub warnings: Vec<OperationWarning>,
}

impl UploadFileOperationResult {
    pub fn is_partial(&self) -> bool {
        !self.failures.is_empty()
    }
}

impl UploadFileOperation {
    pub fn new(records: Arc<dyn RecordStore>, blobs: Arc<dyn BlobStore>) -> Self {
        let ledger = CapacityLedger::new(records.clone());
        Self {
            records,
            blobs,
            ledger,
            unit_bytes: DEFAULT_UNIT_BYTES,
        }
    }

    pub fn with_unit_bytes(mut self, unit_bytes: u64) -> Self {
        self.unit_bytes = unit_bytes.max(1);
        self
    }

    /// Stores the payload once and places one replica on each target node.
    ///
    /// The whole target set is validated before anything is written. Replicas
    /// are then committed concurrently; each one reserves capacity before its
    /// record is written and gives the reservation back if the write fails.
    /// Targets that fail are listed in the result. If none succeed, the file
    /// record and blob are removed again. A single plain failure is returned
    /// as is; otherwise `UploadFailed` carries every node's failure and
    /// warning.
    pub async fn run(&self, request: UploadFileOperationRequest) -> Result<UploadFileOperationResult> {
        let UploadFileOperationRequest {
            session,
            name,
            data,
            size,
            target_node_ids,
        } = request;

        let name = name.trim().to_string();
        if name.is_empty() {
            return Err(NodefsError::InvalidRequest(
                "file name is required".to_string(),
            ));
        }
        if name.chars().any(char::is_control) {
            return Err(NodefsError::InvalidRequest(
                "file name cannot contain control characters".to_string(),
            ));
        }
        let size = size.unwrap_or_else(|| storage_units_for(data.len() as u64, self.unit_bytes));

        let nodes = self.records.get_nodes(&session.owner).await?;
        let targets = placement::validate(size, &target_node_ids, &nodes)?;

        let blob_path = self.blobs.put(data).await?;
        let file = FileRecord {
            id: new_id(),
            name,
            size,
            owner: session.owner,
            blob_path,
            created_at: Utc::now(),
        };

        if let Err(error) = self.records.create_file(&file).await {
            if let Err(cleanup) = self.blobs.delete(&file.blob_path).await {
                tracing::warn!(
                    "Failed to remove blob {} after file record error: {}",
                    file.blob_path,
                    cleanup
                );
            }
            return Err(error);
        }

        let outcomes = join_all(
            targets
                .iter()
                .map(|node| commit_replica(self.records.as_ref(), &self.ledger, &file, node)),
        )
        .await;

        let mut replicas = Vec::new();
        let mut failures = Vec::new();
        let mut warnings = Vec::new();
        let mut first_error = None;

        for (node, outcome) in targets.iter().zip(outcomes) {
            match outcome {
                Ok(replica) => replicas.push(replica),
                Err(CommitFailure { error, warning }) => {
                    tracing::warn!(
                        "Replica of {} on node {} failed: {}",
                        file.id,
                        node.id,
                        error
                    );
                    failures.push(PlacementFailure {
                        node_id: node.id.clone(),
                        reason: error.to_string(),
                    });
                    warnings.extend(warning);
                    first_error.get_or_insert(error);
                }
            }
        }

        if replicas.is_empty() {
            self.discard(&file).await;
            let cause = first_error
                .unwrap_or_else(|| NodefsError::Internal("upload placed no replicas".to_string()));
            if failures.len() == 1 && warnings.is_empty() {
                return Err(cause);
            }
            return Err(NodefsError::UploadFailed {
                file_name: file.name,
                failures,
                warnings,
                cause: Box::new(cause),
            });
        }

        tracing::info!(
            "Uploaded {} ({}) with {} replica(s), {} failed",
            file.name,
            file.id,
            replicas.len(),
            failures.len()
        );

        Ok(UploadFileOperationResult {
            file,
            replicas,
            failures,
            warnings,
        })
    }

    async fn discard(&self, file: &FileRecord) {
        if let Err(error) = self.records.delete_file(&file.id).await {
            tracing::error!(
                "Failed to remove file record {} after a failed upload: {}",
                file.id,
                error
            );
        }
        if let Err(error) = self.blobs.delete(&file.blob_path).await {
            tracing::warn!(
                "Failed to remove blob {} after a failed upload: {}",
                file.blob_path,
                error
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operations::test_support::Fixture;

    fn request(fixture: &Fixture, name: &str, size: u64, targets: &[&str]) -> UploadFileOperationRequest {
        UploadFileOperationRequest {
            session: fixture.session.clone(),
            name: name.to_string(),
            data: Bytes::from(format!("contents of {}", name)),
            size: Some(size),
            target_node_ids: targets.iter().map(|id| id.to_string()).collect(),
        }
    }

    #[tokio::test]
    async fn test_upload_reserves_capacity_on_each_target() {
        let fixture = Fixture::new();
        let a = fixture.node("a", 100).await;
        let b = fixture.node("b", 50).await;
        let operation = UploadFileOperation::new(fixture.records.clone(), fixture.blobs.clone());

        let result = operation
            .run(request(&fixture, "report.pdf", 40, &[a.id.as_str(), b.id.as_str()]))
            .await
            .unwrap();
        assert!(!result.is_partial());
        assert_eq!(result.replicas.len(), 2);
        assert_eq!(fixture.reload(&a).await.capacity_used, 40);
        assert_eq!(fixture.reload(&b).await.capacity_used, 40);

        let entry = fixture.records.get_file(&result.file.id).await.unwrap().unwrap();
        assert_eq!(entry.replication_factor(), 2);
        assert_eq!(fixture.blobs.len().await, 1);
    }

    #[tokio::test]
    async fn test_upload_over_capacity_changes_nothing() {
        let fixture = Fixture::new();
        let a = fixture.node("a", 100).await;
        let operation = UploadFileOperation::new(fixture.records.clone(), fixture.blobs.clone());

        operation
            .run(request(&fixture, "first", 40, &[a.id.as_str()]))
            .await
            .unwrap();
        let error = operation
            .run(request(&fixture, "second", 70, &[a.id.as_str()]))
            .await
            .unwrap_err();

        assert!(matches!(error, NodefsError::InsufficientCapacity(ref id) if *id == a.id));
        assert_eq!(fixture.reload(&a).await.capacity_used, 40);
        assert_eq!(fixture.records.get_files("alice").await.unwrap().len(), 1);
        assert_eq!(fixture.blobs.len().await, 1);
    }

    #[tokio::test]
    async fn test_upload_validation_errors() {
        let fixture = Fixture::new();
        let a = fixture.node("a", 100).await;
        let operation = UploadFileOperation::new(fixture.records.clone(), fixture.blobs.clone());

        let none = operation.run(request(&fixture, "f", 1, &[])).await;
        assert!(matches!(none, Err(NodefsError::NoNodesSelected)));

        let unnamed = operation.run(request(&fixture, "  ", 1, &[a.id.as_str()])).await;
        assert!(matches!(unnamed, Err(NodefsError::InvalidRequest(_))));

        let newline = operation
            .run(request(&fixture, "a\nb", 1, &[a.id.as_str()]))
            .await;
        assert!(matches!(newline, Err(NodefsError::InvalidRequest(_))));

        let unknown = operation.run(request(&fixture, "f", 1, &["ghost"])).await;
        assert!(matches!(unknown, Err(NodefsError::NodeNotFound(_))));

        // Nodes of another owner are not valid targets.
        let mallory = UploadFileOperationRequest {
            session: Session::new("mallory"),
            ..request(&fixture, "f", 1, &[a.id.as_str()])
        };
        assert!(matches!(
            operation.run(mallory).await,
            Err(NodefsError::NodeNotFound(_))
        ));
        assert!(fixture.blobs.is_empty().await);
    }

    #[tokio::test]
    async fn test_size_derived_from_payload() {
        let fixture = Fixture::new();
        let a = fixture.node("a", 100).await;
        let operation = UploadFileOperation::new(fixture.records.clone(), fixture.blobs.clone())
            .with_unit_bytes(4);

        let result = operation
            .run(UploadFileOperationRequest {
                size: None,
                data: Bytes::from_static(b"0123456789"),
                ..request(&fixture, "f", 0, &[a.id.as_str()])
            })
            .await
            .unwrap();
        assert_eq!(result.file.size, 3);
        assert_eq!(fixture.reload(&a).await.capacity_used, 3);
    }

    #[tokio::test]
    async fn test_failed_replica_is_compensated_and_reported() {
        let fixture = Fixture::new();
        let a = fixture.node("a", 100).await;
        let b = fixture.node("b", 100).await;
        fixture.records.fail_replicas_on(&b.id);
        let operation = UploadFileOperation::new(fixture.records.clone(), fixture.blobs.clone());

        let result = operation
            .run(request(&fixture, "f", 30, &[a.id.as_str(), b.id.as_str()]))
            .await
            .unwrap();
        assert!(result.is_partial());
        assert_eq!(result.replicas.len(), 1);
        assert_eq!(result.failures[0].node_id, b.id);
        assert!(result.warnings.is_empty());

        assert_eq!(fixture.reload(&a).await.capacity_used, 30);
        assert_eq!(fixture.reload(&b).await.capacity_used, 0);
    }

    #[tokio::test]
    async fn test_compensation_failure_surfaces_warning() {
        let fixture = Fixture::new();
        let a = fixture.node("a", 100).await;
        let b = fixture.node("b", 100).await;
        fixture.records.fail_replicas_on(&b.id);
        fixture.records.fail_release(true);
        let operation = UploadFileOperation::new(fixture.records.clone(), fixture.blobs.clone());

        let result = operation
            .run(request(&fixture, "f", 30, &[a.id.as_str(), b.id.as_str()]))
            .await
            .unwrap();
        assert!(matches!(
            result.warnings.as_slice(),
            [OperationWarning::CompensationFailed { amount: 30, .. }]
        ));
        assert!(result.failures[0].reason.contains("also failed"));
    }

    #[tokio::test]
    async fn test_upload_with_no_committed_replica_is_rolled_back() {
        let fixture = Fixture::new();
        let a = fixture.node("a", 100).await;
        fixture.records.fail_replicas_on(&a.id);
        let operation = UploadFileOperation::new(fixture.records.clone(), fixture.blobs.clone());

        let error = operation
            .run(request(&fixture, "f", 10, &[a.id.as_str()]))
            .await
            .unwrap_err();
        assert!(matches!(error, NodefsError::RecordStore(_)));
        assert_eq!(fixture.reload(&a).await.capacity_used, 0);
        assert!(fixture.records.get_files("alice").await.unwrap().is_empty());
        assert!(fixture.blobs.is_empty().await);
    }

    #[tokio::test]
    async fn test_all_targets_failing_reports_every_node() {
        let fixture = Fixture::new();
        let a = fixture.node("a", 100).await;
        let b = fixture.node("b", 100).await;
        fixture.records.fail_replicas_on(&a.id);
        fixture.records.fail_replicas_on(&b.id);
        fixture.records.fail_release(true);
        let operation = UploadFileOperation::new(fixture.records.clone(), fixture.blobs.clone());

        let error = operation
            .run(request(&fixture, "f", 30, &[a.id.as_str(), b.id.as_str()]))
            .await
            .unwrap_err();

        let message = error.to_string();
        assert!(message.contains(&a.id));
        assert!(message.contains(&b.id));
        match error {
            NodefsError::UploadFailed {
                failures,
                warnings,
                cause,
                ..
            } => {
                let mut failed: Vec<_> = failures.iter().map(|f| f.node_id.clone()).collect();
                failed.sort();
                let mut expected = vec![a.id.clone(), b.id.clone()];
                expected.sort();
                assert_eq!(failed, expected);

                let mut leaked: Vec<_> = warnings
                    .iter()
                    .map(|warning| match warning {
                        OperationWarning::CompensationFailed {
                            node_id, amount, ..
                        } => (node_id.clone(), *amount),
                        other => panic!("unexpected warning {:?}", other),
                    })
                    .collect();
                leaked.sort();
                let mut expected_leaks = vec![(a.id.clone(), 30), (b.id.clone(), 30)];
                expected_leaks.sort();
                assert_eq!(leaked, expected_leaks);
                assert!(matches!(*cause, NodefsError::RecordStore(_)));
            }
            other => panic!("unexpected error {:?}", other),
        }

        assert!(fixture.records.get_files("alice").await.unwrap().is_empty());
        assert!(fixture.blobs.is_empty().await);
    }
}
