use crate::operations::OperationWarning;
use crate::operations::lookup::owned_file;
use crate::operations::replica_commit::{commit_replica, remove_replica};
use crate::placement;
use crate::rebalance::{self, RebalanceOptions, RebalanceReport, ReplicaMove};
use crate::storage::RecordStore;
use crate::{CapacityLedger, NodefsError, Result, Session};
use serde::Serialize;
use std::sync::Arc;

#[derive(Clone)]
pub struct RebalanceOperation {
    records: Arc<dyn RecordStore>,
    ledger: CapacityLedger,
    options: RebalanceOptions,
}

#[derive(Debug, Clone, Serialize)]
pub struct AppliedMove {
    pub file_id: String,
    #[serde(flatten)]
    pub step: ReplicaMove,
}

#[derive(Debug, Clone, Serialize)]
pub struct FailedMove {
    pub file_id: String,
    #[serde(flatten)]
    pub step: ReplicaMove,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RebalanceOperationResult {
    pub plan: RebalanceReport,
    pub applied: Vec<AppliedMove>,
    pub failed: Vec<FailedMove>,
    pub warnings: Vec<OperationWarning>,
}

impl RebalanceOperation {
    pub fn new(records: Arc<dyn RecordStore>) -> Self {
        let ledger = CapacityLedger::new(records.clone());
        Self {
            records,
            ledger,
            options: RebalanceOptions::default(),
        }
    }

    pub fn with_options(mut self, options: RebalanceOptions) -> Self {
        self.options = options;
        self
    }

    /// Plans against a fresh snapshot of the session's nodes and files.
    pub async fn plan(&self, session: &Session) -> Result<RebalanceReport> {
        let nodes = self.records.get_nodes(&session.owner).await?;
        let files = self.records.get_files(&session.owner).await?;
        rebalance::plan(&files, &nodes, &self.options)
    }

    /// Plans and then applies every move.
    pub async fn run(&self, session: &Session) -> Result<RebalanceOperationResult> {
        let plan = self.plan(session).await?;
        self.apply(session, plan).await
    }

    /// Applies the moves of `plan` in step order. Each move adds the
    /// destination replica before removing the source one, so the file's
    /// replication factor never drops. A move whose preconditions no longer
    /// hold is skipped and reported.
    pub async fn apply(&self, session: &Session, plan: RebalanceReport) -> Result<RebalanceOperationResult> {
        let mut applied = Vec::new();
        let mut failed = Vec::new();
        let mut warnings = Vec::new();

        for (file, step) in plan.ordered_moves() {
            match self.apply_move(session, &file.file_id, step, &mut warnings).await {
                Ok(()) => applied.push(AppliedMove {
                    file_id: file.file_id.clone(),
                    step: step.clone(),
                }),
                Err(error) => {
                    tracing::warn!(
                        "Skipping move {} of file {} from {} to {}: {}",
                        step.step,
                        file.file_id,
                        step.source_node_id,
                        step.destination_node_id,
                        error
                    );
                    failed.push(FailedMove {
                        file_id: file.file_id.clone(),
                        step: step.clone(),
                        reason: error.to_string(),
                    });
                }
            }
        }

        tracing::info!(
            "Rebalance applied {} move(s), {} skipped",
            applied.len(),
            failed.len()
        );

        Ok(RebalanceOperationResult {
            plan,
            applied,
            failed,
            warnings,
        })
    }

    async fn apply_move(
        &self,
        session: &Session,
        file_id: &str,
        step: &ReplicaMove,
        warnings: &mut Vec<OperationWarning>,
    ) -> Result<()> {
        let entry = owned_file(self.records.as_ref(), session, file_id)
            .await?
            .ok_or_else(|| NodefsError::FileNotFound(file_id.to_string()))?;
        let source = entry
            .replicas
            .iter()
            .find(|replica| replica.node_id == step.source_node_id)
            .ok_or_else(|| {
                NodefsError::InvalidRequest(format!(
                    "file {} no longer has a replica on node {}",
                    file_id, step.source_node_id
                ))
            })?;
        if !source.node_status.is_online() {
            return Err(NodefsError::NodeOffline(step.source_node_id.clone()));
        }

        let nodes = self.records.get_nodes(&session.owner).await?;
        let destination = placement::validate_additional(&entry, &step.destination_node_id, &nodes)?;

        commit_replica(self.records.as_ref(), &self.ledger, &entry.file, &destination)
            .await
            .map_err(|failure| {
                warnings.extend(failure.warning);
                failure.error
            })?;

        let warning = remove_replica(
            self.records.as_ref(),
            &self.ledger,
            &source.id,
            &source.node_id,
            entry.file.size,
        )
        .await?;
        warnings.extend(warning);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operations::test_support::Fixture;
    use crate::operations::{UploadFileOperation, UploadFileOperationRequest};
    use bytes::Bytes;

    async fn upload(fixture: &Fixture, name: &str, size: u64, node_id: &str) -> String {
        UploadFileOperation::new(fixture.records.clone(), fixture.blobs.clone())
            .run(UploadFileOperationRequest {
                session: fixture.session.clone(),
                name: name.to_string(),
                data: Bytes::from_static(b"x"),
                size: Some(size),
                target_node_ids: vec![node_id.to_string()],
            })
            .await
            .unwrap()
            .file
            .id
    }

    #[tokio::test]
    async fn test_plan_needs_two_online_nodes() {
        let fixture = Fixture::new();
        let a = fixture.node("a", 100).await;
        upload(&fixture, "f", 10, &a.id).await;

        let result = RebalanceOperation::new(fixture.records.clone())
            .plan(&fixture.session)
            .await;
        assert!(matches!(result, Err(NodefsError::InsufficientNodes { online: 1 })));
    }

    #[tokio::test]
    async fn test_plan_does_not_write() {
        let fixture = Fixture::new();
        let a = fixture.node("a", 100).await;
        let b = fixture.node("b", 100).await;
        for name in ["f1", "f2", "f3"] {
            upload(&fixture, name, 20, &a.id).await;
        }

        let plan = RebalanceOperation::new(fixture.records.clone())
            .plan(&fixture.session)
            .await
            .unwrap();
        assert_eq!(plan.move_count(), 1);
        assert_eq!(fixture.reload(&a).await.capacity_used, 60);
        assert_eq!(fixture.reload(&b).await.capacity_used, 0);
    }

    #[tokio::test]
    async fn test_apply_moves_replicas() {
        let fixture = Fixture::new();
        let a = fixture.node("a", 100).await;
        let b = fixture.node("b", 100).await;
        for name in ["f1", "f2", "f3"] {
            upload(&fixture, name, 20, &a.id).await;
        }

        let result = RebalanceOperation::new(fixture.records.clone())
            .run(&fixture.session)
            .await
            .unwrap();
        assert_eq!(result.applied.len(), 1);
        assert!(result.failed.is_empty());
        assert_eq!(fixture.reload(&a).await.capacity_used, 40);
        assert_eq!(fixture.reload(&b).await.capacity_used, 20);

        let moved = fixture
            .records
            .get_file(&result.applied[0].file_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(moved.replication_factor(), 1);
        assert!(moved.has_replica_on(&b.id));
    }

    #[tokio::test]
    async fn test_stale_move_is_skipped() {
        let fixture = Fixture::new();
        let a = fixture.node("a", 100).await;
        let b = fixture.node("b", 100).await;
        for name in ["f1", "f2", "f3"] {
            upload(&fixture, name, 20, &a.id).await;
        }
        let operation = RebalanceOperation::new(fixture.records.clone());
        let plan = operation.plan(&fixture.session).await.unwrap();

        // The destination fills up between planning and applying.
        fixture.records.try_reserve_usage(&b.id, 90).await.unwrap();

        let result = operation.apply(&fixture.session, plan).await.unwrap();
        assert!(result.applied.is_empty());
        assert_eq!(result.failed.len(), 1);
        assert_eq!(fixture.reload(&a).await.capacity_used, 60);
        assert_eq!(fixture.reload(&b).await.capacity_used, 90);
    }
}
