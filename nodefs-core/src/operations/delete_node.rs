use crate::lifecycle;
use crate::operations::lookup::owned_node;
use crate::storage::RecordStore;
use crate::{Node, Result, Session};
use std::sync::Arc;

#[derive(Clone)]
pub struct DeleteNodeOperation {
    records: Arc<dyn RecordStore>,
}

#[derive(Debug, Clone)]
pub struct DeleteNodeOperationRequest {
    pub session: Session,
    pub node_id: String,
}

#[derive(Debug, Clone)]
pub struct DeleteNodeOperationResult {
    pub node: Node,
}

impl DeleteNodeOperation {
    pub fn new(records: Arc<dyn RecordStore>) -> Self {
        Self { records }
    }

    pub async fn run(&self, request: DeleteNodeOperationRequest) -> Result<DeleteNodeOperationResult> {
        let DeleteNodeOperationRequest { session, node_id } = request;

        let node = owned_node(self.records.as_ref(), &session, &node_id).await?;
        let replicas = self.records.count_replicas_on_node(&node.id).await?;
        lifecycle::ensure_deletable(&node, replicas)?;

        // The store re-checks for replicas, so a replica created after the
        // count above still blocks the delete.
        self.records.delete_node(&node.id).await?;
        tracing::info!("Deleted node {} ({})", node.name, node.id);

        Ok(DeleteNodeOperationResult { node })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::NodefsError;
    use crate::operations::test_support::Fixture;
    use crate::operations::{
        DeleteReplicaOperation, DeleteReplicaOperationRequest, UploadFileOperation,
        UploadFileOperationRequest,
    };
    use bytes::Bytes;

    #[tokio::test]
    async fn test_delete_blocked_until_node_empty() {
        let fixture = Fixture::new();
        let a = fixture.node("a", 100).await;
        let uploaded = UploadFileOperation::new(fixture.records.clone(), fixture.blobs.clone())
            .run(UploadFileOperationRequest {
                session: fixture.session.clone(),
                name: "f".to_string(),
                data: Bytes::from_static(b"x"),
                size: Some(5),
                target_node_ids: vec![a.id.clone()],
            })
            .await
            .unwrap();

        let operation = DeleteNodeOperation::new(fixture.records.clone());
        let blocked = operation
            .run(DeleteNodeOperationRequest {
                session: fixture.session.clone(),
                node_id: a.id.clone(),
            })
            .await;
        assert!(matches!(
            blocked,
            Err(NodefsError::NodeNotEmpty { replicas: 1, .. })
        ));

        DeleteReplicaOperation::new(fixture.records.clone())
            .run(DeleteReplicaOperationRequest {
                session: fixture.session.clone(),
                replica_id: uploaded.replicas[0].id.clone(),
            })
            .await
            .unwrap();

        let deleted = operation
            .run(DeleteNodeOperationRequest {
                session: fixture.session.clone(),
                node_id: a.id.clone(),
            })
            .await
            .unwrap();
        assert_eq!(deleted.node.id, a.id);
        assert!(fixture.records.get_node(&a.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_foreign_node_not_found() {
        let fixture = Fixture::new();
        let a = fixture.node("a", 100).await;

        let result = DeleteNodeOperation::new(fixture.records.clone())
            .run(DeleteNodeOperationRequest {
                session: Session::new("mallory"),
                node_id: a.id.clone(),
            })
            .await;
        assert!(matches!(result, Err(NodefsError::NodeNotFound(_))));
        assert!(fixture.records.get_node(&a.id).await.unwrap().is_some());
    }
}
