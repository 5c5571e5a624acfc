use crate::lifecycle;
use crate::storage::RecordStore;
use crate::{Node, NodeStatus, Result, Session, new_id};
use chrono::Utc;
use std::sync::Arc;

/// Capacity given to a node when the caller does not pick one.
pub const DEFAULT_NODE_CAPACITY: u64 = 100;

#[derive(Clone)]
pub struct CreateNodeOperation {
    records: Arc<dyn RecordStore>,
}

#[derive(Debug, Clone)]
pub struct CreateNodeOperationRequest {
    pub session: Session,
    pub name: String,
    pub capacity_total: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct CreateNodeOperationResult {
    pub node: Node,
}

impl CreateNodeOperation {
    pub fn new(records: Arc<dyn RecordStore>) -> Self {
        Self { records }
    }

    /// Registers an online, empty node owned by the session.
    pub async fn run(&self, request: CreateNodeOperationRequest) -> Result<CreateNodeOperationResult> {
        let CreateNodeOperationRequest {
            session,
            name,
            capacity_total,
        } = request;

        let capacity_total = capacity_total.unwrap_or(DEFAULT_NODE_CAPACITY);
        let name = lifecycle::validate_new_node(&name, capacity_total)?;

        let node = Node {
            id: new_id(),
            name,
            capacity_total,
            capacity_used: 0,
            status: NodeStatus::Online,
            owner: session.owner,
            created_at: Utc::now(),
        };
        self.records.create_node(&node).await?;

        tracing::info!(
            "Created node {} ({}) with capacity {}",
            node.name,
            node.id,
            node.capacity_total
        );

        Ok(CreateNodeOperationResult { node })
    }
}
