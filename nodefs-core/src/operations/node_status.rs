use crate::lifecycle::{self, StatusChange};
use crate::operations::OperationWarning;
use crate::operations::lookup::owned_node;
use crate::storage::RecordStore;
use crate::{Node, NodeStatus, Result, Session};
use std::sync::Arc;

#[derive(Clone)]
pub struct NodeStatusOperation {
    records: Arc<dyn RecordStore>,
}

#[derive(Debug, Clone)]
pub struct NodeStatusOperationRequest {
    pub session: Session,
    pub node_id: String,
    pub status: NodeStatus,
}

#[derive(Debug, Clone)]
pub struct NodeStatusOperationResult {
    pub node: Node,
    pub change: StatusChange,
    pub warnings: Vec<OperationWarning>,
}

impl NodeStatusOperation {
    pub fn new(records: Arc<dyn RecordStore>) -> Self {
        Self { records }
    }

    /// Files that would become unreadable if the node went offline now.
    /// Nothing is written.
    pub async fn preview(&self, session: &Session, node_id: &str) -> Result<StatusChange> {
        let node = owned_node(self.records.as_ref(), session, node_id).await?;
        let files = self.records.get_files(&session.owner).await?;
        Ok(lifecycle::plan_status_change(
            &node,
            NodeStatus::Offline,
            &files,
        ))
    }

    /// Moves the node to the requested status. Going offline is never refused;
    /// files losing their last online replica come back as a warning.
    pub async fn run(&self, request: NodeStatusOperationRequest) -> Result<NodeStatusOperationResult> {
        let NodeStatusOperationRequest {
            session,
            node_id,
            status,
        } = request;

        let node = owned_node(self.records.as_ref(), &session, &node_id).await?;
        let files = self.records.get_files(&session.owner).await?;
        let change = lifecycle::plan_status_change(&node, status, &files);

        if change.is_noop() {
            return Ok(NodeStatusOperationResult {
                node,
                change,
                warnings: Vec::new(),
            });
        }

        let node = self.records.update_node_status(&node_id, status).await?;
        tracing::info!(
            "Node {} ({}) changed {} -> {}",
            node.name,
            node.id,
            change.from,
            change.to
        );

        let mut warnings = Vec::new();
        if change.has_impact() {
            let warning = OperationWarning::FilesBecameUnavailable {
                node_id: node.id.clone(),
                file_ids: change.affected_files.iter().cloned().collect(),
            };
            tracing::warn!("{}", warning);
            warnings.push(warning);
        }

        Ok(NodeStatusOperationResult {
            node,
            change,
            warnings,
        })
    }
}
