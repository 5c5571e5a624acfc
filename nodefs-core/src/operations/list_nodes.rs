use crate::ledger;
use crate::storage::RecordStore;
use crate::{Node, Result, Session};
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Clone, Serialize)]
pub struct ListNodeItem {
    #[serde(flatten)]
    pub node: Node,
    pub available: u64,
    pub utilization: f64,
    pub replicas: usize,
}

#[derive(Clone)]
pub struct ListNodesOperation {
    records: Arc<dyn RecordStore>,
}

impl ListNodesOperation {
    pub fn new(records: Arc<dyn RecordStore>) -> Self {
        Self { records }
    }

    pub async fn run(&self, session: &Session) -> Result<Vec<ListNodeItem>> {
        let nodes = self.records.get_nodes(&session.owner).await?;
        let mut items = Vec::with_capacity(nodes.len());
        for node in nodes {
            let replicas = self.records.count_replicas_on_node(&node.id).await?;
            items.push(ListNodeItem {
                available: ledger::available(&node),
                utilization: ledger::utilization(&node),
                replicas,
                node,
            });
        }
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operations::test_support::Fixture;

    #[tokio::test]
    async fn test_list_nodes_with_usage() {
        let fixture = Fixture::new();
        let a = fixture.node("a", 200).await;
        fixture.records.try_reserve_usage(&a.id, 50).await.unwrap();

        let items = ListNodesOperation::new(fixture.records.clone())
            .run(&fixture.session)
            .await
            .unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].available, 150);
        assert!((items[0].utilization - 0.25).abs() < f64::EPSILON);
        assert_eq!(items[0].replicas, 0);
    }
}
