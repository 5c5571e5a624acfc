use crate::availability::{self, FileHealth};
use crate::storage::RecordStore;
use crate::{Result, Session};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterSummary {
    pub nodes: usize,
    pub online_nodes: usize,
    pub capacity_total: u64,
    pub capacity_used: u64,
    pub files: usize,
    pub replicas: usize,
    /// Replicas per file, 0 when there are no files.
    pub average_replication_factor: f64,
    pub healthy_files: usize,
    pub degraded_files: usize,
    pub unavailable_files: usize,
}

#[derive(Clone)]
pub struct ClusterSummaryOperation {
    records: Arc<dyn RecordStore>,
}

impl ClusterSummaryOperation {
    pub fn new(records: Arc<dyn RecordStore>) -> Self {
        Self { records }
    }

    pub async fn run(&self, session: &Session) -> Result<ClusterSummary> {
        let nodes = self.records.get_nodes(&session.owner).await?;
        let files = self.records.get_files(&session.owner).await?;

        let mut summary = ClusterSummary {
            nodes: nodes.len(),
            online_nodes: nodes.iter().filter(|node| node.is_online()).count(),
            capacity_total: nodes
                .iter()
                .fold(0u64, |total, node| total.saturating_add(node.capacity_total)),
            capacity_used: nodes
                .iter()
                .fold(0u64, |used, node| used.saturating_add(node.capacity_used)),
            files: files.len(),
            replicas: files.iter().map(|file| file.replication_factor()).sum(),
            ..Default::default()
        };

        if summary.files > 0 {
            summary.average_replication_factor = summary.replicas as f64 / summary.files as f64;
        }

        for file in &files {
            match availability::health(file) {
                FileHealth::Healthy => summary.healthy_files += 1,
                FileHealth::Degraded => summary.degraded_files += 1,
                FileHealth::Unavailable => summary.unavailable_files += 1,
            }
        }

        Ok(summary)
    }
}
