use serde::{Deserialize, Serialize};
use std::fmt;

/// A non-fatal problem that happened while an operation otherwise completed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OperationWarning {
    /// Releasing capacity after a failed replica write did not succeed, so the
    /// node's usage is overstated by `amount`.
    CompensationFailed {
        node_id: String,
        amount: u64,
        reason: String,
    },
    /// A replica row was removed but its capacity could not be released.
    CapacityReleaseFailed {
        node_id: String,
        amount: u64,
        reason: String,
    },
    BlobCleanupFailed { path: String, reason: String },
    /// Taking the node offline left these files without an online replica.
    FilesBecameUnavailable {
        node_id: String,
        file_ids: Vec<String>,
    },
}

impl fmt::Display for OperationWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationWarning::CompensationFailed {
                node_id,
                amount,
                reason,
            } => write!(
                f,
                "could not release {} units on node {} after a failed replica write: {}",
                amount, node_id, reason
            ),
            OperationWarning::CapacityReleaseFailed {
                node_id,
                amount,
                reason,
            } => write!(
                f,
                "replica removed but {} units on node {} were not released: {}",
                amount, node_id, reason
            ),
            OperationWarning::BlobCleanupFailed { path, reason } => {
                write!(f, "blob {} could not be removed: {}", path, reason)
            }
            OperationWarning::FilesBecameUnavailable { node_id, file_ids } => write!(
                f,
                "{} file(s) became unavailable after node {} went offline",
                file_ids.len(),
                node_id
            ),
        }
    }
}
