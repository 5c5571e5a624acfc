use crate::operations::{OperationWarning, PlacementFailure};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, NodefsError>;

#[derive(Debug, Error)]
pub enum NodefsError {
    #[error("node {0} does not have enough free capacity")]
    InsufficientCapacity(String),

    #[error("node {0} is offline and cannot accept replicas")]
    NodeOffline(String),

    #[error("no nodes selected for placement")]
    NoNodesSelected,

    #[error("node {node_id} still holds {replicas} replica(s); delete them first")]
    NodeNotEmpty { node_id: String, replicas: usize },

    #[error("rebalancing needs at least 2 online nodes, found {online}")]
    InsufficientNodes { online: usize },

    #[error("no file has any replica to rebalance")]
    NothingToBalance,

    #[error("node not found: {0}")]
    NodeNotFound(String),

    #[error("file not found: {0}")]
    FileNotFound(String),

    #[error("replica not found: {0}")]
    ReplicaNotFound(String),

    #[error("file {file_id} already has a replica on node {node_id}")]
    DuplicateReplica { file_id: String, node_id: String },

    #[error("file {0} has no replica on an online node")]
    FileUnavailable(String),

    /// Every target of an upload failed. `cause` is the first node's error.
    #[error(
        "no replica of {file_name} could be placed: {}",
        describe_placement(.failures, .warnings)
    )]
    UploadFailed {
        file_name: String,
        failures: Vec<PlacementFailure>,
        warnings: Vec<OperationWarning>,
        cause: Box<NodefsError>,
    },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("record store error: {0}")]
    RecordStore(String),

    #[error("blob store error: {0}")]
    BlobStore(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

fn describe_placement(failures: &[PlacementFailure], warnings: &[OperationWarning]) -> String {
    failures
        .iter()
        .map(|failure| format!("node {}: {}", failure.node_id, failure.reason))
        .chain(warnings.iter().map(|warning| warning.to_string()))
        .collect::<Vec<_>>()
        .join("; ")
}

impl From<rusqlite::Error> for NodefsError {
    fn from(error: rusqlite::Error) -> Self {
        NodefsError::RecordStore(error.to_string())
    }
}

impl NodefsError {
    /// Validation failures are reported before any state is touched.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            NodefsError::InsufficientCapacity(_)
                | NodefsError::NodeOffline(_)
                | NodefsError::NoNodesSelected
                | NodefsError::NodeNotEmpty { .. }
                | NodefsError::InsufficientNodes { .. }
                | NodefsError::NothingToBalance
                | NodefsError::DuplicateReplica { .. }
                | NodefsError::InvalidRequest(_)
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            NodefsError::NodeNotFound(_)
                | NodefsError::FileNotFound(_)
                | NodefsError::ReplicaNotFound(_)
        )
    }
}
