pub mod add_replica;
pub mod cluster_summary;
pub mod create_node;
pub mod delete_file;
pub mod delete_node;
pub mod delete_replica;
pub mod list_files;
pub mod list_nodes;
mod lookup;
pub mod node_status;
pub mod read_file;
pub mod rebalance_cluster;
mod replica_commit;
pub mod upload_file;
pub mod warning;

#[cfg(test)]
pub(crate) mod test_support;

pub use add_replica::{AddReplicaOperation, AddReplicaOperationRequest, AddReplicaOperationResult};
pub use cluster_summary::{ClusterSummary, ClusterSummaryOperation};
pub use create_node::{
    CreateNodeOperation, CreateNodeOperationRequest, CreateNodeOperationResult,
    DEFAULT_NODE_CAPACITY,
};
pub use delete_file::{DeleteFileOperation, DeleteFileOperationRequest, DeleteFileOperationResult};
pub use delete_node::{DeleteNodeOperation, DeleteNodeOperationRequest, DeleteNodeOperationResult};
pub use delete_replica::{
    DeleteReplicaOperation, DeleteReplicaOperationRequest, DeleteReplicaOperationResult,
};
pub use list_files::{ListFileItem, ListFilesOperation};
pub use list_nodes::{ListNodeItem, ListNodesOperation};
pub use node_status::{NodeStatusOperation, NodeStatusOperationRequest, NodeStatusOperationResult};
pub use read_file::{
    ReadFileOperation, ReadFileOperationOutcome, ReadFileOperationRequest, ReadFileOperationResult,
};
pub use rebalance_cluster::{AppliedMove, FailedMove, RebalanceOperation, RebalanceOperationResult};
pub use upload_file::{
    PlacementFailure, UploadFileOperation, UploadFileOperationRequest, UploadFileOperationResult,
};
pub use warning::OperationWarning;
