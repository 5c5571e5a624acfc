use crate::storage::RecordStore;
use crate::{FileEntry, Node, NodefsError, Result, Session};

/// Loads a node the session owns. Nodes of other owners are reported as missing.
pub(crate) async fn owned_node(
    records: &dyn RecordStore,
    session: &Session,
    node_id: &str,
) -> Result<Node> {
    match records.get_node(node_id).await? {
        Some(node) if session.owns_node(&node) => Ok(node),
        _ => Err(NodefsError::NodeNotFound(node_id.to_string())),
    }
}

/// Loads a file the session owns, with a fresh view of its replicas.
pub(crate) async fn owned_file(
    records: &dyn RecordStore,
    session: &Session,
    file_id: &str,
) -> Result<Option<FileEntry>> {
    Ok(records
        .get_file(file_id)
        .await?
        .filter(|entry| session.owns_file(&entry.file)))
}

pub(crate) async fn require_owned_file(
    records: &dyn RecordStore,
    session: &Session,
    file_id: &str,
) -> Result<FileEntry> {
    owned_file(records, session, file_id)
        .await?
        .ok_or_else(|| NodefsError::FileNotFound(file_id.to_string()))
}
