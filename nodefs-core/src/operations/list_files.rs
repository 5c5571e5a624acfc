use crate::availability::{self, FileHealth};
use crate::storage::RecordStore;
use crate::{FileEntry, Result, Session};
use serde::Serialize;
use std::sync::Arc;

#[derive(Clone)]
pub struct ListFilesOperation {
    records: Arc<dyn RecordStore>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ListFileItem {
    #[serde(flatten)]
    pub entry: FileEntry,
    pub accessible: bool,
    pub health: FileHealth,
    pub online_replicas: usize,
}

impl ListFileItem {
    fn from_entry(entry: FileEntry) -> Self {
        Self {
            accessible: availability::is_accessible(&entry),
            health: availability::health(&entry),
            online_replicas: availability::online_replica_count(&entry),
            entry,
        }
    }
}

impl ListFilesOperation {
    pub fn new(records: Arc<dyn RecordStore>) -> Self {
        Self { records }
    }

    /// The session's files, oldest first, each with availability evaluated now.
    pub async fn run(&self, session: &Session) -> Result<Vec<ListFileItem>> {
        let files = self.records.get_files(&session.owner).await?;
        Ok(files.into_iter().map(ListFileItem::from_entry).collect())
    }
}
