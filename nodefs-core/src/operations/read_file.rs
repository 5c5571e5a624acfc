use crate::availability;
use crate::operations::lookup::owned_file;
use crate::storage::{BlobStore, RecordStore};
use crate::{FileEntry, NodefsError, Result, Session};
use bytes::Bytes;
use std::sync::Arc;

#[derive(Clone)]
pub struct ReadFileOperation {
    records: Arc<dyn RecordStore>,
    blobs: Arc<dyn BlobStore>,
}

#[derive(Debug, Clone)]
pub struct ReadFileOperationRequest {
    pub session: Session,
    pub file_id: String,
    pub include_body: bool,
}

#[derive(Debug, Clone)]
pub struct ReadFileOperationResult {
    pub entry: FileEntry,
    pub body: Option<Bytes>,
}

#[derive(Debug, Clone)]
pub enum ReadFileOperationOutcome {
    Found(ReadFileOperationResult),
    NotFound,
    /// The file exists but none of its replicas is on an online node.
    Unavailable(FileEntry),
}

impl ReadFileOperation {
    pub fn new(records: Arc<dyn RecordStore>, blobs: Arc<dyn BlobStore>) -> Self {
        Self { records, blobs }
    }

    /// Availability is decided from a fresh record lookup on every call. A
    /// read that passed the check finishes even if a node goes offline while
    /// the body is being fetched.
    pub async fn run(&self, request: ReadFileOperationRequest) -> Result<ReadFileOperationOutcome> {
        let ReadFileOperationRequest {
            session,
            file_id,
            include_body,
        } = request;

        let Some(entry) = owned_file(self.records.as_ref(), &session, &file_id).await? else {
            return Ok(ReadFileOperationOutcome::NotFound);
        };

        if !availability::is_accessible(&entry) {
            tracing::debug!("File {} requested but no replica is online", entry.file.id);
            return Ok(ReadFileOperationOutcome::Unavailable(entry));
        }

        if !include_body {
            return Ok(ReadFileOperationOutcome::Found(ReadFileOperationResult {
                entry,
                body: None,
            }));
        }

        let body = self
            .blobs
            .get(&entry.file.blob_path)
            .await?
            .ok_or_else(|| {
                NodefsError::BlobStore(format!(
                    "blob {} of file {} is missing",
                    entry.file.blob_path, entry.file.id
                ))
            })?;

        Ok(ReadFileOperationOutcome::Found(ReadFileOperationResult {
            entry,
            body: Some(body),
        }))
    }
}
