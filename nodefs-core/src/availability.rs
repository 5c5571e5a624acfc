//! File availability derived from replica placement and node status.
//!
//! Nothing here is cached. Callers pass the freshest `FileEntry` they have and
//! must ask again before every access, because node status can change between
//! two queries.

use crate::FileEntry;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileHealth {
    /// Every replica is on an online node.
    Healthy,
    /// Readable, but at least one replica is on an offline node.
    Degraded,
    /// No replica is on an online node.
    Unavailable,
}

/// A file is accessible iff at least one of its replicas is on an online node.
pub fn is_accessible(file: &FileEntry) -> bool {
    file.replicas
        .iter()
        .any(|replica| replica.node_status.is_online())
}

pub fn online_replica_count(file: &FileEntry) -> usize {
    file.replicas
        .iter()
        .filter(|replica| replica.node_status.is_online())
        .count()
}

pub fn health(file: &FileEntry) -> FileHealth {
    let online = online_replica_count(file);
    if online == 0 {
        FileHealth::Unavailable
    } else if online < file.replicas.len() {
        FileHealth::Degraded
    } else {
        FileHealth::Healthy
    }
}

/// Files with at least one replica on `node_id`.
pub fn files_on_node<'a>(files: &'a [FileEntry], node_id: &str) -> Vec<&'a FileEntry> {
    files
        .iter()
        .filter(|file| file.has_replica_on(node_id))
        .collect()
}

/// Ids of the files in `files_on_node` that would stop being accessible if
/// `node_id` went offline.
///
/// Each file is re-evaluated with `node_id` treated as offline and every other
/// replica taken at its current status.
pub fn impact_of_taking_offline<'a, I>(node_id: &str, files_on_node: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = &'a FileEntry>,
{
    files_on_node
        .into_iter()
        .filter(|file| file.has_replica_on(node_id))
        .filter(|file| {
            !file
                .replicas
                .iter()
                .any(|replica| replica.node_id != node_id && replica.node_status.is_online())
        })
        .map(|file| file.file.id.clone())
        .collect()
}
