//! Replica placement validation.
//!
//! A target set is checked as a whole before any capacity is reserved, so a
//! rejected batch leaves no partial reservations behind.

use crate::ledger;
use crate::{FileEntry, Node, NodefsError, Result};
use std::collections::HashSet;

/// Validates placing a file of `file_size` units on `target_node_ids`.
///
/// Rules, in order:
/// 1. the target set is non-empty (`NoNodesSelected`);
/// 2. every target is a known node (`NodeNotFound`);
/// 3. every target is online (`NodeOffline`);
/// 4. every target has at least `file_size` free units (`InsufficientCapacity`).
///
/// Duplicate ids collapse to their first occurrence. On success the matching
/// nodes are returned in target order.
pub fn validate(file_size: u64, target_node_ids: &[String], nodes: &[Node]) -> Result<Vec<Node>> {
    if file_size == 0 {
        return Err(NodefsError::InvalidRequest(
            "file size must be positive".to_string(),
        ));
    }

    let mut seen = HashSet::new();
    let targets: Vec<&str> = target_node_ids
        .iter()
        .map(|id| id.as_str())
        .filter(|id| seen.insert(*id))
        .collect();

    if targets.is_empty() {
        return Err(NodefsError::NoNodesSelected);
    }

    let mut selected = Vec::with_capacity(targets.len());
    for id in &targets {
        let node = nodes
            .iter()
            .find(|node| node.id == *id)
            .ok_or_else(|| NodefsError::NodeNotFound(id.to_string()))?;
        selected.push(node);
    }

    if let Some(node) = selected.iter().find(|node| !node.is_online()) {
        return Err(NodefsError::NodeOffline(node.id.clone()));
    }

    for node in &selected {
        ledger::check_reserve(node, file_size)?;
    }

    Ok(selected.into_iter().cloned().collect())
}

/// Validates adding one more replica of an existing file on `node_id`.
pub fn validate_additional(file: &FileEntry, node_id: &str, nodes: &[Node]) -> Result<Node> {
    if file.has_replica_on(node_id) {
        return Err(NodefsError::DuplicateReplica {
            file_id: file.file.id.clone(),
            node_id: node_id.to_string(),
        });
    }

    let mut validated = validate(file.file.size, &[node_id.to_string()], nodes)?;
    validated
        .pop()
        .ok_or_else(|| NodefsError::Internal("placement returned no node".to_string()))
}
