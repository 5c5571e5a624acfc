//! Capacity accounting for nodes.
//!
//! A replica consumes its file's size on the node holding it. `reserve` is
//! applied once when the replica is created and `release` once when it is
//! removed, so that `capacity_used` always equals the sum of the sizes of the
//! replicas a node holds.

use crate::storage::{RecordStore, UsageUpdate};
use crate::{Node, NodefsError, Result};
use std::sync::Arc;

/// Free units on `node`.
pub fn available(node: &Node) -> u64 {
    node.capacity_total.saturating_sub(node.capacity_used)
}

/// `capacity_used / capacity_total`, in `[0, 1]` for consistent nodes.
pub fn utilization(node: &Node) -> f64 {
    if node.capacity_total == 0 {
        return 1.0;
    }
    node.capacity_used as f64 / node.capacity_total as f64
}

/// Snapshot check for a reservation. Does not write anything.
pub fn check_reserve(node: &Node, amount: u64) -> Result<()> {
    if available(node) < amount {
        return Err(NodefsError::InsufficientCapacity(node.id.clone()));
    }
    Ok(())
}

#[derive(Clone)]
pub struct CapacityLedger {
    records: Arc<dyn RecordStore>,
}

impl CapacityLedger {
    pub fn new(records: Arc<dyn RecordStore>) -> Self {
        Self { records }
    }

    /// Adds `amount` to the node's usage. The limit is enforced twice: against
    /// the caller's snapshot, then atomically by the record store.
    pub async fn reserve(&self, node: &Node, amount: u64) -> Result<Node> {
        check_reserve(node, amount)?;

        match self.records.try_reserve_usage(&node.id, amount).await? {
            UsageUpdate::Applied(updated) => {
                tracing::debug!(
                    "Reserved {} units on node {} ({}/{})",
                    amount,
                    updated.id,
                    updated.capacity_used,
                    updated.capacity_total
                );
                Ok(updated)
            }
            UsageUpdate::Rejected(current) => {
                tracing::warn!(
                    "Reservation of {} units on node {} rejected at write time ({}/{})",
                    amount,
                    current.id,
                    current.capacity_used,
                    current.capacity_total
                );
                Err(NodefsError::InsufficientCapacity(current.id))
            }
        }
    }

    /// Subtracts `amount` from the node's usage, clamped at zero.
    pub async fn release(&self, node_id: &str, amount: u64) -> Result<Node> {
        let updated = self.records.release_usage(node_id, amount).await?;
        tracing::debug!(
            "Released {} units on node {} ({}/{})",
            amount,
            updated.id,
            updated.capacity_used,
            updated.capacity_total
        );
        Ok(updated)
    }
}
