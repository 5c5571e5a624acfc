//! Advisory replica rebalancing.
//!
//! The planner works on a projection of the snapshot it is given and never
//! writes anything. It moves replicas one at a time between online nodes,
//! always picking the move that most reduces `sum(used^2 / total)` over the
//! online nodes. That sum is smallest when every node has the same
//! utilization ratio. A move never lands on a node that already holds the
//! file and never overfills the destination, and replica counts are left
//! unchanged.

use crate::ledger;
use crate::{FileEntry, Node, NodefsError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

const MIN_IMPROVEMENT: f64 = 1e-9;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RebalanceOptions {
    #[serde(default = "default_max_moves")]
    pub max_moves: usize,
}

fn default_max_moves() -> usize {
    100
}

impl Default for RebalanceOptions {
    fn default() -> Self {
        Self {
            max_moves: default_max_moves(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicaMove {
    /// Position of this move in the overall plan. Moves must be applied in
    /// ascending step order for the capacity projection to hold.
    pub step: usize,
    pub source_node_id: String,
    pub destination_node_id: String,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileMoves {
    pub file_id: String,
    pub file_name: String,
    pub moves: Vec<ReplicaMove>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeUtilization {
    pub node_id: String,
    pub node_name: String,
    pub capacity_total: u64,
    pub used_before: u64,
    pub used_after: u64,
    pub ratio_before: f64,
    pub ratio_after: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RebalanceReport {
    pub files: Vec<FileMoves>,
    pub nodes: Vec<NodeUtilization>,
    pub spread_before: f64,
    pub spread_after: f64,
}

impl RebalanceReport {
    pub fn move_count(&self) -> usize {
        self.files.iter().map(|file| file.moves.len()).sum()
    }

    pub fn is_balanced(&self) -> bool {
        self.move_count() == 0
    }

    /// All moves in the order they were planned.
    pub fn ordered_moves(&self) -> Vec<(&FileMoves, &ReplicaMove)> {
        let mut moves: Vec<(&FileMoves, &ReplicaMove)> = self
            .files
            .iter()
            .flat_map(|file| file.moves.iter().map(move |step| (file, step)))
            .collect();
        moves.sort_by_key(|(_, step)| step.step);
        moves
    }
}

struct Projection<'a> {
    node: &'a Node,
    used: u64,
}

impl Projection<'_> {
    fn cost_delta(&self, added: i128) -> f64 {
        let total = self.node.capacity_total.max(1) as f64;
        let before = self.used as f64;
        let after = (self.used as i128 + added) as f64;
        (after * after - before * before) / total
    }

    fn ratio(&self) -> f64 {
        self.used as f64 / self.node.capacity_total.max(1) as f64
    }
}

/// Proposes replica moves that even out utilization across online nodes.
pub fn plan(files: &[FileEntry], nodes: &[Node], options: &RebalanceOptions) -> Result<RebalanceReport> {
    let online: Vec<&Node> = nodes.iter().filter(|node| node.is_online()).collect();
    if online.len() < 2 {
        return Err(NodefsError::InsufficientNodes {
            online: online.len(),
        });
    }

    let candidates: Vec<&FileEntry> = files
        .iter()
        .filter(|file| !file.replicas.is_empty())
        .collect();
    if candidates.is_empty() {
        return Err(NodefsError::NothingToBalance);
    }

    let mut projection: Vec<Projection<'_>> = online
        .iter()
        .map(|node| Projection {
            node,
            used: node.capacity_used,
        })
        .collect();
    let index: HashMap<&str, usize> = online
        .iter()
        .enumerate()
        .map(|(i, node)| (node.id.as_str(), i))
        .collect();

    // Holders include offline nodes so that nothing is placed twice.
    let mut holders: Vec<BTreeSet<String>> = candidates
        .iter()
        .map(|file| file.replicas.iter().map(|r| r.node_id.clone()).collect())
        .collect();

    let spread_before = spread(&projection);
    let mut planned: Vec<Vec<ReplicaMove>> = vec![Vec::new(); candidates.len()];
    let mut step = 0;

    while step < options.max_moves {
        let mut best: Option<(f64, usize, usize, usize)> = None;

        for (file_idx, file) in candidates.iter().enumerate() {
            let size = file.file.size;
            if size == 0 {
                continue;
            }

            for source_id in &holders[file_idx] {
                let Some(&src) = index.get(source_id.as_str()) else {
                    continue;
                };

                for dst in 0..projection.len() {
                    if dst == src || holders[file_idx].contains(&projection[dst].node.id) {
                        continue;
                    }
                    let free = projection[dst]
                        .node
                        .capacity_total
                        .saturating_sub(projection[dst].used);
                    if free < size {
                        continue;
                    }

                    let delta = projection[src].cost_delta(-(size as i128))
                        + projection[dst].cost_delta(size as i128);
                    let improves = delta < -MIN_IMPROVEMENT
                        && best.is_none_or(|(best_delta, _, _, _)| delta < best_delta);
                    if improves {
                        best = Some((delta, file_idx, src, dst));
                    }
                }
            }
        }

        let Some((_, file_idx, src, dst)) = best else {
            break;
        };

        let size = candidates[file_idx].file.size;
        let source_id = projection[src].node.id.clone();
        let destination_id = projection[dst].node.id.clone();

        projection[src].used = projection[src].used.saturating_sub(size);
        projection[dst].used += size;
        holders[file_idx].remove(&source_id);
        holders[file_idx].insert(destination_id.clone());

        planned[file_idx].push(ReplicaMove {
            step,
            source_node_id: source_id,
            destination_node_id: destination_id,
            size,
        });
        step += 1;
    }

    let files = candidates
        .iter()
        .zip(planned)
        .filter(|(_, moves)| !moves.is_empty())
        .map(|(file, moves)| FileMoves {
            file_id: file.file.id.clone(),
            file_name: file.file.name.clone(),
            moves,
        })
        .collect();

    let nodes = projection
        .iter()
        .map(|p| NodeUtilization {
            node_id: p.node.id.clone(),
            node_name: p.node.name.clone(),
            capacity_total: p.node.capacity_total,
            used_before: p.node.capacity_used,
            used_after: p.used,
            ratio_before: ledger::utilization(p.node),
            ratio_after: p.ratio(),
        })
        .collect();

    Ok(RebalanceReport {
        files,
        nodes,
        spread_before,
        spread_after: spread(&projection),
    })
}

fn spread(projection: &[Projection<'_>]) -> f64 {
    let ratios = projection.iter().map(|p| p.ratio());
    let max = ratios.clone().fold(f64::MIN, f64::max);
    let min = ratios.fold(f64::MAX, f64::min);
    if max < min { 0.0 } else { max - min }
}
