//! Leaf expansion and backpropagation of discounted returns.

use crate::config::SearchConfig;
use crate::node::{LatentIndex, NodeId};
use crate::stats::{MinMaxStats, MinMaxStatsGrid};
use crate::traverse::Traversal;
use crate::tree::Tree;
use ez_core::{EzError, OracleOutput, Policy, Result};
use tracing::trace;

/// Counters from one round of backpropagation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BackpropSummary {
    pub expansions: usize,
    pub resets: usize,
}

/// Back up `value` from the last node of `path` to the root.
///
/// Every node on the path gets one visit and the return seen from it; the
/// min-max tracker sees each node's Q from its parent.
pub fn back_propagate(
    tree: &mut Tree,
    path: &[NodeId],
    stats: &mut MinMaxStats,
    value: f32,
    discount: f32,
) {
    let mut bootstrap = value;

    for &id in path.iter().rev() {
        let node = tree.get_mut(id);
        node.stats.value_sum += bootstrap;
        node.stats.visit_count += 1;

        let reward = tree.reward(id);
        stats.update(reward + discount * tree.get(id).value());
        bootstrap = reward + discount * bootstrap;
    }
}

/// Expand every selected leaf with its oracle output and back up values.
///
/// Leaves are processed in the traversal's lane-major order, so overlapping
/// paths of different lanes mutate shared nodes in the same order on every
/// run. A leaf already expanded by an earlier lane this round is only
/// backed up. `depth` is the pool depth the round's latents were published
/// at.
///
/// # Errors
/// `EzError::ShapeMismatch` if `reset_flags` is not `[searches][num]` or the
/// output row count differs from the number of leaves.
pub fn batch_backpropagate(
    trees: &mut [Tree],
    traversal: &Traversal,
    depth: usize,
    output: &OracleOutput,
    reset_flags: &[Vec<bool>],
    config: &SearchConfig,
    stats: &mut MinMaxStatsGrid,
) -> Result<BackpropSummary> {
    if reset_flags.len() != traversal.searches {
        return Err(EzError::ShapeMismatch {
            what: "reset flag lanes",
            expected: traversal.searches,
            actual: reset_flags.len(),
        });
    }
    if let Some(lane) = reset_flags.iter().find(|lane| lane.len() != traversal.num) {
        return Err(EzError::ShapeMismatch {
            what: "reset flag batch",
            expected: traversal.num,
            actual: lane.len(),
        });
    }
    if output.rows() != traversal.len() {
        return Err(EzError::ShapeMismatch {
            what: "oracle output rows",
            expected: traversal.len(),
            actual: output.rows(),
        });
    }

    let mut summary = BackpropSummary::default();

    for (row, leaf) in traversal.leaves.iter().enumerate() {
        let tree = trees
            .get_mut(leaf.batch)
            .ok_or(EzError::ShapeMismatch {
                what: "trees",
                expected: leaf.batch + 1,
                actual: traversal.num,
            })?;
        let is_reset = reset_flags[leaf.lane][leaf.batch];
        if is_reset {
            summary.resets += 1;
        }

        let node = leaf.leaf();
        if tree.is_leaf(node) {
            let policy = Policy::from_logits(&output.policy_logits.row(row).to_vec())?;
            let priors: Vec<(usize, f32)> = policy.into_iter().enumerate().collect();
            tree.expand(
                node,
                output.value_prefixes[row],
                LatentIndex { depth, row },
                is_reset,
                &priors,
            )?;
            summary.expansions += 1;
            trace!(
                lane = leaf.lane,
                batch = leaf.batch,
                node = node.index(),
                depth,
                is_reset,
                "expanded leaf"
            );
        }

        back_propagate(
            tree,
            &leaf.path,
            stats.get_mut(leaf.lane, leaf.batch),
            output.values[row],
            config.discount,
        );
    }

    Ok(summary)
}
