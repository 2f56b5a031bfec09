//! Batched selection: one root-to-leaf descent per (lane, batch element).

use crate::config::SearchConfig;
use crate::node::{LatentIndex, NodeId};
use crate::select::select_child;
use crate::stats::MinMaxStatsGrid;
use crate::tree::Tree;
use ez_core::{EzError, Result};

/// A selected path and what the oracle needs to extend it.
#[derive(Clone, Debug)]
pub struct LeafSelection {
    pub lane: usize,
    pub batch: usize,
    /// Nodes from root to leaf, inclusive.
    pub path: Vec<NodeId>,
    /// Pool coordinates of the leaf's parent latent.
    pub parent_latent: LatentIndex,
    /// Action taken from the parent into the leaf.
    pub last_action: usize,
    /// Number of actions from the root to the leaf.
    pub search_len: usize,
}

impl LeafSelection {
    pub fn leaf(&self) -> NodeId {
        // Paths always hold at least the root.
        self.path[self.path.len() - 1]
    }
}

/// Every selection of one round, lane-major (`lane * num + batch`).
#[derive(Clone, Debug)]
pub struct Traversal {
    pub searches: usize,
    pub num: usize,
    pub leaves: Vec<LeafSelection>,
}

impl Traversal {
    pub fn len(&self) -> usize {
        self.leaves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.leaves.is_empty()
    }

    pub fn coords(&self) -> Vec<LatentIndex> {
        self.leaves.iter().map(|l| l.parent_latent).collect()
    }

    pub fn last_actions(&self) -> Vec<usize> {
        self.leaves.iter().map(|l| l.last_action).collect()
    }

    /// Search length per lane and batch element, `[searches][num]`.
    ///
    /// Always holds `searches` lanes, even when the batch is empty.
    pub fn search_lens(&self) -> Vec<Vec<usize>> {
        (0..self.searches)
            .map(|lane| {
                self.leaves[lane * self.num..(lane + 1) * self.num]
                    .iter()
                    .map(|l| l.search_len)
                    .collect()
            })
            .collect()
    }

    pub fn max_search_len(&self) -> usize {
        self.leaves.iter().map(|l| l.search_len).max().unwrap_or(0)
    }

    /// Which leaves get their recurrent memory cleared, `[searches][num]`.
    pub fn reset_flags(&self, config: &SearchConfig) -> Vec<Vec<bool>> {
        self.search_lens()
            .into_iter()
            .map(|lane| lane.into_iter().map(|len| config.is_reset_depth(len)).collect())
            .collect()
    }
}

/// Descend every tree once per lane with PUCT until an unexpanded node.
///
/// Lanes are the outer loop and batch elements the inner loop; the same
/// order is used by gathering and backpropagation. Each node passed records
/// the chosen action as its `best_action`.
///
/// # Errors
/// Returns `EzError::InvalidRoot` if a root is unexpanded or has no
/// children.
pub fn batch_traverse(
    trees: &mut [Tree],
    searches: usize,
    config: &SearchConfig,
    stats: &MinMaxStatsGrid,
) -> Result<Traversal> {
    let num = trees.len();
    let mut leaves = Vec::with_capacity(searches * num);

    for lane in 0..searches {
        for (batch, tree) in trees.iter_mut().enumerate() {
            let lane_stats = stats.get(lane, batch);

            let mut node = NodeId::ROOT;
            let mut path = vec![node];
            let mut is_root = true;
            let mut parent_q = 0.0;
            let mut last_action = None;

            while tree.get(node).expanded {
                let mean_q = tree.mean_q(node, is_root, parent_q, config.discount);
                is_root = false;
                parent_q = mean_q;

                let (action, child) = select_child(tree, node, mean_q, config, lane_stats)
                    .ok_or_else(|| {
                        EzError::InvalidRoot(format!(
                            "expanded node {} of batch element {} has no children",
                            node.index(),
                            batch
                        ))
                    })?;
                tree.get_mut(node).best_action = Some(action);

                path.push(child);
                node = child;
                last_action = Some(action);
            }

            let last_action = last_action.ok_or_else(|| {
                EzError::InvalidRoot(format!("root of batch element {} is not expanded", batch))
            })?;
            let parent = path[path.len() - 2];
            let parent_latent = tree.get(parent).latent.ok_or_else(|| {
                EzError::InvalidRoot(format!(
                    "node {} of batch element {} is expanded without a latent",
                    parent.index(),
                    batch
                ))
            })?;

            leaves.push(LeafSelection {
                lane,
                batch,
                search_len: path.len() - 1,
                path,
                parent_latent,
                last_action,
            });
        }
    }

    Ok(Traversal {
        searches,
        num,
        leaves,
    })
}
