//! PUCT child selection.

use crate::config::SearchConfig;
use crate::node::NodeId;
use crate::stats::MinMaxStats;
use crate::tree::Tree;

/// PUCT score of `child` under `parent`.
///
/// score = v + p * sqrt(N) / (1 + n) * (pb_c_init + ln((N + pb_c_base + 1) / pb_c_base))
///
/// where `N` is the total visit count of the parent's children and `v` is
/// the child's Q (or `parent_mean_q` if unvisited), min-max normalized and
/// clamped to [0, 1].
pub fn ucb_score(
    tree: &Tree,
    parent: NodeId,
    child: NodeId,
    parent_mean_q: f32,
    total_children_visits: u32,
    config: &SearchConfig,
    stats: &MinMaxStats,
) -> f32 {
    let node = tree.get(child);
    let parent_visits = total_children_visits as f32;

    let pb_c = ((parent_visits + config.pb_c_base + 1.0) / config.pb_c_base).ln()
        + config.pb_c_init;
    let prior_score =
        pb_c * parent_visits.sqrt() / (node.stats.visit_count as f32 + 1.0) * node.stats.prior;

    let raw_value = if node.stats.visit_count == 0 {
        parent_mean_q
    } else {
        debug_assert_eq!(node.parent, Some(parent));
        tree.q_value(child, config.discount)
    };
    let value_score = stats.normalize(raw_value).clamp(0.0, 1.0);

    prior_score + value_score
}

/// Pick the action with the highest PUCT score.
///
/// Ties go to the lowest action index. Returns `None` if `id` has no
/// children.
pub fn select_child(
    tree: &Tree,
    id: NodeId,
    mean_q: f32,
    config: &SearchConfig,
    stats: &MinMaxStats,
) -> Option<(usize, NodeId)> {
    let total_children_visits = tree.children_visits(id);

    let mut best: Option<(usize, NodeId)> = None;
    let mut best_score = f32::NEG_INFINITY;

    // Children are stored in ascending action order, so a strict comparison
    // keeps the lowest action on ties.
    for &(action, child) in &tree.get(id).children {
        let score = ucb_score(tree, id, child, mean_q, total_children_visits, config, stats);
        if best.is_none() || score > best_score {
            best_score = score;
            best = Some((action, child));
        }
    }

    best
}
