//! Search tree node types.
//!
//! Uses arena allocation with indices: children and parent are `NodeId`s into
//! the owning `Tree`, so there are no reference cycles.

/// Index into the node arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    /// The root node is always at index 0.
    pub const ROOT: NodeId = NodeId(0);

    pub fn index(self) -> usize {
        self.0
    }
}

/// Where in the hidden-state pool a node's latent lives.
///
/// `row` is lane-major: `lane * num + batch`. Roots use depth 0 and row
/// `batch`, since depth 0 holds the root latents replicated per lane.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct LatentIndex {
    pub depth: usize,
    pub row: usize,
}

/// Statistics for a single node.
#[derive(Clone, Debug)]
pub struct NodeStats {
    /// Number of backpropagated paths that passed through this node.
    pub visit_count: u32,

    /// Sum of raw backed-up returns.
    pub value_sum: f32,

    /// Prior probability from the parent's policy.
    pub prior: f32,
}

impl NodeStats {
    pub fn new(prior: f32) -> Self {
        Self {
            visit_count: 0,
            value_sum: 0.0,
            prior,
        }
    }

    /// Mean backed-up value; 0.0 if never visited.
    pub fn mean_value(&self) -> f32 {
        if self.visit_count == 0 {
            0.0
        } else {
            self.value_sum / self.visit_count as f32
        }
    }
}

/// A node in a latent search tree.
#[derive(Clone, Debug)]
pub struct Node {
    /// Action that led to this node (None for root).
    pub action: Option<usize>,

    /// Back-reference used to walk towards the root.
    pub parent: Option<NodeId>,

    pub stats: NodeStats,

    /// Predicted value prefix (cumulative reward since the last memory
    /// reset) on entering this node. Set on expansion.
    pub value_prefix: f32,

    /// Children as (action, node_id) pairs, ascending by action.
    pub children: Vec<(usize, NodeId)>,

    pub expanded: bool,

    /// Recurrent memory was cleared when this node's latent was produced.
    pub is_reset: bool,

    /// Latent coordinates, set on expansion.
    pub latent: Option<LatentIndex>,

    /// Last action chosen by selection from this node.
    pub best_action: Option<usize>,
}

impl Node {
    /// Create a new unexpanded node.
    pub fn new(action: Option<usize>, parent: Option<NodeId>, prior: f32) -> Self {
        Self {
            action,
            parent,
            stats: NodeStats::new(prior),
            value_prefix: 0.0,
            children: Vec::new(),
            expanded: false,
            is_reset: false,
            latent: None,
            best_action: None,
        }
    }

    /// Create the root node.
    pub fn root() -> Self {
        Self::new(None, None, 1.0)
    }

    /// Mean backed-up value.
    pub fn value(&self) -> f32 {
        self.stats.mean_value()
    }
}
