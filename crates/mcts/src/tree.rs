//! Arena-allocated search tree, one per batch element.
//!
//! Nodes are stored in a contiguous vector and referenced by index. Nodes
//! are never removed during a search; the whole arena is dropped with the
//! tree.

use crate::node::{LatentIndex, Node, NodeId};
use ez_core::{EzError, Result};

#[derive(Clone, Debug)]
pub struct Tree {
    nodes: Vec<Node>,
}

impl Tree {
    /// Create a new tree with an unexpanded root node.
    pub fn new() -> Self {
        Self {
            nodes: vec![Node::root()],
        }
    }

    /// # Panics
    /// Panics if the NodeId is invalid.
    pub fn get(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    /// # Panics
    /// Panics if the NodeId is invalid.
    pub fn get_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.0]
    }

    fn add(&mut self, node: Node) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(node);
        id
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Check if the tree is empty (never true, the root always exists).
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn root(&self) -> &Node {
        self.get(NodeId::ROOT)
    }

    pub fn root_mut(&mut self) -> &mut Node {
        self.get_mut(NodeId::ROOT)
    }

    pub fn is_leaf(&self, id: NodeId) -> bool {
        !self.get(id).expanded
    }

    /// Expand a node: record its value prefix, latent coordinates and reset
    /// flag, and create one unvisited child per `(action, prior)` pair.
    ///
    /// # Errors
    /// Returns `EzError::AlreadyExpanded` if the node was expanded before,
    /// and `EzError::InvalidPolicy` if an action appears twice.
    pub fn expand(
        &mut self,
        id: NodeId,
        value_prefix: f32,
        latent: LatentIndex,
        is_reset: bool,
        priors: &[(usize, f32)],
    ) -> Result<()> {
        if self.get(id).expanded {
            return Err(EzError::AlreadyExpanded { node: id.0 });
        }

        let mut priors = priors.to_vec();
        priors.sort_by_key(|(action, _)| *action);
        if let Some(pair) = priors.windows(2).find(|pair| pair[0].0 == pair[1].0) {
            return Err(EzError::InvalidPolicy(format!(
                "action {} appears twice when expanding node {}",
                pair[0].0, id.0
            )));
        }

        let mut children = Vec::with_capacity(priors.len());
        for (action, prior) in priors {
            let child_id = self.add(Node::new(Some(action), Some(id), prior));
            children.push((action, child_id));
        }

        let node = self.get_mut(id);
        node.value_prefix = value_prefix;
        node.latent = Some(latent);
        node.is_reset = is_reset;
        node.children = children;
        node.expanded = true;
        Ok(())
    }

    /// Child reached from `id` by `action`, if expanded with that action.
    pub fn child(&self, id: NodeId, action: usize) -> Option<NodeId> {
        self.get(id)
            .children
            .iter()
            .find(|(a, _)| *a == action)
            .map(|(_, child)| *child)
    }

    /// Total visits over the children of `id`.
    pub fn children_visits(&self, id: NodeId) -> u32 {
        self.get(id)
            .children
            .iter()
            .map(|(_, child)| self.get(*child).stats.visit_count)
            .sum()
    }

    /// Reward of the transition into `id`.
    ///
    /// Value prefixes accumulate since the last memory reset, so the reward
    /// is the difference to the parent's prefix unless the parent's memory
    /// was reset, in which case the prefix itself is the reward.
    pub fn reward(&self, id: NodeId) -> f32 {
        let node = self.get(id);
        match node.parent {
            Some(parent_id) => {
                let parent = self.get(parent_id);
                if parent.is_reset {
                    node.value_prefix
                } else {
                    node.value_prefix - parent.value_prefix
                }
            }
            None => node.value_prefix,
        }
    }

    /// Q-value of `id` seen from its parent.
    pub fn q_value(&self, id: NodeId, discount: f32) -> f32 {
        self.reward(id) + discount * self.get(id).value()
    }

    /// Mean Q over the visited children of `id`, used as the value estimate
    /// for unvisited children.
    ///
    /// At the root this is the plain mean when some child was visited;
    /// elsewhere `parent_q` enters as one extra sample.
    pub fn mean_q(&self, id: NodeId, is_root: bool, parent_q: f32, discount: f32) -> f32 {
        let mut total_q = 0.0;
        let mut visited = 0u32;
        for (_, child) in &self.get(id).children {
            if self.get(*child).stats.visit_count > 0 {
                total_q += self.q_value(*child, discount);
                visited += 1;
            }
        }

        if is_root && visited > 0 {
            total_q / visited as f32
        } else {
            (parent_q + total_q) / (visited + 1) as f32
        }
    }

    /// Visit count of each root child, in ascending action order.
    pub fn distribution(&self) -> Vec<(usize, u32)> {
        self.root()
            .children
            .iter()
            .map(|(action, child)| (*action, self.get(*child).stats.visit_count))
            .collect()
    }

    /// Chain of the most recently selected actions, starting at the root.
    pub fn trajectory(&self) -> Vec<usize> {
        let mut actions = Vec::new();
        let mut current = NodeId::ROOT;
        while let Some(action) = self.get(current).best_action {
            actions.push(action);
            match self.child(current, action) {
                Some(next) => current = next,
                None => break,
            }
        }
        actions
    }
}

impl Default for Tree {
    fn default() -> Self {
        Self::new()
    }
}
