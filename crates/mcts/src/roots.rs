//! Batch of root trees prepared by the caller before a search.
//!
//! Roots are expanded from the representation network's output: a value
//! prefix and policy logits per batch element, optionally mixed with
//! Dirichlet exploration noise.

use crate::node::{LatentIndex, NodeId};
use crate::stats::MinMaxStatsGrid;
use crate::tree::Tree;
use ez_core::{EzError, Policy, Result};
use rand::Rng;
use rand_distr::{Dirichlet, Distribution};
use serde::Serialize;

/// Search output for one root.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RootResult {
    /// Child visit counts as `(action, visits)`, ascending by action.
    pub visit_counts: Vec<(usize, u32)>,
    /// Mean backed-up value of the root.
    pub value: f32,
    pub trajectory: Vec<usize>,
    /// Min-max normalized Q of each child under lane 0's tracker, aligned
    /// with `visit_counts`. Unvisited children get 0.
    pub normalized_q: Vec<f32>,
}

/// Root trees for one batched search, one per batch element.
#[derive(Clone, Debug)]
pub struct Roots {
    trees: Vec<Tree>,
    legal_actions: Vec<Vec<usize>>,
}

impl Roots {
    /// Create unexpanded roots with the given legal actions per element.
    pub fn new(legal_actions: Vec<Vec<usize>>) -> Self {
        Self {
            trees: vec![Tree::new(); legal_actions.len()],
            legal_actions,
        }
    }

    /// Create `num` roots where every action in `0..action_space` is legal.
    pub fn with_action_space(num: usize, action_space: usize) -> Self {
        Self::new(vec![(0..action_space).collect(); num])
    }

    /// Number of batch elements.
    pub fn num(&self) -> usize {
        self.trees.len()
    }

    pub fn legal_actions(&self, batch: usize) -> &[usize] {
        &self.legal_actions[batch]
    }

    pub fn trees(&self) -> &[Tree] {
        &self.trees
    }

    pub fn trees_mut(&mut self) -> &mut [Tree] {
        &mut self.trees
    }

    /// Expand every root with softmax priors over its legal actions, mixed
    /// with `noises` as `prior * (1 - fraction) + noise * fraction`.
    ///
    /// `policy_logits[b]` is indexed by action id; `noises[b]` is aligned
    /// with `legal_actions(b)`.
    ///
    /// # Errors
    /// `EzError::InvalidRoot` on shape mismatch or an empty legal set,
    /// `EzError::AlreadyExpanded` if prepared twice without `clear`.
    pub fn prepare(
        &mut self,
        exploration_fraction: f32,
        noises: &[Vec<f32>],
        value_prefixes: &[f32],
        policy_logits: &[Vec<f32>],
    ) -> Result<()> {
        if noises.len() != self.num() {
            return Err(EzError::InvalidRoot(format!(
                "expected noise for {} roots, got {}",
                self.num(),
                noises.len()
            )));
        }
        self.expand_all(value_prefixes, policy_logits, |batch, legal, priors| {
            let noise = &noises[batch];
            if noise.len() != legal.len() {
                return Err(EzError::InvalidRoot(format!(
                    "root {} has {} legal actions but {} noise values",
                    batch,
                    legal.len(),
                    noise.len()
                )));
            }
            for (prior, n) in priors.iter_mut().zip(noise) {
                *prior = *prior * (1.0 - exploration_fraction) + n * exploration_fraction;
            }
            Ok(())
        })
    }

    /// Expand every root with softmax priors over its legal actions.
    pub fn prepare_no_noise(
        &mut self,
        value_prefixes: &[f32],
        policy_logits: &[Vec<f32>],
    ) -> Result<()> {
        self.expand_all(value_prefixes, policy_logits, |_, _, _| Ok(()))
    }

    fn expand_all<F>(
        &mut self,
        value_prefixes: &[f32],
        policy_logits: &[Vec<f32>],
        mut adjust: F,
    ) -> Result<()>
    where
        F: FnMut(usize, &[usize], &mut [f32]) -> Result<()>,
    {
        if value_prefixes.len() != self.num() || policy_logits.len() != self.num() {
            return Err(EzError::InvalidRoot(format!(
                "expected {} roots, got {} value prefixes and {} policies",
                self.num(),
                value_prefixes.len(),
                policy_logits.len()
            )));
        }

        for (batch, tree) in self.trees.iter_mut().enumerate() {
            let legal = &self.legal_actions[batch];
            if legal.is_empty() {
                return Err(EzError::InvalidRoot(format!(
                    "root {} has no legal actions",
                    batch
                )));
            }
            let mut sorted = legal.clone();
            sorted.sort_unstable();
            if let Some(pair) = sorted.windows(2).find(|pair| pair[0] == pair[1]) {
                return Err(EzError::InvalidRoot(format!(
                    "root {} lists legal action {} twice",
                    batch, pair[0]
                )));
            }

            let mut priors = Policy::from_masked_logits(&policy_logits[batch], legal)?.into_inner();
            adjust(batch, legal, &mut priors)?;

            let pairs: Vec<(usize, f32)> = legal.iter().copied().zip(priors).collect();
            tree.expand(
                NodeId::ROOT,
                value_prefixes[batch],
                LatentIndex {
                    depth: 0,
                    row: batch,
                },
                false,
                &pairs,
            )?;
        }
        Ok(())
    }

    /// Drop all search state, keeping the legal action sets.
    pub fn clear(&mut self) {
        for tree in &mut self.trees {
            *tree = Tree::new();
        }
    }

    /// Child visit counts per root, in ascending action order.
    pub fn distributions(&self) -> Vec<Vec<u32>> {
        self.trees
            .iter()
            .map(|tree| tree.distribution().into_iter().map(|(_, n)| n).collect())
            .collect()
    }

    /// Mean backed-up value per root.
    pub fn values(&self) -> Vec<f32> {
        self.trees.iter().map(|tree| tree.root().value()).collect()
    }

    /// Most recently selected action chain per root.
    pub fn trajectories(&self) -> Vec<Vec<usize>> {
        self.trees.iter().map(Tree::trajectory).collect()
    }

    /// Bundle visit counts, values, trajectories and normalized child Q.
    ///
    /// `stats` are the trackers of the search that produced these trees.
    pub fn results(&self, stats: &MinMaxStatsGrid, discount: f32) -> Vec<RootResult> {
        self.trees
            .iter()
            .enumerate()
            .map(|(batch, tree)| {
                let tracker = stats.get(0, batch);
                let normalized_q = tree
                    .root()
                    .children
                    .iter()
                    .map(|(_, child)| {
                        if tree.get(*child).stats.visit_count == 0 {
                            0.0
                        } else {
                            tracker.normalize(tree.q_value(*child, discount))
                        }
                    })
                    .collect();
                RootResult {
                    visit_counts: tree.distribution(),
                    value: tree.root().value(),
                    trajectory: tree.trajectory(),
                    normalized_q,
                }
            })
            .collect()
    }
}

/// Sample one Dirichlet noise vector per root, sized to its legal actions.
///
/// A root with a single legal action gets `[1.0]`.
///
/// # Errors
/// Returns `EzError::Config` if `alpha` is not a valid concentration.
pub fn sample_dirichlet_noise<R: Rng>(
    roots: &Roots,
    alpha: f32,
    rng: &mut R,
) -> Result<Vec<Vec<f32>>> {
    (0..roots.num())
        .map(|batch| {
            let n = roots.legal_actions(batch).len();
            if n < 2 {
                return Ok(vec![1.0; n]);
            }
            let dirichlet = Dirichlet::new(&vec![alpha; n])
                .map_err(|e| EzError::Config(format!("dirichlet alpha {}: {}", alpha, e)))?;
            Ok(dirichlet.sample(rng))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn test_prepare_no_noise_uses_masked_softmax() {
        let mut roots = Roots::new(vec![vec![0, 2], vec![1]]);
        roots
            .prepare_no_noise(&[0.0, 0.5], &[vec![0.0, 9.0, 0.0], vec![0.0, 0.0, 0.0]])
            .unwrap();

        let tree = &roots.trees()[0];
        assert!(tree.root().expanded);
        let priors: Vec<f32> = tree
            .root()
            .children
            .iter()
            .map(|(_, c)| tree.get(*c).stats.prior)
            .collect();
        assert_eq!(priors.len(), 2);
        assert!((priors[0] - 0.5).abs() < 1e-6);

        let second = &roots.trees()[1];
        assert_eq!(second.root().children.len(), 1);
        assert!((second.root().value_prefix - 0.5).abs() < 1e-6);
        assert_eq!(second.root().latent, Some(LatentIndex { depth: 0, row: 1 }));
        assert_eq!(second.root().stats.visit_count, 0);
    }

    #[test]
    fn test_prepare_mixes_noise() {
        let mut roots = Roots::with_action_space(1, 2);
        roots
            .prepare(0.25, &[vec![1.0, 0.0]], &[0.0], &[vec![0.0, 0.0]])
            .unwrap();
        let tree = &roots.trees()[0];
        let first = tree.child(NodeId::ROOT, 0).unwrap();
        let second = tree.child(NodeId::ROOT, 1).unwrap();
        assert!((tree.get(first).stats.prior - 0.625).abs() < 1e-6);
        assert!((tree.get(second).stats.prior - 0.375).abs() < 1e-6);
    }

    #[test]
    fn test_prepare_shape_errors() {
        let mut roots = Roots::with_action_space(2, 2);
        assert!(matches!(
            roots.prepare_no_noise(&[0.0], &[vec![0.0, 0.0]]),
            Err(EzError::InvalidRoot(_))
        ));
        assert!(matches!(
            roots.prepare(0.25, &[vec![0.5], vec![0.5, 0.5]], &[0.0, 0.0], &[vec![0.0; 2], vec![0.0; 2]]),
            Err(EzError::InvalidRoot(_))
        ));
    }

    #[test]
    fn test_empty_legal_set_rejected() {
        let mut roots = Roots::new(vec![vec![]]);
        let err = roots.prepare_no_noise(&[0.0], &[vec![0.0]]).unwrap_err();
        assert!(matches!(err, EzError::InvalidRoot(_)));
    }

    #[test]
    fn test_duplicate_legal_action_rejected() {
        let mut roots = Roots::new(vec![vec![0, 2], vec![1, 1]]);
        let err = roots
            .prepare_no_noise(&[0.0, 0.0], &[vec![0.0; 3], vec![0.0; 3]])
            .unwrap_err();
        assert!(matches!(err, EzError::InvalidRoot(ref msg) if msg.contains("action 1 twice")));
        assert!(roots.trees()[1].is_leaf(NodeId::ROOT));
    }

    #[test]
    fn test_prepare_twice_requires_clear() {
        let mut roots = Roots::with_action_space(1, 2);
        roots.prepare_no_noise(&[0.0], &[vec![0.0, 0.0]]).unwrap();
        assert!(matches!(
            roots.prepare_no_noise(&[0.0], &[vec![0.0, 0.0]]),
            Err(EzError::AlreadyExpanded { .. })
        ));
        roots.clear();
        assert!(roots.prepare_no_noise(&[0.0], &[vec![0.0, 0.0]]).is_ok());
    }

    #[test]
    fn test_results_before_search() {
        let mut roots = Roots::with_action_space(2, 3);
        roots
            .prepare_no_noise(&[0.0, 0.0], &[vec![0.0; 3], vec![0.0; 3]])
            .unwrap();
        let stats = MinMaxStatsGrid::new(2, 2, 0.01);

        let results = roots.results(&stats, 0.997);
        assert_eq!(results.len(), 2);
        assert_eq!(results[1].visit_counts, vec![(0, 0), (1, 0), (2, 0)]);
        assert_eq!(results[1].normalized_q, vec![0.0; 3]);
        assert!(results[0].trajectory.is_empty());
        assert_eq!(roots.distributions(), vec![vec![0, 0, 0]; 2]);
    }

    #[test]
    fn test_dirichlet_noise_shapes() {
        let roots = Roots::new(vec![vec![0, 1, 2], vec![4]]);
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let noises = sample_dirichlet_noise(&roots, 0.3, &mut rng).unwrap();
        assert_eq!(noises[0].len(), 3);
        assert!((noises[0].iter().sum::<f32>() - 1.0).abs() < 1e-4);
        assert_eq!(noises[1], vec![1.0]);
    }

    #[test]
    fn test_dirichlet_noise_is_seeded() {
        let roots = Roots::with_action_space(2, 4);
        let a = sample_dirichlet_noise(&roots, 0.3, &mut ChaCha8Rng::seed_from_u64(1)).unwrap();
        let b = sample_dirichlet_noise(&roots, 0.3, &mut ChaCha8Rng::seed_from_u64(1)).unwrap();
        assert_eq!(a, b);
    }
}
