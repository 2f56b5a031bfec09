//! Batched search driver.
//!
//! One `search()` call runs `num_simulations / searches` rounds over every
//! root at once. Each round selects one leaf per (lane, batch element),
//! sends all of them to the oracle in a single request, publishes the new
//! latents at the next pool depth and backs the values up.

use crate::{
    backprop::batch_backpropagate,
    config::SearchConfig,
    pool::HiddenStatePool,
    roots::Roots,
    stats::MinMaxStatsGrid,
    traverse::batch_traverse,
};
use ez_core::{EzError, InferenceOracle, LatentBatch, OracleBatch, Result};
use tracing::{debug, info_span, warn};

/// Counters from one `search()` call, plus the final min-max trackers.
#[derive(Clone, Debug)]
pub struct SearchSummary {
    /// Rounds executed.
    pub rounds: usize,
    /// Deepest leaf selected, in actions from the root.
    pub max_search_len: usize,
    /// Leaves expanded with oracle output.
    pub expansions: usize,
    /// Leaves whose recurrent memory was cleared.
    pub resets: usize,
    /// Total nodes across all trees.
    pub nodes: usize,
    pub stats: MinMaxStatsGrid,
}

/// Batched MCTS over latent states.
///
/// Generic over the oracle so stub oracles and model-backed ones share the
/// same driver.
pub struct BatchedMcts<O: InferenceOracle> {
    config: SearchConfig,
    oracle: O,
}

impl<O: InferenceOracle> BatchedMcts<O> {
    /// # Errors
    /// Returns `EzError::Config` if `config` is invalid.
    pub fn new(config: SearchConfig, oracle: O) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, oracle })
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    pub fn oracle(&self) -> &O {
        &self.oracle
    }

    /// Run every round of the search over `roots`.
    ///
    /// `roots` must be freshly prepared (expanded, no visits) and
    /// `root_latents` must hold one row per root. On return each root's
    /// children visits sum to `num_simulations`.
    ///
    /// # Errors
    /// Root or shape problems are reported before the first round. An oracle
    /// error or malformed oracle output aborts the remaining rounds and is
    /// returned as is; the trees then hold a partial search.
    pub fn search(&mut self, roots: &mut Roots, root_latents: &LatentBatch) -> Result<SearchSummary> {
        let num = roots.num();
        let searches = self.config.searches;
        let rounds = self.config.rounds();

        let span = info_span!("search", num, searches, rounds);
        let _enter = span.enter();

        if root_latents.rows() != num {
            return Err(EzError::ShapeMismatch {
                what: "root latents",
                expected: num,
                actual: root_latents.rows(),
            });
        }
        if let Some(batch) = roots
            .trees()
            .iter()
            .position(|tree| tree.root().stats.visit_count > 0)
        {
            return Err(EzError::InvalidRoot(format!(
                "root {} was already searched; clear and prepare it again",
                batch
            )));
        }

        let mut pool = HiddenStatePool::new(root_latents, searches)?;
        let mut stats = MinMaxStatsGrid::new(searches, num, self.config.value_delta_max);
        let mut max_search_len = 0;
        let mut expansions = 0;
        let mut resets = 0;

        for round in 0..rounds {
            let traversal = batch_traverse(roots.trees_mut(), searches, &self.config, &stats)?;
            let batch = OracleBatch {
                latents: pool.gather(&traversal.coords())?,
                last_actions: traversal.last_actions(),
            };

            let mut output = self.oracle.evaluate(&batch).map_err(|e| {
                warn!(round, error = %e, "oracle failed, aborting search");
                e
            })?;
            if let Err(e) = output.validate(batch.len(), pool.hidden_width(), pool.memory_width()) {
                warn!(round, error = %e, "malformed oracle output, aborting search");
                return Err(e);
            }

            let reset_flags = traversal.reset_flags(&self.config);
            let mask: Vec<bool> = reset_flags.iter().flatten().copied().collect();
            output.next_memory.zero_rows(&mask)?;

            let depth = pool.depth();
            let round_summary = batch_backpropagate(
                roots.trees_mut(),
                &traversal,
                depth,
                &output,
                &reset_flags,
                &self.config,
                &mut stats,
            )?;
            pool.append(
                depth,
                LatentBatch::new(output.next_hidden_states, output.next_memory)?,
            )?;

            debug!(
                round,
                max_search_len = traversal.max_search_len(),
                expansions = round_summary.expansions,
                resets = round_summary.resets,
                "round complete"
            );
            max_search_len = max_search_len.max(traversal.max_search_len());
            expansions += round_summary.expansions;
            resets += round_summary.resets;
        }

        Ok(SearchSummary {
            rounds,
            max_search_len,
            expansions,
            resets,
            nodes: roots.trees().iter().map(|tree| tree.len()).sum(),
            stats,
        })
    }
}
