//! Property-based tests for the batched search.
//!
//! Checked over random batch sizes, lane counts and oracle seeds:
//! - Root children visits sum to `num_simulations`
//! - Root visit count equals `num_simulations`
//! - Min-max normalization stays in [0, 1] over the observed range
//! - Identical inputs give identical searches
//! - Pool snapshots come back unchanged from `gather`

use ez_core::{LatentBatch, RecurrentMemory};
use ez_mcts::{
    sample_dirichlet_noise, BatchedMcts, HiddenStatePool, LatentIndex, MinMaxStats, Roots,
    SearchConfig, SyntheticOracle,
};
use ndarray::Array2;
use proptest::prelude::*;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

const HIDDEN_WIDTH: usize = 6;
const MEMORY_WIDTH: usize = 3;

// =============================================================================
// Strategies for generating test inputs
// =============================================================================

fn arb_seed() -> impl Strategy<Value = u64> {
    any::<u64>()
}

/// (num_simulations, searches) with simulations a multiple of lanes.
fn arb_budget() -> impl Strategy<Value = (usize, usize)> {
    (1usize..5, 1usize..9).prop_map(|(searches, rounds)| (searches * rounds, searches))
}

fn arb_batch() -> impl Strategy<Value = usize> {
    1usize..5
}

fn arb_actions() -> impl Strategy<Value = usize> {
    1usize..6
}

fn arb_horizon() -> impl Strategy<Value = usize> {
    1usize..6
}

// =============================================================================
// Helpers
// =============================================================================

fn root_latents(num: usize, seed: u64) -> LatentBatch {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let hidden = Array2::from_shape_fn((num, HIDDEN_WIDTH), |_| {
        rand::Rng::gen_range(&mut rng, -1.0f32..1.0)
    });
    LatentBatch::new(hidden, RecurrentMemory::zeros(num, MEMORY_WIDTH))
        .expect("root latents are well formed")
}

/// Roots with seeded logits and Dirichlet noise.
fn prepared_roots(num: usize, actions: usize, seed: u64, config: &SearchConfig) -> Roots {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut roots = Roots::with_action_space(num, actions);
    let logits: Vec<Vec<f32>> = (0..num)
        .map(|_| {
            (0..actions)
                .map(|_| rand::Rng::gen_range(&mut rng, -2.0f32..2.0))
                .collect()
        })
        .collect();
    let noises = sample_dirichlet_noise(&roots, config.root_dirichlet_alpha, &mut rng)
        .expect("alpha is valid");
    roots
        .prepare(
            config.root_exploration_fraction,
            &noises,
            &vec![0.0; num],
            &logits,
        )
        .expect("roots prepare");
    roots
}

fn run_search(
    simulations: usize,
    searches: usize,
    horizon: usize,
    num: usize,
    actions: usize,
    seed: u64,
) -> (Roots, ez_mcts::SearchSummary) {
    let config = SearchConfig {
        num_simulations: simulations,
        searches,
        horizon,
        ..Default::default()
    };
    let mut roots = prepared_roots(num, actions, seed, &config);
    let mut mcts = BatchedMcts::new(config, SyntheticOracle::new(seed, actions))
        .expect("config is valid");
    let summary = mcts
        .search(&mut roots, &root_latents(num, seed))
        .expect("search succeeds");
    (roots, summary)
}

// =============================================================================
// Visit accounting
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Every simulation adds exactly one visit below each root.
    #[test]
    fn prop_children_visits_sum_to_simulations(
        seed in arb_seed(),
        (simulations, searches) in arb_budget(),
        horizon in arb_horizon(),
        num in arb_batch(),
        actions in arb_actions()
    ) {
        let (roots, summary) = run_search(simulations, searches, horizon, num, actions, seed);

        prop_assert_eq!(summary.rounds, simulations / searches);
        for (batch, counts) in roots.distributions().iter().enumerate() {
            let total: u32 = counts.iter().sum();
            prop_assert_eq!(
                total as usize,
                simulations,
                "root {} children visits {:?} do not sum to {}",
                batch,
                counts,
                simulations
            );
        }
    }

    /// Every backed-up path passes through the root exactly once.
    #[test]
    fn prop_root_visits_equal_simulations(
        seed in arb_seed(),
        (simulations, searches) in arb_budget(),
        num in arb_batch(),
        actions in arb_actions()
    ) {
        let (roots, _) = run_search(simulations, searches, 5, num, actions, seed);

        for tree in roots.trees() {
            prop_assert_eq!(tree.root().stats.visit_count as usize, simulations);
        }
    }

    /// Resets are counted only for leaves at a multiple of the horizon.
    #[test]
    fn prop_no_resets_below_horizon(
        seed in arb_seed(),
        (simulations, searches) in arb_budget(),
        num in arb_batch(),
        actions in arb_actions()
    ) {
        let (_, summary) = run_search(simulations, searches, 5, num, actions, seed);

        if summary.max_search_len < 5 {
            prop_assert_eq!(summary.resets, 0);
        }
        prop_assert!(summary.max_search_len <= summary.rounds);
    }
}

// =============================================================================
// Normalization
// =============================================================================

proptest! {
    /// Values inside the observed range normalize into [0, 1].
    #[test]
    fn prop_normalize_in_unit_range(
        values in prop::collection::vec(-100.0f32..100.0, 2..20),
        pick in any::<prop::sample::Index>(),
        value_delta_max in 0.0f32..1.0
    ) {
        let mut stats = MinMaxStats::new(value_delta_max);
        for &v in &values {
            stats.update(v);
        }
        let v = values[pick.index(values.len())];

        if stats.max() > stats.min() {
            let normalized = stats.normalize(v);
            prop_assert!(
                (0.0..=1.0).contains(&normalized),
                "normalize({}) = {} outside [0, 1] for range [{}, {}]",
                v,
                normalized,
                stats.min(),
                stats.max()
            );
        } else {
            prop_assert_eq!(stats.normalize(v), v);
        }
    }

    /// Trackers left by a search respect min <= max.
    #[test]
    fn prop_search_trackers_ordered(
        seed in arb_seed(),
        (simulations, searches) in arb_budget(),
        num in arb_batch()
    ) {
        let (_, summary) = run_search(simulations, searches, 5, num, 3, seed);

        for lane in 0..searches {
            for batch in 0..num {
                let tracker = summary.stats.get(lane, batch);
                prop_assert!(!tracker.is_empty());
                prop_assert!(tracker.min() <= tracker.max());
            }
        }
    }
}

// =============================================================================
// Determinism
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Same seed, config and roots give the same tree statistics.
    #[test]
    fn prop_search_deterministic(
        seed in arb_seed(),
        (simulations, searches) in arb_budget(),
        num in arb_batch(),
        actions in arb_actions()
    ) {
        let (first, first_summary) = run_search(simulations, searches, 3, num, actions, seed);
        let (second, second_summary) = run_search(simulations, searches, 3, num, actions, seed);

        prop_assert_eq!(first.distributions(), second.distributions());
        prop_assert_eq!(first.trajectories(), second.trajectories());
        prop_assert_eq!(first.values(), second.values());
        prop_assert_eq!(first_summary.expansions, second_summary.expansions);
        prop_assert_eq!(first_summary.resets, second_summary.resets);
    }
}

// =============================================================================
// Pool round-trip
// =============================================================================

proptest! {
    /// A published snapshot is returned row for row by `gather`.
    #[test]
    fn prop_pool_gather_returns_appended_rows(
        seed in arb_seed(),
        searches in 1usize..4,
        num in 1usize..4,
        depths in 1usize..5
    ) {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let mut random = |rows: usize, cols: usize| {
            Array2::from_shape_fn((rows, cols), |_| rand::Rng::gen_range(&mut rng, -1.0f32..1.0))
        };

        let roots = LatentBatch::new(
            random(num, HIDDEN_WIDTH),
            RecurrentMemory::new(random(num, MEMORY_WIDTH), random(num, MEMORY_WIDTH)).unwrap(),
        )
        .unwrap();
        let mut pool = HiddenStatePool::new(&roots, searches).unwrap();

        let rows = searches * num;
        let mut published = Vec::new();
        for depth in 1..=depths {
            let snapshot = LatentBatch::new(
                random(rows, HIDDEN_WIDTH),
                RecurrentMemory::new(random(rows, MEMORY_WIDTH), random(rows, MEMORY_WIDTH)).unwrap(),
            )
            .unwrap();
            pool.append(depth, snapshot.clone()).unwrap();
            published.push(snapshot);
        }

        for (i, snapshot) in published.iter().enumerate() {
            let coords: Vec<LatentIndex> = (0..rows)
                .rev()
                .map(|row| LatentIndex { depth: i + 1, row })
                .collect();
            let gathered = pool.gather(&coords).unwrap();
            for (out_row, coord) in coords.iter().enumerate() {
                prop_assert_eq!(
                    gathered.hidden_states.row(out_row),
                    snapshot.hidden_states.row(coord.row)
                );
                prop_assert_eq!(
                    gathered.memory.cell.row(out_row),
                    snapshot.memory.cell.row(coord.row)
                );
                prop_assert_eq!(
                    gathered.memory.hidden.row(out_row),
                    snapshot.memory.hidden.row(coord.row)
                );
            }
        }
    }
}
