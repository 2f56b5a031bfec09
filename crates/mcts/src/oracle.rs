//! Deterministic stand-ins for the learned model.
//!
//! - `ConstantOracle` returns fixed values and records every request, for
//!   tests that need to inspect what the search sent.
//! - `SyntheticOracle` is a seeded pseudo-model whose outputs depend only on
//!   the request rows, for benchmarks and reproducibility checks.

use ez_core::{InferenceOracle, OracleBatch, OracleOutput, RecurrentMemory, Result};
use ndarray::Array2;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Oracle returning the same value, value prefix and logits for every row.
///
/// Next hidden states and memory are the inputs plus one, so repeated
/// transitions stay distinguishable and memory is non-zero unless reset.
#[derive(Clone, Debug)]
pub struct ConstantOracle {
    value: f32,
    value_prefix: f32,
    policy_logits: Vec<f32>,
    calls: usize,
    requests: Vec<OracleBatch>,
}

impl ConstantOracle {
    pub fn new(value: f32, value_prefix: f32, policy_logits: Vec<f32>) -> Self {
        Self {
            value,
            value_prefix,
            policy_logits,
            calls: 0,
            requests: Vec::new(),
        }
    }

    /// Number of `evaluate` calls so far.
    pub fn calls(&self) -> usize {
        self.calls
    }

    /// Every request received, in call order.
    pub fn requests(&self) -> &[OracleBatch] {
        &self.requests
    }
}

impl InferenceOracle for ConstantOracle {
    fn evaluate(&mut self, batch: &OracleBatch) -> Result<OracleOutput> {
        self.calls += 1;
        self.requests.push(batch.clone());

        let rows = batch.len();
        let logits = Array2::from_shape_fn((rows, self.policy_logits.len()), |(_, a)| {
            self.policy_logits[a]
        });
        let memory = &batch.latents.memory;

        Ok(OracleOutput {
            next_hidden_states: &batch.latents.hidden_states + 1.0,
            value_prefixes: vec![self.value_prefix; rows],
            values: vec![self.value; rows],
            policy_logits: logits,
            next_memory: RecurrentMemory::new(&memory.cell + 1.0, &memory.hidden + 1.0)?,
        })
    }
}

/// Seeded pseudo-model.
///
/// Each output row is a pure function of the seed, the input row and the
/// action, so identical requests always get identical answers. The value
/// prefix accumulates through the first memory column the way a recurrent
/// reward predictor would, and restarts from zero after a memory reset.
#[derive(Clone, Debug)]
pub struct SyntheticOracle {
    seed: u64,
    num_actions: usize,
    calls: usize,
}

impl SyntheticOracle {
    pub fn new(seed: u64, num_actions: usize) -> Self {
        Self {
            seed,
            num_actions,
            calls: 0,
        }
    }

    pub fn calls(&self) -> usize {
        self.calls
    }

    /// Fold the action and every input value into the seed, reseeding once
    /// per value.
    fn row_rng(&self, hidden: &[f32], memory: &[f32], action: usize) -> ChaCha8Rng {
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        rng = ChaCha8Rng::seed_from_u64(rng.gen::<u64>() ^ action as u64);
        for x in hidden.iter().chain(memory) {
            rng = ChaCha8Rng::seed_from_u64(rng.gen::<u64>() ^ u64::from(x.to_bits()));
        }
        rng
    }
}

impl InferenceOracle for SyntheticOracle {
    fn evaluate(&mut self, batch: &OracleBatch) -> Result<OracleOutput> {
        self.calls += 1;

        let rows = batch.len();
        let latents = &batch.latents;
        let hidden_width = latents.hidden_width();
        let memory_width = latents.memory_width();

        let mut next_hidden = Array2::zeros((rows, hidden_width));
        let mut logits = Array2::zeros((rows, self.num_actions));
        let mut cell = Array2::zeros((rows, memory_width));
        let mut memory_hidden = Array2::zeros((rows, memory_width));
        let mut value_prefixes = Vec::with_capacity(rows);
        let mut values = Vec::with_capacity(rows);

        for row in 0..rows {
            let hidden = latents.hidden_states.row(row).to_vec();
            let prev_cell = latents.memory.cell.row(row).to_vec();
            let prev_hidden = latents.memory.hidden.row(row).to_vec();
            let mut rng = self.row_rng(&hidden, &prev_hidden, batch.last_actions[row]);

            for (i, x) in hidden.iter().enumerate() {
                next_hidden[[row, i]] = (0.5 * x + rng.gen_range(-1.0f32..1.0)).tanh();
            }
            for a in 0..self.num_actions {
                logits[[row, a]] = rng.gen_range(-2.0f32..2.0);
            }

            let reward = rng.gen_range(0.0f32..1.0);
            let prefix = prev_hidden.first().copied().unwrap_or(0.0) + reward;
            value_prefixes.push(prefix);
            values.push(rng.gen_range(-1.0f32..1.0));

            for i in 0..memory_width {
                cell[[row, i]] = (prev_cell[i] + rng.gen_range(-0.1f32..0.1)).tanh();
                memory_hidden[[row, i]] = if i == 0 {
                    prefix
                } else {
                    rng.gen_range(-1.0f32..1.0)
                };
            }
        }

        Ok(OracleOutput {
            next_hidden_states: next_hidden,
            value_prefixes,
            values,
            policy_logits: logits,
            next_memory: RecurrentMemory::new(cell, memory_hidden)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ez_core::LatentBatch;

    fn batch(rows: usize) -> OracleBatch {
        let latents = LatentBatch::new(
            Array2::from_shape_fn((rows, 3), |(r, c)| (r * 3 + c) as f32 * 0.1),
            RecurrentMemory::zeros(rows, 2),
        )
        .unwrap();
        OracleBatch {
            latents,
            last_actions: (0..rows).collect(),
        }
    }

    #[test]
    fn test_constant_oracle_shapes_and_recording() {
        let mut oracle = ConstantOracle::new(1.0, 0.5, vec![0.0, 1.0, 2.0]);
        let out = oracle.evaluate(&batch(4)).unwrap();

        assert!(out.validate(4, 3, 2).is_ok());
        assert_eq!(out.num_actions(), 3);
        assert_eq!(out.values, vec![1.0; 4]);
        assert_eq!(out.policy_logits[[2, 1]], 1.0);
        assert_eq!(out.next_memory.cell[[0, 0]], 1.0);
        assert!((out.next_hidden_states[[1, 0]] - 1.3).abs() < 1e-6);
        assert_eq!(oracle.calls(), 1);
        assert_eq!(oracle.requests()[0].last_actions, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_synthetic_oracle_is_deterministic() {
        let mut a = SyntheticOracle::new(42, 5);
        let mut b = SyntheticOracle::new(42, 5);
        let out_a = a.evaluate(&batch(3)).unwrap();
        let out_b = b.evaluate(&batch(3)).unwrap();

        assert!(out_a.validate(3, 3, 2).is_ok());
        assert_eq!(out_a.values, out_b.values);
        assert_eq!(out_a.policy_logits, out_b.policy_logits);
        assert_eq!(out_a.next_memory, out_b.next_memory);
    }

    #[test]
    fn test_synthetic_oracle_depends_on_seed() {
        let out_a = SyntheticOracle::new(1, 5).evaluate(&batch(2)).unwrap();
        let out_b = SyntheticOracle::new(2, 5).evaluate(&batch(2)).unwrap();
        assert_ne!(out_a.values, out_b.values);
    }

    #[test]
    fn test_synthetic_oracle_depends_on_action_and_input() {
        let mut oracle = SyntheticOracle::new(9, 4);
        let base = oracle.evaluate(&batch(1)).unwrap();

        let mut other_action = batch(1);
        other_action.last_actions = vec![3];
        let by_action = oracle.evaluate(&other_action).unwrap();
        assert_ne!(base.values, by_action.values);

        let mut other_input = batch(1);
        other_input.latents.hidden_states[[0, 2]] = 0.75;
        let by_input = oracle.evaluate(&other_input).unwrap();
        assert_ne!(base.values, by_input.values);
    }

    #[test]
    fn test_synthetic_prefix_accumulates_from_memory() {
        let mut oracle = SyntheticOracle::new(3, 2);
        let first = oracle.evaluate(&batch(1)).unwrap();
        assert!(first.value_prefixes[0] >= 0.0 && first.value_prefixes[0] < 1.0);
        assert_eq!(first.next_memory.hidden[[0, 0]], first.value_prefixes[0]);

        let next = OracleBatch {
            latents: LatentBatch::new(first.next_hidden_states.clone(), first.next_memory.clone())
                .unwrap(),
            last_actions: vec![1],
        };
        let second = oracle.evaluate(&next).unwrap();
        assert!(second.value_prefixes[0] >= first.value_prefixes[0]);
    }
}
