//! Shared types for batched latent-space MCTS.
//!
//! This crate defines the boundary between the search and the learned model:
//! the [`InferenceOracle`] trait and the tensors that cross it.
//!
//! # Types
//!
//! - [`InferenceOracle`] - Batched recurrent inference over latent states
//! - [`LatentBatch`] - Latent states plus recurrent reward-predictor memory
//! - [`Policy`] - Probability distribution over actions (sums to 1.0)
//! - [`EzError`] - Errors raised by search and oracle code

mod error;
mod oracle;
mod types;

pub use error::{EzError, Result};
pub use oracle::{InferenceOracle, LatentBatch, OracleBatch, OracleOutput, RecurrentMemory};
pub use types::Policy;
