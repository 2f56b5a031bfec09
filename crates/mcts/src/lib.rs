//! Batched Monte Carlo Tree Search over learned latent states.
//!
//! This crate runs many simulations per round for a batch of roots at once,
//! in the style of EfficientZero: every round selects one leaf per
//! (lane, root), asks an [`InferenceOracle`](ez_core::InferenceOracle) to
//! advance all of them in one call, and backs the predicted values up.
//!
//! # Features
//!
//! - **Batched**: `searches` lanes times `num` roots per oracle call
//! - **PUCT Selection**: min-max normalized values, lowest action on ties
//! - **Value Prefixes**: rewards recovered from cumulative predictions, with
//!   recurrent memory cleared every `horizon` steps
//! - **Dirichlet Noise**: optional exploration noise at the roots
//! - **Stub Oracles**: deterministic oracles for tests and benchmarks
//!
//! # Example
//!
//! ```
//! use ez_core::{LatentBatch, RecurrentMemory};
//! use ez_mcts::{BatchedMcts, Roots, SearchConfig, SyntheticOracle};
//! use ndarray::Array2;
//!
//! let config = SearchConfig::for_evaluation(16);
//! let mut mcts = BatchedMcts::new(config, SyntheticOracle::new(42, 4)).unwrap();
//!
//! let mut roots = Roots::with_action_space(2, 4);
//! roots.prepare_no_noise(&[0.0, 0.0], &[vec![0.0; 4], vec![0.0; 4]]).unwrap();
//! let latents = LatentBatch::new(Array2::zeros((2, 8)), RecurrentMemory::zeros(2, 4)).unwrap();
//!
//! let summary = mcts.search(&mut roots, &latents).unwrap();
//! assert_eq!(summary.rounds, 8);
//! for counts in roots.distributions() {
//!     assert_eq!(counts.iter().sum::<u32>(), 16);
//! }
//! ```

pub mod backprop;
pub mod config;
mod node;
pub mod oracle;
pub mod pool;
pub mod roots;
pub mod search;
pub mod select;
pub mod stats;
pub mod traverse;
mod tree;

pub use backprop::{back_propagate, batch_backpropagate, BackpropSummary};
pub use config::{ConfigLoadError, SearchConfig};
pub use node::{LatentIndex, Node, NodeId, NodeStats};
pub use oracle::{ConstantOracle, SyntheticOracle};
pub use pool::HiddenStatePool;
pub use roots::{sample_dirichlet_noise, RootResult, Roots};
pub use search::{BatchedMcts, SearchSummary};
pub use select::{select_child, ucb_score};
pub use stats::{MinMaxStats, MinMaxStatsGrid};
pub use traverse::{batch_traverse, LeafSelection, Traversal};
pub use tree::Tree;
