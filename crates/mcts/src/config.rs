//! Search configuration parameters.
//!
//! Defaults follow the usual EfficientZero Atari settings. A config can be
//! loaded from YAML; missing keys fall back to the defaults.

use ez_core::{EzError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Errors raised while loading a config file.
#[derive(Error, Debug)]
pub enum ConfigLoadError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error(transparent)]
    Invalid(#[from] EzError),
}

/// Batched search configuration.
///
/// Passed by reference into every component that needs it; never mutated
/// during a search.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Total simulations per root, across all lanes.
    pub num_simulations: usize,

    /// Parallel simulation lanes per round.
    /// `num_simulations` must be a multiple of this.
    pub searches: usize,

    /// PUCT exploration constant base.
    /// Part of the formula: c = pb_c_init + log((N + pb_c_base + 1) / pb_c_base)
    pub pb_c_base: f32,

    /// PUCT exploration constant init.
    pub pb_c_init: f32,

    /// Per-step discount applied to backed-up returns.
    pub discount: f32,

    /// Floor on the min-max range used for value normalization.
    pub value_delta_max: f32,

    /// Recurrent memory is cleared for leaves whose search depth is a
    /// multiple of this.
    pub horizon: usize,

    /// Dirichlet noise alpha for root priors.
    pub root_dirichlet_alpha: f32,

    /// Fraction of each root prior replaced with Dirichlet noise.
    /// 0 = no exploration noise, 1 = pure noise.
    pub root_exploration_fraction: f32,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            num_simulations: 50,
            searches: 2,
            pb_c_base: 19652.0,
            pb_c_init: 1.25,
            discount: 0.997,
            value_delta_max: 0.01,
            horizon: 5,
            root_dirichlet_alpha: 0.3,
            root_exploration_fraction: 0.25,
        }
    }
}

impl SearchConfig {
    /// Create a new config with the specified number of simulations.
    pub fn with_simulations(num_simulations: usize) -> Self {
        Self {
            num_simulations,
            ..Default::default()
        }
    }

    /// Create a config for evaluation (no root exploration noise).
    pub fn for_evaluation(num_simulations: usize) -> Self {
        Self {
            num_simulations,
            root_exploration_fraction: 0.0,
            ..Default::default()
        }
    }

    /// Number of select/evaluate/backpropagate rounds per search.
    pub fn rounds(&self) -> usize {
        if self.searches == 0 {
            0
        } else {
            self.num_simulations / self.searches
        }
    }

    /// Whether a leaf at `search_len` actions from its root gets its
    /// recurrent memory cleared.
    pub fn is_reset_depth(&self, search_len: usize) -> bool {
        self.horizon > 0 && search_len % self.horizon == 0
    }

    /// # Errors
    /// Returns `EzError::Config` describing the first invalid field.
    pub fn validate(&self) -> Result<()> {
        if self.horizon == 0 {
            return Err(EzError::Config("horizon must be > 0".to_string()));
        }
        if self.searches == 0 {
            return Err(EzError::Config("searches must be > 0".to_string()));
        }
        if self.num_simulations == 0 {
            return Err(EzError::Config("num_simulations must be > 0".to_string()));
        }
        if self.num_simulations % self.searches != 0 {
            return Err(EzError::Config(format!(
                "num_simulations ({}) must be divisible by searches ({})",
                self.num_simulations, self.searches
            )));
        }
        if !(self.pb_c_base.is_finite() && self.pb_c_base > 0.0) {
            return Err(EzError::Config(
                "pb_c_base must be finite and > 0".to_string(),
            ));
        }
        if !self.pb_c_init.is_finite() {
            return Err(EzError::Config("pb_c_init must be finite".to_string()));
        }
        if !(self.discount > 0.0 && self.discount <= 1.0) {
            return Err(EzError::Config("discount must be in (0, 1]".to_string()));
        }
        if !(self.value_delta_max.is_finite() && self.value_delta_max >= 0.0) {
            return Err(EzError::Config(
                "value_delta_max must be finite and >= 0".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.root_exploration_fraction) {
            return Err(EzError::Config(
                "root_exploration_fraction must be in [0, 1]".to_string(),
            ));
        }
        if !(self.root_dirichlet_alpha.is_finite() && self.root_dirichlet_alpha > 0.0) {
            return Err(EzError::Config(
                "root_dirichlet_alpha must be finite and > 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Parse and validate a YAML document.
    pub fn from_yaml_str(yaml: &str) -> std::result::Result<Self, ConfigLoadError> {
        let config: SearchConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a YAML config file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> std::result::Result<Self, ConfigLoadError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&contents)
    }
}
