//! Probability distributions produced from policy logits.
//!
//! Invariant: a `Policy` is non-empty, non-negative and sums to 1.0.

use crate::{EzError, Result};

/// A probability distribution over actions.
///
/// # Example
/// ```
/// use ez_core::Policy;
///
/// let probs = Policy::from_logits(&[0.0, 0.0]).unwrap().into_inner();
/// assert!((probs[0] - 0.5).abs() < 1e-6);
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct Policy(Vec<f32>);

impl Policy {
    /// Softmax over raw logits.
    ///
    /// The maximum logit is subtracted before exponentiating so large logits
    /// do not overflow.
    ///
    /// # Errors
    /// Returns error if `logits` is empty or holds a non-finite value.
    pub fn from_logits(logits: &[f32]) -> Result<Self> {
        if logits.is_empty() {
            return Err(EzError::InvalidPolicy("policy cannot be empty".to_string()));
        }
        if logits.iter().any(|l| !l.is_finite()) {
            return Err(EzError::InvalidPolicy(
                "logits contain non-finite values".to_string(),
            ));
        }

        let max_logit = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let exps: Vec<f32> = logits.iter().map(|l| (l - max_logit).exp()).collect();
        let sum: f32 = exps.iter().sum();

        Ok(Self(exps.into_iter().map(|e| e / sum).collect()))
    }

    /// Softmax restricted to `legal` action indices, in the order given.
    ///
    /// Entry `i` of the result is the probability of action `legal[i]`.
    ///
    /// # Errors
    /// Returns error if `legal` is empty or names an index outside `logits`.
    pub fn from_masked_logits(logits: &[f32], legal: &[usize]) -> Result<Self> {
        let picked = legal
            .iter()
            .map(|&a| {
                logits.get(a).copied().ok_or_else(|| {
                    EzError::InvalidPolicy(format!(
                        "legal action {} outside {} logits",
                        a,
                        logits.len()
                    ))
                })
            })
            .collect::<Result<Vec<f32>>>()?;
        Self::from_logits(&picked)
    }

    /// Get the number of actions in this policy.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Get the underlying vector (consumes self).
    pub fn into_inner(self) -> Vec<f32> {
        self.0
    }
}

impl IntoIterator for Policy {
    type Item = f32;
    type IntoIter = std::vec::IntoIter<f32>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}
