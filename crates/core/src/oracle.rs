use crate::{EzError, Result};
use ndarray::{Array2, Axis};

/// Cell and hidden tensors of the recurrent value-prefix predictor.
///
/// Both tensors are `[rows, width]`, one row per batch entry.
#[derive(Clone, Debug, PartialEq)]
pub struct RecurrentMemory {
    pub cell: Array2<f32>,
    pub hidden: Array2<f32>,
}

impl RecurrentMemory {
    /// # Errors
    /// Returns `EzError::ShapeMismatch` if the two tensors differ in shape.
    pub fn new(cell: Array2<f32>, hidden: Array2<f32>) -> Result<Self> {
        if cell.nrows() != hidden.nrows() {
            return Err(EzError::ShapeMismatch {
                what: "recurrent memory rows",
                expected: cell.nrows(),
                actual: hidden.nrows(),
            });
        }
        if cell.ncols() != hidden.ncols() {
            return Err(EzError::ShapeMismatch {
                what: "recurrent memory width",
                expected: cell.ncols(),
                actual: hidden.ncols(),
            });
        }
        Ok(Self { cell, hidden })
    }

    pub fn zeros(rows: usize, width: usize) -> Self {
        Self {
            cell: Array2::zeros((rows, width)),
            hidden: Array2::zeros((rows, width)),
        }
    }

    pub fn rows(&self) -> usize {
        self.cell.nrows()
    }

    pub fn width(&self) -> usize {
        self.cell.ncols()
    }

    /// Zero both components of every row whose flag is set.
    ///
    /// # Errors
    /// Returns `EzError::ShapeMismatch` if `mask` has a different length
    /// than the number of rows.
    pub fn zero_rows(&mut self, mask: &[bool]) -> Result<()> {
        if mask.len() != self.rows() {
            return Err(EzError::ShapeMismatch {
                what: "reset mask",
                expected: self.rows(),
                actual: mask.len(),
            });
        }
        for (row, &reset) in mask.iter().enumerate() {
            if reset {
                self.cell.row_mut(row).fill(0.0);
                self.hidden.row_mut(row).fill(0.0);
            }
        }
        Ok(())
    }

    /// True if both components of `row` are exactly zero.
    pub fn is_row_zero(&self, row: usize) -> bool {
        self.cell.row(row).iter().all(|&x| x == 0.0)
            && self.hidden.row(row).iter().all(|&x| x == 0.0)
    }

    /// Copy `times` stacked replicas of this memory, row order preserved
    /// within each replica.
    pub fn tile(&self, times: usize) -> Self {
        Self {
            cell: tile_rows(&self.cell, times),
            hidden: tile_rows(&self.hidden, times),
        }
    }
}

/// Latent states together with the recurrent memory that accompanies them.
#[derive(Clone, Debug, PartialEq)]
pub struct LatentBatch {
    /// `[rows, hidden_width]`, each latent flattened.
    pub hidden_states: Array2<f32>,
    pub memory: RecurrentMemory,
}

impl LatentBatch {
    /// # Errors
    /// Returns `EzError::ShapeMismatch` if the memory has a different number
    /// of rows than the hidden states.
    pub fn new(hidden_states: Array2<f32>, memory: RecurrentMemory) -> Result<Self> {
        if hidden_states.nrows() != memory.rows() {
            return Err(EzError::ShapeMismatch {
                what: "latent batch rows",
                expected: hidden_states.nrows(),
                actual: memory.rows(),
            });
        }
        Ok(Self {
            hidden_states,
            memory,
        })
    }

    pub fn rows(&self) -> usize {
        self.hidden_states.nrows()
    }

    pub fn hidden_width(&self) -> usize {
        self.hidden_states.ncols()
    }

    pub fn memory_width(&self) -> usize {
        self.memory.width()
    }
}

/// One batched request to the model: a latent per leaf plus the action
/// that leads out of it.
#[derive(Clone, Debug)]
pub struct OracleBatch {
    pub latents: LatentBatch,
    pub last_actions: Vec<usize>,
}

impl OracleBatch {
    pub fn len(&self) -> usize {
        self.last_actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_actions.is_empty()
    }
}

/// Model output for an `OracleBatch`, row-aligned with the request.
#[derive(Clone, Debug)]
pub struct OracleOutput {
    pub next_hidden_states: Array2<f32>,
    pub value_prefixes: Vec<f32>,
    pub values: Vec<f32>,
    /// `[rows, num_actions]`.
    pub policy_logits: Array2<f32>,
    pub next_memory: RecurrentMemory,
}

impl OracleOutput {
    pub fn rows(&self) -> usize {
        self.values.len()
    }

    pub fn num_actions(&self) -> usize {
        self.policy_logits.ncols()
    }

    /// Check that every field has `rows` entries, widths match the request,
    /// and all numbers are finite.
    ///
    /// # Errors
    /// `EzError::ShapeMismatch` or `EzError::NonFiniteOutput`.
    pub fn validate(&self, rows: usize, hidden_width: usize, memory_width: usize) -> Result<()> {
        let row_counts = [
            ("next hidden states", self.next_hidden_states.nrows()),
            ("value prefixes", self.value_prefixes.len()),
            ("values", self.values.len()),
            ("policy logits", self.policy_logits.nrows()),
            ("next memory cell", self.next_memory.cell.nrows()),
            ("next memory hidden", self.next_memory.hidden.nrows()),
        ];
        for (what, actual) in row_counts {
            if actual != rows {
                return Err(EzError::ShapeMismatch {
                    what,
                    expected: rows,
                    actual,
                });
            }
        }

        if self.next_hidden_states.ncols() != hidden_width {
            return Err(EzError::ShapeMismatch {
                what: "next hidden state width",
                expected: hidden_width,
                actual: self.next_hidden_states.ncols(),
            });
        }
        for actual in [self.next_memory.cell.ncols(), self.next_memory.hidden.ncols()] {
            if actual != memory_width {
                return Err(EzError::ShapeMismatch {
                    what: "next memory width",
                    expected: memory_width,
                    actual,
                });
            }
        }
        if self.num_actions() == 0 {
            return Err(EzError::ShapeMismatch {
                what: "policy logits width",
                expected: 1,
                actual: 0,
            });
        }

        check_finite_vec("value prefix", &self.value_prefixes)?;
        check_finite_vec("value", &self.values)?;
        check_finite_rows("policy logits", &self.policy_logits)?;
        check_finite_rows("next hidden state", &self.next_hidden_states)?;
        check_finite_rows("next memory cell", &self.next_memory.cell)?;
        check_finite_rows("next memory hidden", &self.next_memory.hidden)?;
        Ok(())
    }
}

/// A learned model that advances latent states by one action.
///
/// Called once per search round with every leaf of every lane and batch
/// element. Implementations must return rows in request order.
pub trait InferenceOracle {
    fn evaluate(&mut self, batch: &OracleBatch) -> Result<OracleOutput>;
}

impl<O: InferenceOracle + ?Sized> InferenceOracle for &mut O {
    fn evaluate(&mut self, batch: &OracleBatch) -> Result<OracleOutput> {
        (**self).evaluate(batch)
    }
}

impl<O: InferenceOracle + ?Sized> InferenceOracle for Box<O> {
    fn evaluate(&mut self, batch: &OracleBatch) -> Result<OracleOutput> {
        (**self).evaluate(batch)
    }
}

fn tile_rows(array: &Array2<f32>, times: usize) -> Array2<f32> {
    let views: Vec<_> = (0..times).map(|_| array.view()).collect();
    match ndarray::concatenate(Axis(0), &views) {
        Ok(tiled) => tiled,
        // Only reachable for times == 0.
        Err(_) => Array2::zeros((0, array.ncols())),
    }
}

fn check_finite_vec(field: &'static str, values: &[f32]) -> Result<()> {
    match values.iter().position(|v| !v.is_finite()) {
        Some(row) => Err(EzError::NonFiniteOutput { field, row }),
        None => Ok(()),
    }
}

fn check_finite_rows(field: &'static str, values: &Array2<f32>) -> Result<()> {
    for (row, entry) in values.axis_iter(Axis(0)).enumerate() {
        if entry.iter().any(|v| !v.is_finite()) {
            return Err(EzError::NonFiniteOutput { field, row });
        }
    }
    Ok(())
}
