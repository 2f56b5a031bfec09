//! Model-backed `InferenceOracle`.

use crate::model::{InitialOutput, ModelShape, OnnxModel};
use ez_core::{EzError, InferenceOracle, OracleBatch, OracleOutput};
use ndarray::Array2;
use std::path::Path;
use std::time::Instant;
use tracing::trace;

/// Inference oracle running the recurrent ONNX model once per search round.
pub struct OnnxOracle {
    model: OnnxModel,
    calls: usize,
}

impl OnnxOracle {
    pub fn new(model: OnnxModel) -> Self {
        Self { model, calls: 0 }
    }

    /// Create from a directory containing the ONNX models.
    ///
    /// Expects `initial_inference.onnx` and `recurrent_inference.onnx` in the directory.
    pub fn from_directory(
        dir: impl AsRef<Path>,
        shape: ModelShape,
        intra_threads: Option<usize>,
    ) -> anyhow::Result<Self> {
        Ok(Self::new(OnnxModel::from_directory(dir, shape, intra_threads)?))
    }

    pub fn model(&self) -> &OnnxModel {
        &self.model
    }

    /// Number of recurrent inference calls so far.
    pub fn calls(&self) -> usize {
        self.calls
    }

    /// Root latents, values and logits for a batch of observations.
    pub fn initial_inference(&self, observations: &Array2<f32>) -> anyhow::Result<InitialOutput> {
        self.model.initial_inference(observations)
    }
}

impl InferenceOracle for OnnxOracle {
    fn evaluate(&mut self, batch: &OracleBatch) -> ez_core::Result<OracleOutput> {
        self.calls += 1;
        let start = Instant::now();
        let output = self
            .model
            .recurrent_inference(batch)
            .map_err(EzError::oracle)?;
        trace!(
            rows = batch.len(),
            elapsed_us = start.elapsed().as_micros() as u64,
            "recurrent inference"
        );
        Ok(output)
    }
}
