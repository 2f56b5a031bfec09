//! ONNX Runtime session management for batched EfficientZero inference.

use anyhow::{bail, ensure, Context, Result};
use ez_core::{LatentBatch, OracleBatch, OracleOutput, RecurrentMemory};
use ndarray::Array2;
use ort::{session::Session, value::Value};
use std::cell::RefCell;
use std::path::Path;
use tracing::debug;

/// Tensor shapes the exported networks were built with.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModelShape {
    /// Per-sample observation shape, e.g. `[12, 96, 96]` for stacked frames.
    pub observation_shape: Vec<usize>,
    /// Per-sample latent shape, e.g. `[64, 6, 6]`.
    pub hidden_shape: Vec<usize>,
    /// Width of the reward LSTM's cell and hidden state.
    pub memory_width: usize,
}

impl ModelShape {
    pub fn observation_size(&self) -> usize {
        self.observation_shape.iter().product()
    }

    pub fn hidden_size(&self) -> usize {
        self.hidden_shape.iter().product()
    }

    /// `[batch, ..per_sample]` as ONNX dimensions.
    fn batched(batch: usize, per_sample: &[usize]) -> Vec<i64> {
        std::iter::once(batch)
            .chain(per_sample.iter().copied())
            .map(|d| d as i64)
            .collect()
    }
}

/// Output of the representation and prediction networks for a batch of
/// observations, ready to seed the search roots.
#[derive(Clone, Debug)]
pub struct InitialOutput {
    /// Root latents with zeroed recurrent memory.
    pub latents: LatentBatch,
    /// Always zero: no reward has been accumulated at a root.
    pub value_prefixes: Vec<f32>,
    pub values: Vec<f32>,
    /// `[batch, num_actions]`.
    pub policy_logits: Array2<f32>,
}

/// ONNX model pair for EfficientZero inference.
pub struct OnnxModel {
    initial_session: RefCell<Session>,
    recurrent_session: RefCell<Session>,
    shape: ModelShape,
}

impl OnnxModel {
    /// Load the initial and recurrent inference models.
    ///
    /// `intra_threads` caps ONNX Runtime's intra-op parallelism; `None`
    /// keeps the runtime default.
    pub fn load(
        initial_path: impl AsRef<Path>,
        recurrent_path: impl AsRef<Path>,
        shape: ModelShape,
        intra_threads: Option<usize>,
    ) -> Result<Self> {
        let initial_session = build_session(initial_path.as_ref(), intra_threads)
            .with_context(|| {
                format!(
                    "Failed to load initial_inference model from {:?}",
                    initial_path.as_ref()
                )
            })?;
        let recurrent_session = build_session(recurrent_path.as_ref(), intra_threads)
            .with_context(|| {
                format!(
                    "Failed to load recurrent_inference model from {:?}",
                    recurrent_path.as_ref()
                )
            })?;

        Ok(Self {
            initial_session: RefCell::new(initial_session),
            recurrent_session: RefCell::new(recurrent_session),
            shape,
        })
    }

    /// Load `initial_inference.onnx` and `recurrent_inference.onnx` from `dir`.
    pub fn from_directory(
        dir: impl AsRef<Path>,
        shape: ModelShape,
        intra_threads: Option<usize>,
    ) -> Result<Self> {
        let dir = dir.as_ref();
        Self::load(
            dir.join("initial_inference.onnx"),
            dir.join("recurrent_inference.onnx"),
            shape,
            intra_threads,
        )
    }

    pub fn shape(&self) -> &ModelShape {
        &self.shape
    }

    /// Run the representation and prediction networks.
    ///
    /// `observations` holds one flattened observation per row.
    /// Output order: hidden_state, value, policy_logits.
    pub fn initial_inference(&self, observations: &Array2<f32>) -> Result<InitialOutput> {
        let batch = observations.nrows();
        ensure!(
            observations.ncols() == self.shape.observation_size(),
            "Observation width {} does not match shape {:?}",
            observations.ncols(),
            self.shape.observation_shape
        );

        let obs_value = Value::from_array((
            ModelShape::batched(batch, &self.shape.observation_shape),
            observations.iter().copied().collect::<Vec<f32>>(),
        ))?;

        let mut session = self.initial_session.borrow_mut();
        let outputs = session.run(ort::inputs![obs_value])?;

        let hidden = extract_matrix(&outputs, 0, "hidden state", batch)?;
        let values = extract_vector(&outputs, 1, "value", batch)?;
        let policy_logits = extract_matrix(&outputs, 2, "policy logits", batch)?;
        check_width(&hidden, self.shape.hidden_size(), "hidden state")?;

        debug!(batch, "initial inference");
        Ok(InitialOutput {
            latents: LatentBatch::new(hidden, RecurrentMemory::zeros(batch, self.shape.memory_width))?,
            value_prefixes: vec![0.0; batch],
            values,
            policy_logits,
        })
    }

    /// Run the dynamics and prediction networks for one search round.
    ///
    /// Inputs: hidden `[B, ..hidden_shape]`, reward_c `[1, B, M]`,
    /// reward_h `[1, B, M]`, action `[B, 1]`.
    /// Output order: hidden_state, value_prefix, value, policy_logits,
    /// reward_c, reward_h.
    pub fn recurrent_inference(&self, request: &OracleBatch) -> Result<OracleOutput> {
        let batch = request.len();
        let latents = &request.latents;
        let memory_width = self.shape.memory_width;
        check_width(&latents.hidden_states, self.shape.hidden_size(), "request hidden state")?;
        check_width(&latents.memory.cell, memory_width, "request reward_c")?;

        let hidden_value = Value::from_array((
            ModelShape::batched(batch, &self.shape.hidden_shape),
            latents.hidden_states.iter().copied().collect::<Vec<f32>>(),
        ))?;
        // [1, B, M] is the row-major layout of [B, M].
        let memory_shape: Vec<i64> = vec![1, batch as i64, memory_width as i64];
        let cell_value = Value::from_array((
            memory_shape.clone(),
            latents.memory.cell.iter().copied().collect::<Vec<f32>>(),
        ))?;
        let memory_hidden_value = Value::from_array((
            memory_shape,
            latents.memory.hidden.iter().copied().collect::<Vec<f32>>(),
        ))?;
        let action_shape: Vec<i64> = vec![batch as i64, 1];
        let action_data: Vec<i64> = request.last_actions.iter().map(|&a| a as i64).collect();
        let action_value = Value::from_array((action_shape, action_data))?;

        let mut session = self.recurrent_session.borrow_mut();
        let outputs = session.run(ort::inputs![
            hidden_value,
            cell_value,
            memory_hidden_value,
            action_value
        ])?;

        let next_hidden = extract_matrix(&outputs, 0, "hidden state", batch)?;
        let value_prefixes = extract_vector(&outputs, 1, "value prefix", batch)?;
        let values = extract_vector(&outputs, 2, "value", batch)?;
        let policy_logits = extract_matrix(&outputs, 3, "policy logits", batch)?;
        let cell = extract_matrix(&outputs, 4, "reward_c", batch)?;
        let memory_hidden = extract_matrix(&outputs, 5, "reward_h", batch)?;
        check_width(&next_hidden, self.shape.hidden_size(), "hidden state")?;

        Ok(OracleOutput {
            next_hidden_states: next_hidden,
            value_prefixes,
            values,
            policy_logits,
            next_memory: RecurrentMemory::new(cell, memory_hidden)?,
        })
    }
}

fn build_session(path: &Path, intra_threads: Option<usize>) -> Result<Session> {
    let mut builder = Session::builder()?;
    if let Some(threads) = intra_threads {
        builder = builder.with_intra_threads(threads)?;
    }
    Ok(builder.commit_from_file(path)?)
}

/// Raw f32 data of the output at `index`.
fn extract_data(
    outputs: &ort::session::SessionOutputs,
    index: usize,
    what: &str,
) -> Result<Vec<f32>> {
    let output_names: Vec<_> = outputs.keys().collect();
    let name = output_names
        .get(index)
        .with_context(|| format!("Missing {} output", what))?;

    let tensor = outputs
        .get(*name)
        .with_context(|| format!("Failed to get {} tensor", what))?;

    let (_, data) = tensor.try_extract_tensor::<f32>()?;
    Ok(data.to_vec())
}

fn extract_vector(
    outputs: &ort::session::SessionOutputs,
    index: usize,
    what: &str,
    batch: usize,
) -> Result<Vec<f32>> {
    let data = extract_data(outputs, index, what)?;
    ensure!(
        data.len() == batch,
        "Expected {} {} values, got {}",
        batch,
        what,
        data.len()
    );
    Ok(data)
}

fn extract_matrix(
    outputs: &ort::session::SessionOutputs,
    index: usize,
    what: &str,
    batch: usize,
) -> Result<Array2<f32>> {
    rows_to_matrix(extract_data(outputs, index, what)?, batch, what)
}

/// Reshape flat row-major data into `[batch, len / batch]`.
fn rows_to_matrix(data: Vec<f32>, batch: usize, what: &str) -> Result<Array2<f32>> {
    if batch == 0 {
        bail!("Empty batch for {}", what);
    }
    ensure!(
        data.len() % batch == 0,
        "{} has {} values, not divisible by batch {}",
        what,
        data.len(),
        batch
    );
    let width = data.len() / batch;
    Array2::from_shape_vec((batch, width), data)
        .with_context(|| format!("Failed to reshape {}", what))
}

fn check_width(array: &Array2<f32>, expected: usize, what: &str) -> Result<()> {
    ensure!(
        array.ncols() == expected,
        "{} width {} does not match model shape {}",
        what,
        array.ncols(),
        expected
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_shape_sizes() {
        let shape = ModelShape {
            observation_shape: vec![12, 96, 96],
            hidden_shape: vec![64, 6, 6],
            memory_width: 512,
        };
        assert_eq!(shape.observation_size(), 12 * 96 * 96);
        assert_eq!(shape.hidden_size(), 64 * 36);
        assert_eq!(
            ModelShape::batched(4, &shape.hidden_shape),
            vec![4i64, 64, 6, 6]
        );
    }

    #[test]
    fn test_rows_to_matrix() {
        let matrix = rows_to_matrix(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], 2, "logits").unwrap();
        assert_eq!(matrix.shape(), &[2, 3]);
        assert_eq!(matrix[[1, 0]], 4.0);

        // A [1, B, M] LSTM state flattens to the same rows as [B, M].
        let state = rows_to_matrix(vec![0.1, 0.2, 0.3, 0.4], 2, "reward_c").unwrap();
        assert_eq!(state.row(1).to_vec(), vec![0.3, 0.4]);
    }

    #[test]
    fn test_rows_to_matrix_rejects_ragged() {
        assert!(rows_to_matrix(vec![1.0, 2.0, 3.0], 2, "logits").is_err());
        assert!(rows_to_matrix(vec![], 0, "logits").is_err());
    }

    #[test]
    fn test_check_width() {
        let array = Array2::<f32>::zeros((2, 5));
        assert!(check_width(&array, 5, "hidden").is_ok());
        let err = check_width(&array, 4, "hidden").unwrap_err();
        assert!(err.to_string().contains("hidden width 5"));
    }

    #[test]
    fn test_missing_model_files() {
        let shape = ModelShape {
            observation_shape: vec![4],
            hidden_shape: vec![8],
            memory_width: 2,
        };
        let result = OnnxModel::from_directory("/nonexistent/model/dir", shape, Some(1));
        assert!(result.is_err());
    }
}
