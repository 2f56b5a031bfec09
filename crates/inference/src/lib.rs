//! ONNX Runtime inference for batched EfficientZero search.
//!
//! This crate provides neural network inference using ONNX Runtime,
//! implementing the `InferenceOracle` trait from `ez_core` so a batched
//! search can drive an exported model directly.

mod model;
mod oracle;

pub use model::{InitialOutput, ModelShape, OnnxModel};
pub use oracle::OnnxOracle;
