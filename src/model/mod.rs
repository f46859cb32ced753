//! Classifier backends. Both evaluate the same network: 1530 landmark values
//! in, one raw score (logit) per gesture class out.

pub mod mlp;
pub mod onnx;

use anyhow::Result;

use crate::config::{ModelBackend, ModelConfig};
use crate::error::GestureError;

pub use mlp::{Dense, Mlp};
pub use onnx::OnnxModel;

/// A loaded, read-only classifier.
pub trait LogitModel: Send + Sync {
    /// Short description for logs
    fn name(&self) -> String;

    /// Width of the single input row the model expects
    fn input_width(&self) -> usize;

    /// Number of classes, if the artifact declares it
    fn output_width(&self) -> Option<usize>;

    /// Run one forward pass over a single input row and return the logits
    fn forward(&self, input: &[f32]) -> Result<Vec<f32>>;
}

/// Load the configured backend from `path`.
pub fn load_model(config: &ModelConfig) -> Result<Box<dyn LogitModel>, GestureError> {
    match config.backend {
        ModelBackend::Onnx => {
            let model = OnnxModel::load(&config.path, config.sessions, config.intra_threads)?;
            Ok(Box::new(model))
        }
        ModelBackend::Mlp => {
            let model = Mlp::load(&config.path)?;
            Ok(Box::new(model))
        }
    }
}
