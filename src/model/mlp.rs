//! Native evaluation of the gesture classifier:
//! linear(1530 -> 512) -> ReLU -> linear(512 -> 256) -> ReLU -> linear(256 -> classes).
//!
//! Weights come from a JSON export of the trained network:
//! `{"layers": [{"weight": [[...], ...], "bias": [...]}, ...]}` with each weight
//! stored as (out_features, in_features), the PyTorch `nn.Linear` layout.

use std::fs;
use std::path::Path;

use anyhow::{bail, Result};
use ndarray::{Array1, Array2, ArrayView1};
use serde::Deserialize;

use super::LogitModel;
use crate::error::GestureError;
use crate::landmarks::VECTOR_LEN;

/// Input and hidden widths of the three linear layers
pub const LAYER_INPUTS: [usize; 3] = [VECTOR_LEN, 512, 256];

/// One fully connected layer
#[derive(Debug, Clone)]
pub struct Dense {
    /// (out, in)
    weight: Array2<f32>,
    bias: Array1<f32>,
}

impl Dense {
    pub fn new(weight: Array2<f32>, bias: Array1<f32>) -> Result<Self, GestureError> {
        if weight.nrows() != bias.len() {
            return Err(GestureError::artifact(
                "<mlp>",
                format!("weight has {} rows but bias has {} values", weight.nrows(), bias.len()),
            ));
        }
        Ok(Self { weight, bias })
    }

    pub fn inputs(&self) -> usize {
        self.weight.ncols()
    }

    pub fn outputs(&self) -> usize {
        self.weight.nrows()
    }

    fn apply(&self, x: ArrayView1<f32>) -> Array1<f32> {
        self.weight.dot(&x) + &self.bias
    }
}

#[derive(Deserialize)]
struct LayerFile {
    weight: Vec<Vec<f32>>,
    bias: Vec<f32>,
}

#[derive(Deserialize)]
struct MlpFile {
    layers: Vec<LayerFile>,
}

/// Three-layer perceptron with ReLU between layers
#[derive(Debug, Clone)]
pub struct Mlp {
    layers: Vec<Dense>,
}

impl Mlp {
    /// Check the layers against the fixed architecture.
    pub fn new(layers: Vec<Dense>) -> Result<Self, GestureError> {
        if layers.len() != LAYER_INPUTS.len() {
            return Err(GestureError::artifact(
                "<mlp>",
                format!("expected {} layers, got {}", LAYER_INPUTS.len(), layers.len()),
            ));
        }
        for (i, (layer, &inputs)) in layers.iter().zip(LAYER_INPUTS.iter()).enumerate() {
            if layer.inputs() != inputs {
                return Err(GestureError::artifact(
                    "<mlp>",
                    format!("layer {} takes {} inputs, expected {}", i, layer.inputs(), inputs),
                ));
            }
            if let Some(&next) = LAYER_INPUTS.get(i + 1) {
                if layer.outputs() != next {
                    return Err(GestureError::artifact(
                        "<mlp>",
                        format!("layer {} has {} outputs, expected {}", i, layer.outputs(), next),
                    ));
                }
            }
        }
        if layers[layers.len() - 1].outputs() == 0 {
            return Err(GestureError::artifact("<mlp>", "output layer has no classes"));
        }
        Ok(Self { layers })
    }

    pub fn from_json(json: &str) -> Result<Self, GestureError> {
        let file: MlpFile = serde_json::from_str(json).map_err(|e| GestureError::artifact("<mlp>", e))?;
        let mut layers = Vec::with_capacity(file.layers.len());
        for (i, layer) in file.layers.into_iter().enumerate() {
            let weight = rows_to_array(layer.weight)
                .map_err(|e| GestureError::artifact("<mlp>", format!("layer {}: {}", i, e)))?;
            layers.push(Dense::new(weight, Array1::from(layer.bias))?);
        }
        Self::new(layers)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, GestureError> {
        let path = path.as_ref();
        let json = fs::read_to_string(path).map_err(|e| GestureError::artifact(path, e))?;
        Self::from_json(&json).map_err(|e| match e {
            GestureError::ArtifactLoadFailure { reason, .. } => GestureError::artifact(path, reason),
            other => other,
        })
    }

    pub fn num_classes(&self) -> usize {
        self.layers[self.layers.len() - 1].outputs()
    }
}

fn rows_to_array(rows: Vec<Vec<f32>>) -> Result<Array2<f32>> {
    let n_rows = rows.len();
    let n_cols = rows.first().map(Vec::len).unwrap_or(0);
    let mut flat = Vec::with_capacity(n_rows * n_cols);
    for (r, row) in rows.into_iter().enumerate() {
        if row.len() != n_cols {
            bail!("row {} has {} values, expected {}", r, row.len(), n_cols);
        }
        flat.extend(row);
    }
    Ok(Array2::from_shape_vec((n_rows, n_cols), flat)?)
}

impl LogitModel for Mlp {
    fn name(&self) -> String {
        let widths: Vec<String> = self
            .layers
            .iter()
            .map(|l| l.inputs().to_string())
            .chain(std::iter::once(self.num_classes().to_string()))
            .collect();
        format!("mlp {}", widths.join(" -> "))
    }

    fn input_width(&self) -> usize {
        VECTOR_LEN
    }

    fn output_width(&self) -> Option<usize> {
        Some(self.num_classes())
    }

    fn forward(&self, input: &[f32]) -> Result<Vec<f32>> {
        if input.len() != VECTOR_LEN {
            bail!("expected {} inputs, got {}", VECTOR_LEN, input.len());
        }
        let last = self.layers.len() - 1;
        let mut x = ArrayView1::from(input).to_owned();
        for (i, layer) in self.layers.iter().enumerate() {
            x = layer.apply(x.view());
            if i < last {
                x.mapv_inplace(|v| v.max(0.0));
            }
        }
        Ok(x.to_vec())
    }
}
